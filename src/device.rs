// Device collaborators.
//
// Device adapters (depth sensors, controller IPC clients) live outside this
// crate. They either implement `TrackedDevice` directly or publish completed
// `PoseSnapshot`s from their I/O thread into a `SnapshotFeed`, which the tick
// loop reads without ever blocking the writer.

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};

use crate::types::{DeviceId, FloorPlaneReading, Quat, Vec3};

/// What the calibration state machine needs from a device
pub trait TrackedDevice {
    fn id(&self) -> DeviceId;

    /// Called once at the start of every tick, before any query
    fn refresh(&mut self) {}

    fn is_connected(&self) -> bool;

    /// A body or controller is currently being tracked
    fn subject_acquired(&self) -> bool {
        true
    }

    /// The operator's "start calibration" button
    fn trigger_pressed(&self) -> bool {
        false
    }

    /// Position used for calibration this tick, `None` when not tracking
    fn sample_position(&mut self) -> Option<Vec3>;

    /// Floor plane from the device's own floor detector, if it has one
    fn floor_plane(&self) -> Option<FloorPlaneReading> {
        None
    }
}

#[derive(Clone, Debug)]
pub struct PoseSnapshot {
    pub timestamp: f64,
    pub position: Vec3,
    pub rotation: Quat,
    pub position_confidence: f64,
    pub rotation_confidence: f64,
    pub tracking: bool,
    pub trigger: bool,
    pub floor: Option<FloorPlaneReading>,
}

impl PoseSnapshot {
    pub fn tracked(timestamp: f64, position: Vec3, rotation: Quat) -> Self {
        Self {
            timestamp,
            position,
            rotation,
            position_confidence: 1.0,
            rotation_confidence: 1.0,
            tracking: true,
            trigger: false,
            floor: None,
        }
    }
}

/// Writer half, owned by exactly one I/O thread
pub struct SnapshotPublisher {
    tx: Sender<PoseSnapshot>,
}

impl SnapshotPublisher {
    /// Never blocks. Returns false once the reader is gone.
    pub fn publish(&self, snapshot: PoseSnapshot) -> bool {
        self.tx.send(snapshot).is_ok()
    }
}

/// Reader half, polled once per tick
pub struct SnapshotFeed {
    rx: Receiver<PoseSnapshot>,
    latest: Option<PoseSnapshot>,
    disconnected: bool,
}

impl SnapshotFeed {
    pub fn channel() -> (SnapshotPublisher, SnapshotFeed) {
        let (tx, rx) = unbounded();
        (
            SnapshotPublisher { tx },
            SnapshotFeed {
                rx,
                latest: None,
                disconnected: false,
            },
        )
    }

    /// Drain everything published since the last poll and keep the newest
    pub fn poll(&mut self) -> Option<&PoseSnapshot> {
        loop {
            match self.rx.try_recv() {
                Ok(snapshot) => self.latest = Some(snapshot),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        log::warn!("Snapshot publisher disconnected");
                    }
                    self.disconnected = true;
                    break;
                }
            }
        }
        self.latest.as_ref()
    }

    pub fn latest(&self) -> Option<&PoseSnapshot> {
        self.latest.as_ref()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

/// `TrackedDevice` backed by a snapshot feed
pub struct FeedDevice {
    id: DeviceId,
    feed: SnapshotFeed,
}

impl FeedDevice {
    pub fn new(id: DeviceId, feed: SnapshotFeed) -> Self {
        Self { id, feed }
    }

    pub fn feed_mut(&mut self) -> &mut SnapshotFeed {
        &mut self.feed
    }
}

impl TrackedDevice for FeedDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn refresh(&mut self) {
        self.feed.poll();
    }

    fn is_connected(&self) -> bool {
        !self.feed.is_disconnected() && self.feed.latest().is_some()
    }

    fn subject_acquired(&self) -> bool {
        self.feed.latest().is_some_and(|s| s.tracking)
    }

    fn trigger_pressed(&self) -> bool {
        self.feed.latest().is_some_and(|s| s.trigger)
    }

    fn sample_position(&mut self) -> Option<Vec3> {
        self.feed
            .latest()
            .filter(|s| s.tracking)
            .map(|s| s.position)
    }

    fn floor_plane(&self) -> Option<FloorPlaneReading> {
        self.feed.latest().and_then(|s| s.floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_feed_keeps_latest() {
        let (publisher, mut feed) = SnapshotFeed::channel();
        assert!(feed.poll().is_none());

        for i in 0..5 {
            let position = Vec3::new(i as f64, 0.0, 0.0);
            assert!(publisher.publish(PoseSnapshot::tracked(i as f64, position, Quat::identity())));
        }
        assert_eq!(feed.poll().map(|s| s.timestamp), Some(4.0));
        // Nothing new: the last snapshot stays readable
        assert_eq!(feed.poll().map(|s| s.timestamp), Some(4.0));
    }

    #[test]
    fn test_writer_thread_never_blocks() {
        let (publisher, mut feed) = SnapshotFeed::channel();
        let writer = thread::spawn(move || {
            for i in 0..1000 {
                publisher.publish(PoseSnapshot::tracked(i as f64, Vec3::zeros(), Quat::identity()));
            }
        });
        writer.join().unwrap();

        assert_eq!(feed.poll().map(|s| s.timestamp), Some(999.0));
        assert!(feed.is_disconnected());
    }

    #[test]
    fn test_feed_device() {
        let (publisher, feed) = SnapshotFeed::channel();
        let mut device = FeedDevice::new(DeviceId::PsMove, feed);
        assert!(!device.is_connected());

        let mut snapshot = PoseSnapshot::tracked(0.0, Vec3::new(1.0, 2.0, 3.0), Quat::identity());
        snapshot.trigger = true;
        publisher.publish(snapshot.clone());
        device.refresh();

        assert_eq!(device.sample_position(), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert!(device.is_connected());
        assert!(device.trigger_pressed());

        snapshot.tracking = false;
        publisher.publish(snapshot);
        device.refresh();
        assert_eq!(device.sample_position(), None);
        assert!(!device.subject_acquired());
    }
}

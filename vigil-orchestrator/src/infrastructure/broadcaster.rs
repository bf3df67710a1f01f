//! Per-scan progress fan-out
//!
//! Each scan gets a bounded `tokio::sync::broadcast` channel. Publishing never
//! waits on subscribers: a subscriber that falls behind loses the oldest
//! events and resumes from what is still buffered. The terminal event is the
//! last one sent before the sender is dropped, so it is always the newest
//! buffered value and every subscriber observes it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace};

use vigil_core::domain::{ProgressEvent, Scan, ScanId};

struct Channel {
    /// `None` once the terminal event was published
    sender: Option<broadcast::Sender<ProgressEvent>>,
    latest: ProgressEvent,
}

pub struct ProgressBroadcaster {
    channels: Mutex<HashMap<ScanId, Channel>>,
    capacity: usize,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ScanId, Channel>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create the channel for a scan with its current state as event 0.
    pub fn open(&self, scan: &Scan) -> ProgressEvent {
        let event = ProgressEvent::from_scan(scan, 0);
        let sender = (!event.is_terminal()).then(|| broadcast::channel(self.capacity).0);
        self.lock().insert(
            scan.id,
            Channel {
                sender,
                latest: event.clone(),
            },
        );
        debug!(scan_id = %scan.id, status = %scan.status, "Progress channel opened");
        event
    }

    /// Publish the scan's current state as the next event.
    ///
    /// Returns `None` if the channel is already closed. A terminal event
    /// closes the channel after it is sent.
    pub fn publish(&self, scan: &Scan) -> Option<ProgressEvent> {
        let mut channels = self.lock();
        if !channels.contains_key(&scan.id) {
            drop(channels);
            return Some(self.open(scan));
        }
        let channel = channels.get_mut(&scan.id)?;
        let sender = channel.sender.as_ref()?;

        let event = ProgressEvent::from_scan(scan, channel.latest.sequence + 1);
        // No receivers is not an error: the snapshot covers late subscribers.
        let receivers = sender.send(event.clone()).unwrap_or(0);
        trace!(
            scan_id = %scan.id,
            sequence = event.sequence,
            progress = event.progress,
            receivers,
            "Progress published"
        );

        if event.is_terminal() {
            channel.sender = None;
            debug!(scan_id = %scan.id, status = %event.status, "Progress channel closed");
        }
        channel.latest = event.clone();
        Some(event)
    }

    /// Subscribe to a scan's events, starting with its latest state.
    pub fn subscribe(&self, scan_id: ScanId) -> Option<ProgressSubscription> {
        let channels = self.lock();
        let channel = channels.get(&scan_id)?;
        Some(ProgressSubscription {
            snapshot: Some(channel.latest.clone()),
            receiver: channel.sender.as_ref().map(broadcast::Sender::subscribe),
            last_sequence: None,
            finished: false,
        })
    }

    pub fn latest(&self, scan_id: ScanId) -> Option<ProgressEvent> {
        self.lock().get(&scan_id).map(|c| c.latest.clone())
    }

    /// Drop a scan's channel; live subscribers still drain what they have.
    pub fn forget(&self, scan_id: ScanId) {
        self.lock().remove(&scan_id);
    }

    pub fn subscriber_count(&self, scan_id: ScanId) -> usize {
        self.lock()
            .get(&scan_id)
            .and_then(|c| c.sender.as_ref().map(broadcast::Sender::receiver_count))
            .unwrap_or(0)
    }
}

/// Ordered progress events for one scan.
///
/// Yields the state at subscription time, then every later event still in
/// the buffer, and ends after the terminal event.
pub struct ProgressSubscription {
    snapshot: Option<ProgressEvent>,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    last_sequence: Option<u64>,
    finished: bool,
}

impl ProgressSubscription {
    /// Subscription over a scan that has no live channel.
    pub fn completed(event: ProgressEvent) -> Self {
        Self {
            snapshot: Some(event),
            receiver: None,
            last_sequence: None,
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        if let Some(snapshot) = self.snapshot.take() {
            return Some(self.deliver(snapshot));
        }

        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if self.last_sequence.is_some_and(|seen| event.sequence <= seen) {
                        continue;
                    }
                    return Some(self.deliver(event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Progress subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    fn deliver(&mut self, event: ProgressEvent) -> ProgressEvent {
        self.last_sequence = Some(event.sequence);
        if event.is_terminal() {
            self.finished = true;
            self.receiver = None;
        }
        event
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|event| (event, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use vigil_core::domain::{ScanProfile, ScanStatus, TargetIdentity, TargetType};

    fn running_scan() -> Scan {
        let mut scan = Scan::new(
            TargetIdentity::new(TargetType::Hostname, "example.com"),
            ScanProfile::Web,
        );
        scan.transition(ScanStatus::Running, None).unwrap();
        scan
    }

    #[tokio::test]
    async fn test_subscriber_sees_ordered_events_through_terminal() {
        let broadcaster = ProgressBroadcaster::new(16);
        let mut scan = running_scan();
        broadcaster.open(&scan);
        let subscription = broadcaster.subscribe(scan.id).unwrap();

        for progress in [25, 50, 75] {
            scan.advance_progress(progress);
            broadcaster.publish(&scan);
        }
        scan.transition(ScanStatus::Completed, None).unwrap();
        broadcaster.publish(&scan);

        let events: Vec<ProgressEvent> = subscription.into_stream().collect().await;
        let progress: Vec<u8> = events.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![0, 25, 50, 75, 100]);
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert_eq!(events.last().unwrap().status, ScanStatus::Completed);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_still_gets_terminal_event() {
        let broadcaster = ProgressBroadcaster::new(2);
        let mut scan = running_scan();
        broadcaster.open(&scan);
        let mut subscription = broadcaster.subscribe(scan.id).unwrap();

        for progress in 1..=40 {
            scan.advance_progress(progress);
            broadcaster.publish(&scan);
        }
        scan.transition(ScanStatus::Cancelled, None).unwrap();
        broadcaster.publish(&scan);

        let mut last = None;
        let mut previous = 0;
        while let Some(event) = subscription.next().await {
            assert!(event.progress >= previous);
            previous = event.progress;
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.status, ScanStatus::Cancelled);
        assert_eq!(last.progress, 100);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_terminal_snapshot_only() {
        let broadcaster = ProgressBroadcaster::new(4);
        let mut scan = running_scan();
        broadcaster.open(&scan);
        scan.transition(ScanStatus::Completed, None).unwrap();
        broadcaster.publish(&scan);

        assert!(broadcaster.publish(&scan).is_none());

        let mut subscription = broadcaster.subscribe(scan.id).unwrap();
        assert_eq!(subscription.next().await.unwrap().status, ScanStatus::Completed);
        assert!(subscription.next().await.is_none());
    }

    #[test]
    fn test_publish_without_subscribers_does_not_block() {
        let broadcaster = ProgressBroadcaster::new(1);
        let mut scan = running_scan();
        broadcaster.open(&scan);
        for progress in 1..=99 {
            scan.advance_progress(progress);
            broadcaster.publish(&scan);
        }
        assert_eq!(broadcaster.latest(scan.id).unwrap().sequence, 99);
        assert_eq!(broadcaster.subscriber_count(scan.id), 0);
    }

    #[test]
    fn test_unknown_scan_has_no_subscription() {
        let broadcaster = ProgressBroadcaster::new(4);
        assert!(broadcaster.subscribe(ScanId::new()).is_none());
    }
}

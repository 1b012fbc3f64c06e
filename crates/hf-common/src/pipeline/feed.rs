//! In-process change notifications for board subscribers.
//!
//! Subscribers only learn that a job's board changed and refetch it; no
//! deltas are carried.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Transition,
    Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineChange {
    pub job_id: i64,
    pub record_id: i64,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    Changed(PipelineChange),
    /// The subscriber fell behind and missed changes; refetch anyway.
    Resync,
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<PipelineChange>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, change: PipelineChange) {
        // No receivers is the common case outside of open board streams.
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self, job_id: i64) -> BoardSubscription {
        metrics::gauge!("hf_board_subscriptions").increment(1.0);
        BoardSubscription {
            job_id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live interest in one job's board. Dropping it unsubscribes.
pub struct BoardSubscription {
    job_id: i64,
    rx: broadcast::Receiver<PipelineChange>,
}

impl BoardSubscription {
    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    /// Waits for the next change to this job; `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<Refresh> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.job_id == self.job_id => {
                    return Some(Refresh::Changed(change));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(job_id = self.job_id, skipped, "board subscription lagged");
                    return Some(Refresh::Resync);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for BoardSubscription {
    fn drop(&mut self) {
        metrics::gauge!("hf_board_subscriptions").decrement(1.0);
        debug!(job_id = self.job_id, "board subscription closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(job_id: i64, record_id: i64) -> PipelineChange {
        PipelineChange {
            job_id,
            record_id,
            kind: ChangeKind::Transition,
        }
    }

    #[tokio::test]
    async fn subscription_only_sees_its_job() {
        let feed = ChangeFeed::new(8);
        let mut sub = feed.subscribe(7);

        feed.publish(change(3, 1));
        feed.publish(change(7, 2));

        assert_eq!(sub.next().await, Some(Refresh::Changed(change(7, 2))));
    }

    #[tokio::test]
    async fn dropping_subscription_releases_receiver() {
        let feed = ChangeFeed::new(8);
        let sub = feed.subscribe(1);
        assert_eq!(feed.subscriber_count(), 1);
        drop(sub);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_to_resync() {
        let feed = ChangeFeed::new(1);
        let mut sub = feed.subscribe(1);
        feed.publish(change(1, 1));
        feed.publish(change(1, 2));

        assert_eq!(sub.next().await, Some(Refresh::Resync));
        assert_eq!(sub.next().await, Some(Refresh::Changed(change(1, 2))));
    }

    #[tokio::test]
    async fn closed_feed_ends_subscription() {
        let feed = ChangeFeed::new(4);
        let mut sub = feed.subscribe(1);
        drop(feed);
        assert_eq!(sub.next().await, None);
    }
}

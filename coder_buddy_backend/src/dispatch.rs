//! One-way push of reactions to the presentation channel.
//!
//! Messages go to whoever is subscribed at the moment of sending. Nothing is
//! queued for late subscribers. Each reaction carries the sequence number of
//! the evaluation that produced it, and a reaction older than the newest one
//! already dispatched is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::agent::reasoning::{AnalysisResult, Mood};

pub const MISSING_CREDENTIAL_TEXT: &str =
    "No API key yet. Run `coder_buddy set-key <key>` and start typing, I'll be watching.";

/// Everything the presentation layer can receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum OutboundMessage {
    UpdateMood { mood: Mood, text: String },
}

impl From<AnalysisResult> for OutboundMessage {
    fn from(result: AnalysisResult) -> Self {
        OutboundMessage::UpdateMood {
            mood: result.mood,
            text: result.text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { listeners: usize },
    NoListener,
    Stale { latest: u64 },
}

pub struct ResultDispatcher {
    channel: broadcast::Sender<OutboundMessage>,
    last_dispatched: AtomicU64,
}

impl ResultDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (channel, _) = broadcast::channel(capacity.max(1));
        Self {
            channel,
            last_dispatched: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.channel.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.channel.receiver_count()
    }

    pub fn last_dispatched_sequence(&self) -> u64 {
        self.last_dispatched.load(Ordering::SeqCst)
    }

    /// Sequence numbers start at 1; zero is never dispatched.
    pub fn dispatch(&self, sequence: u64, result: AnalysisResult) -> DispatchOutcome {
        let previous = self.last_dispatched.fetch_max(sequence, Ordering::SeqCst);
        if previous >= sequence {
            tracing::debug!(
                "Discarding stale reaction #{} (latest dispatched #{})",
                sequence,
                previous
            );
            return DispatchOutcome::Stale { latest: previous };
        }

        self.push(result.into())
    }

    /// Cold-start hint shown when no API key is configured.
    pub fn notify_missing_credential(&self) -> DispatchOutcome {
        self.push(OutboundMessage::UpdateMood {
            mood: Mood::Thinking,
            text: MISSING_CREDENTIAL_TEXT.to_string(),
        })
    }

    pub fn schedule_missing_credential_notice(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            dispatcher.notify_missing_credential();
        })
    }

    fn push(&self, message: OutboundMessage) -> DispatchOutcome {
        match self.channel.send(message) {
            Ok(listeners) => DispatchOutcome::Delivered { listeners },
            Err(broadcast::error::SendError(message)) => {
                tracing::debug!("No presentation listener attached; dropped {:?}", message);
                DispatchOutcome::NoListener
            }
        }
    }
}

impl Default for ResultDispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaction(mood: Mood, text: &str) -> AnalysisResult {
        AnalysisResult {
            mood,
            text: text.to_string(),
        }
    }

    #[test]
    fn outbound_message_wire_shape() {
        let message = OutboundMessage::from(reaction(Mood::Happy, "W code fr."));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"command": "updateMood", "mood": "happy", "text": "W code fr."})
        );

        let back: OutboundMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn dispatch_without_listener_is_dropped() {
        let dispatcher = ResultDispatcher::default();
        assert_eq!(
            dispatcher.dispatch(1, reaction(Mood::Idle, "chill")),
            DispatchOutcome::NoListener
        );
        // Dropped messages still advance the sequence.
        assert_eq!(dispatcher.last_dispatched_sequence(), 1);

        let mut rx = dispatcher.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivered_to_every_listener() {
        let dispatcher = ResultDispatcher::default();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();

        assert_eq!(
            dispatcher.dispatch(1, reaction(Mood::Angry, "NOOO")),
            DispatchOutcome::Delivered { listeners: 2 }
        );
        assert_eq!(a.recv().await.unwrap(), b.recv().await.unwrap());
    }

    #[tokio::test]
    async fn late_arriving_older_result_is_discarded() {
        let dispatcher = ResultDispatcher::default();
        let mut rx = dispatcher.subscribe();

        // Evaluation #2 finishes first, #1 straggles in afterwards.
        dispatcher.dispatch(2, reaction(Mood::Happy, "newer"));
        assert_eq!(
            dispatcher.dispatch(1, reaction(Mood::Angry, "older")),
            DispatchOutcome::Stale { latest: 2 }
        );
        assert_eq!(
            dispatcher.dispatch(2, reaction(Mood::Angry, "duplicate")),
            DispatchOutcome::Stale { latest: 2 }
        );

        let OutboundMessage::UpdateMood { text, .. } = rx.recv().await.unwrap();
        assert_eq!(text, "newer");
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.last_dispatched_sequence(), 2);
    }

    #[tokio::test]
    async fn missing_credential_notice_arrives_after_delay() {
        let dispatcher = Arc::new(ResultDispatcher::default());
        let mut rx = dispatcher.subscribe();

        let handle = dispatcher.schedule_missing_credential_notice(Duration::from_millis(20));
        assert!(rx.try_recv().is_err());
        handle.await.unwrap();

        let OutboundMessage::UpdateMood { mood, text } = rx.recv().await.unwrap();
        assert_eq!(mood, Mood::Thinking);
        assert_eq!(text, MISSING_CREDENTIAL_TEXT);
        assert_eq!(dispatcher.last_dispatched_sequence(), 0);
    }
}

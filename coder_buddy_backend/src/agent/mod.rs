pub mod reasoning;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use flume::Receiver;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::CompanionConfig;
use crate::dispatch::{DispatchOutcome, ResultDispatcher};
use crate::gate::{GateDecision, TriggerGate, TriggerState};
use reasoning::ReasoningClient;

/// Input to the companion loop, already debounced by the editor side.
#[derive(Debug, Clone)]
pub enum CompanionEvent {
    DocumentChanged { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionStatus {
    pub trigger: TriggerState,
    pub history_len: usize,
    pub last_dispatched_sequence: u64,
    pub listeners: usize,
    pub credential_present: bool,
}

/// Process-wide companion service: gate, reasoning client and dispatcher,
/// constructed once and shared by handle.
pub struct Companion {
    gate: Mutex<TriggerGate>,
    reasoning: Arc<ReasoningClient>,
    dispatcher: Arc<ResultDispatcher>,
    next_sequence: AtomicU64,
    presentation_attached: AtomicBool,
    key_notice_delay: Duration,
}

impl Companion {
    pub fn new(
        config: &CompanionConfig,
        reasoning: Arc<ReasoningClient>,
        dispatcher: Arc<ResultDispatcher>,
    ) -> Self {
        Self {
            gate: Mutex::new(TriggerGate::from_config(&config.gate)),
            reasoning,
            dispatcher,
            next_sequence: AtomicU64::new(0),
            presentation_attached: AtomicBool::new(false),
            key_notice_delay: Duration::from_millis(config.key_notice_delay_ms),
        }
    }

    pub fn dispatcher(&self) -> &Arc<ResultDispatcher> {
        &self.dispatcher
    }

    pub fn reasoning(&self) -> &Arc<ReasoningClient> {
        &self.reasoning
    }

    /// Drain document notifications until every sender is gone.
    pub async fn run_loop(self: Arc<Self>, events: Receiver<CompanionEvent>) -> Result<()> {
        tracing::info!("Companion loop started");
        while let Ok(event) = events.recv_async().await {
            match event {
                CompanionEvent::DocumentChanged { text } => {
                    self.evaluate(text).await;
                }
            }
        }
        tracing::info!("Companion loop stopped: event channel closed");
        Ok(())
    }

    /// Gate the document and, on acceptance, spawn the reasoning call.
    pub async fn evaluate(
        self: &Arc<Self>,
        text: String,
    ) -> Option<JoinHandle<Option<DispatchOutcome>>> {
        self.evaluate_at(text, Utc::now()).await
    }

    pub async fn evaluate_at(
        self: &Arc<Self>,
        text: String,
        now: DateTime<Utc>,
    ) -> Option<JoinHandle<Option<DispatchOutcome>>> {
        let decision = self.gate.lock().await.evaluate_at(&text, now);
        match decision {
            GateDecision::Accepted => {}
            GateDecision::CoolingDown { remaining } => {
                tracing::trace!(
                    "Gate rejected: cooling down ({}ms left)",
                    remaining.num_milliseconds()
                );
                return None;
            }
            GateDecision::BelowDelta { delta } => {
                tracing::trace!("Gate rejected: length delta {} below threshold", delta);
                return None;
            }
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            "Evaluation #{} accepted ({} chars)",
            sequence,
            text.chars().count()
        );

        let companion = Arc::clone(self);
        Some(tokio::spawn(async move {
            companion.react(sequence, &text).await
        }))
    }

    /// `None` when the evaluation produced no reaction.
    async fn react(&self, sequence: u64, text: &str) -> Option<DispatchOutcome> {
        match self.reasoning.analyze(text).await {
            Ok(result) => {
                tracing::info!("Reaction #{} [{:?}]: {}", sequence, result.mood, result.text);
                Some(self.dispatcher.dispatch(sequence, result))
            }
            Err(error) => {
                tracing::warn!(
                    "Evaluation #{} produced no reaction ({}): {}",
                    sequence,
                    error.reason(),
                    error
                );
                None
            }
        }
    }

    /// Called whenever a presentation surface attaches. The first attach
    /// schedules the missing-credential notice when no key is available.
    pub async fn on_presentation_attached(&self) -> Option<JoinHandle<()>> {
        if self.presentation_attached.swap(true, Ordering::SeqCst) {
            return None;
        }
        if self.reasoning.has_credential().await {
            return None;
        }
        tracing::info!("No API key configured; scheduling onboarding notice");
        Some(
            self.dispatcher
                .schedule_missing_credential_notice(self.key_notice_delay),
        )
    }

    pub async fn status(&self) -> CompanionStatus {
        CompanionStatus {
            trigger: self.gate.lock().await.state().clone(),
            history_len: self.reasoning.history_len().await,
            last_dispatched_sequence: self.dispatcher.last_dispatched_sequence(),
            listeners: self.dispatcher.listener_count(),
            credential_present: self.reasoning.has_credential().await,
        }
    }
}

//! Trigger-decision pipeline and bounded conversation memory for Coder Buddy.
//!
//! Debounced document snapshots pass through the [`gate::TriggerGate`]; accepted
//! ones are sent to the reasoning service with short-term
//! [`memory::ConversationMemory`], and the reaction is pushed to the
//! presentation layer by the [`dispatch::ResultDispatcher`].

pub mod agent;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod gate;
pub mod http_client;
pub mod llm_client;
pub mod memory;
pub mod runtime;
pub mod server;

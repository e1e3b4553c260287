// ==============================================================================
// progress.rs - Progress Event Stream
// ==============================================================================
// Description: One-way, fire-and-forget progress and log events keyed by
//              model id and trait id
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    RunStarted,
    Loading,
    ModelCompleted,
    ModelSkipped,
    TraitFailed,
    Aggregating,
    RunFinished,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProgressEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub phase: ProgressPhase,
    pub model_id: Option<String>,
    pub trait_id: Option<String>,
    /// Share of models finished, 0-100
    pub percent: f32,
    pub message: String,
    pub severity: LogSeverity,
}

impl ProgressEvent {
    pub fn new(run_id: Uuid, phase: ProgressPhase, percent: f32, message: impl Into<String>) -> Self {
        let severity = match phase {
            ProgressPhase::ModelSkipped | ProgressPhase::Cancelled => LogSeverity::Warning,
            ProgressPhase::TraitFailed => LogSeverity::Error,
            _ => LogSeverity::Info,
        };

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            phase,
            model_id: None,
            trait_id: None,
            percent: percent.clamp(0.0, 100.0),
            message: message.into(),
            severity,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>, trait_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self.trait_id = Some(trait_id.into());
        self
    }

    pub fn with_trait(mut self, trait_id: impl Into<String>) -> Self {
        self.trait_id = Some(trait_id.into());
        self
    }
}

/// Sending half of the progress stream
///
/// Sends never block and never fail the caller; events are dropped once
/// the receiver is gone.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    run_id: Uuid,
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSender {
    /// A sender whose events go nowhere
    pub fn disabled() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tx: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn event(&self, phase: ProgressPhase, percent: f32, message: impl Into<String>) -> ProgressEvent {
        ProgressEvent::new(self.run_id, phase, percent, message)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Create a progress stream for one run
pub fn channel() -> (ProgressSender, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressSender {
            run_id: Uuid::new_v4(),
            tx: Some(tx),
        },
        rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_flow_to_receiver() {
        let (sender, mut rx) = channel();
        sender.emit(sender.event(ProgressPhase::Loading, 10.0, "loading").with_model("PGS000001", "EFO_1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id, sender.run_id());
        assert_eq!(event.phase, ProgressPhase::Loading);
        assert_eq!(event.model_id.as_deref(), Some("PGS000001"));
        assert_eq!(event.trait_id.as_deref(), Some("EFO_1"));
        assert_eq!(event.severity, LogSeverity::Info);
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sender, rx) = channel();
        drop(rx);
        sender.emit(sender.event(ProgressPhase::RunFinished, 100.0, "done"));
        ProgressSender::disabled().emit(ProgressEvent::new(Uuid::nil(), ProgressPhase::RunStarted, 0.0, ""));
    }

    #[test]
    fn test_severity_and_clamp() {
        let event = ProgressEvent::new(Uuid::nil(), ProgressPhase::ModelSkipped, 150.0, "skip");
        assert_eq!(event.severity, LogSeverity::Warning);
        assert_eq!(event.percent, 100.0);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "model_skipped");
        assert_eq!(json["severity"], "warning");
    }
}

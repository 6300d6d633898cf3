use tracing::{debug, warn};

use companion_contracts::events::{EventWriter, SessionEvent};
use companion_contracts::request::Flow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Idle,
    Validating,
    Rejected,
    Dispatched,
    Streaming,
    Succeeded,
    Failed,
}

impl RequestPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Rejected => "rejected",
            Self::Dispatched => "dispatched",
            Self::Streaming => "streaming",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Rejected)
                | (Validating, Dispatched)
                | (Dispatched, Streaming)
                | (Dispatched, Succeeded)
                | (Dispatched, Failed)
                | (Streaming, Streaming)
                | (Streaming, Succeeded)
                | (Streaming, Failed)
                | (Rejected, Idle)
                | (Succeeded, Idle)
                | (Failed, Idle)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Succeeded | Self::Failed)
    }
}

/// Lifecycle of one request, logged and mirrored to `events.jsonl`.
#[derive(Debug)]
pub struct RequestTracker {
    flow: Flow,
    request_id: String,
    phase: RequestPhase,
    history: Vec<RequestPhase>,
    events: Option<EventWriter>,
}

impl RequestTracker {
    pub fn new(flow: Flow, request_id: impl Into<String>, events: Option<EventWriter>) -> Self {
        Self {
            flow,
            request_id: request_id.into(),
            phase: RequestPhase::Idle,
            history: vec![RequestPhase::Idle],
            events,
        }
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn history(&self) -> &[RequestPhase] {
        &self.history
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Moves to `next` if the machine allows it; illegal moves are logged
    /// and ignored.
    pub fn advance(&mut self, next: RequestPhase) -> bool {
        let from = self.phase;
        if !from.can_transition_to(next) {
            warn!(
                flow = %self.flow,
                request_id = %self.request_id,
                from = from.as_str(),
                to = next.as_str(),
                "ignoring illegal request transition"
            );
            return false;
        }
        self.phase = next;
        if from != next {
            self.history.push(next);
        }
        debug!(
            flow = %self.flow,
            request_id = %self.request_id,
            from = from.as_str(),
            to = next.as_str(),
            "request state"
        );
        if let Some(events) = &self.events {
            if from != next {
                if let Err(err) = events.record(SessionEvent::RequestState {
                    flow: self.flow,
                    request_id: self.request_id.clone(),
                    from: from.as_str().to_string(),
                    to: next.as_str().to_string(),
                }) {
                    warn!(error = %err, "failed writing request_state event");
                }
            }
        }
        true
    }

    /// Returns to idle after a terminal phase.
    pub fn settle(&mut self) {
        if self.phase.is_terminal() {
            self.advance(RequestPhase::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_request_never_dispatches() {
        let mut tracker = RequestTracker::new(Flow::AdvancedVideo, "req-1", None);
        assert!(tracker.advance(RequestPhase::Validating));
        assert!(tracker.advance(RequestPhase::Rejected));
        assert!(!tracker.advance(RequestPhase::Dispatched));
        tracker.settle();
        assert_eq!(
            tracker.history(),
            &[
                RequestPhase::Idle,
                RequestPhase::Validating,
                RequestPhase::Rejected,
                RequestPhase::Idle
            ]
        );
    }

    #[test]
    fn streaming_repeats_collapse_in_history() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "session-1");
        let mut tracker = RequestTracker::new(Flow::SelfieVideo, "req-2", Some(events));
        for phase in [
            RequestPhase::Validating,
            RequestPhase::Dispatched,
            RequestPhase::Streaming,
            RequestPhase::Streaming,
            RequestPhase::Succeeded,
        ] {
            assert!(tracker.advance(phase));
        }
        tracker.settle();
        assert_eq!(tracker.phase(), RequestPhase::Idle);
        assert_eq!(tracker.history().len(), 6);

        let lines = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        assert_eq!(lines.lines().count(), 5);
        assert!(lines.contains("\"to\":\"succeeded\""));
        Ok(())
    }
}

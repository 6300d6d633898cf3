use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::view::Tone;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressStatus {
    Submitted,
    Processing,
    Downloading,
    Completed,
    Failed,
    Other(String),
}

impl ProgressStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "submitted" => Self::Submitted,
            "processing" => Self::Processing,
            "downloading" => Self::Downloading,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Submitted => "submitted",
            Self::Processing => "processing",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(raw) => raw.as_str(),
        }
    }

    /// How the placeholder should look for this status; `None` leaves it be.
    pub fn tone(&self) -> Option<Tone> {
        match self {
            Self::Submitted | Self::Processing | Self::Downloading => Some(Tone::Neutral),
            Self::Completed => Some(Tone::Success),
            Self::Failed => Some(Tone::Error),
            Self::Other(_) => None,
        }
    }
}

/// A backend status update. `request_id` names the request it belongs to;
/// untagged events reach no request watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub request_id: Option<String>,
    pub status: ProgressStatus,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(status: ProgressStatus, message: impl Into<String>) -> Self {
        Self {
            request_id: None,
            status,
            message: message.into(),
        }
    }

    pub fn for_request(mut self, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        self.request_id = (!request_id.is_empty()).then_some(request_id);
        self
    }

    pub fn concerns(&self, request_id: &str) -> bool {
        self.request_id.as_deref() == Some(request_id)
    }
}

type Callback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<u64, Callback>>,
}

/// Fan-out of backend status events to whoever is waiting on a request.
#[derive(Clone, Default)]
pub struct ProgressHub {
    inner: Arc<HubInner>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&ProgressEvent) + Send + Sync + 'static,
    ) -> ProgressSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        ProgressSubscription {
            hub: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn publish(&self, event: &ProgressEvent) {
        // Snapshot so a callback may unsubscribe without deadlocking.
        let callbacks: Vec<Callback> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Unsubscribes on drop.
pub struct ProgressSubscription {
    hub: Weak<HubInner>,
    id: u64,
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn subscription_receives_until_dropped() {
        let hub = ProgressHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = hub.subscribe(move |event| {
            if let Ok(mut rows) = sink.lock() {
                rows.push(event.status.clone());
            }
        });

        hub.publish(&ProgressEvent::new(ProgressStatus::Submitted, "Task submitted."));
        assert_eq!(hub.subscriber_count(), 1);
        drop(subscription);
        hub.publish(&ProgressEvent::new(ProgressStatus::Processing, "still going"));

        assert_eq!(hub.subscriber_count(), 0);
        let rows = seen.lock().map(|rows| rows.clone()).unwrap_or_default();
        assert_eq!(rows, vec![ProgressStatus::Submitted]);
    }

    #[test]
    fn events_match_only_their_request() {
        let event = ProgressEvent::new(ProgressStatus::Processing, "Rendering").for_request("advanced-video-1");
        assert!(event.concerns("advanced-video-1"));
        assert!(!event.concerns("selfie-video-2"));

        let untagged = ProgressEvent::new(ProgressStatus::Processing, "Rendering");
        assert!(!untagged.concerns("advanced-video-1"));
        assert_eq!(untagged.clone().for_request("").request_id, None);
    }

    #[test]
    fn statuses_map_to_tones() {
        assert_eq!(ProgressStatus::parse("FAILED").tone(), Some(Tone::Error));
        assert_eq!(ProgressStatus::parse("completed").tone(), Some(Tone::Success));
        assert_eq!(ProgressStatus::parse("downloading").tone(), Some(Tone::Neutral));
        assert_eq!(ProgressStatus::parse("watermarking").tone(), None);
        assert_eq!(ProgressStatus::parse("watermarking").as_str(), "watermarking");
    }
}

//! Notification side-channel for top-level assistant commentary.
//!
//! The [`Translator`](crate::stream::Translator) forwards filtered commentary
//! here. Delivery to a chat service is not part of this crate; the
//! [`HubNotifier`] records each notification as a `slack_notification` event
//! on the job so observers see exactly what would have been posted.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::monitor::{EventSink, EventType, data};

/// Receives commentary the translator decided to surface.
pub trait Notifier: Send + Sync {
    fn notify(&self, job_id: &str, text: &str);
}

/// Notifier that records notifications on the job's event stream.
pub struct HubNotifier {
    sink: Arc<dyn EventSink>,
    public_url: Option<String>,
}

impl HubNotifier {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            public_url: None,
        }
    }

    /// Link each notification to the job's page on the monitor at this base URL.
    pub fn with_public_url(mut self, public_url: Option<String>) -> Self {
        self.public_url = public_url.map(|url| url.trim_end_matches('/').to_string());
        self
    }

    fn job_link(&self, job_id: &str) -> Option<String> {
        self.public_url
            .as_ref()
            .map(|base| format!("{base}/jobs/{job_id}"))
    }
}

impl Notifier for HubNotifier {
    fn notify(&self, job_id: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        info!(job_id = %job_id, chars = text.len(), "Notification");
        let mut payload = data(json!({ "text": text }));
        if let Some(link) = self.job_link(job_id) {
            payload.insert("job_url".into(), link.into());
        }
        self.sink
            .emit(job_id, EventType::SlackNotification, payload);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::Notifier;

    /// Notifier double that keeps every notification.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        pub fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, text)| text.clone())
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, job_id: &str, text: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((job_id.to_string(), text.to_string()));
        }
    }
}

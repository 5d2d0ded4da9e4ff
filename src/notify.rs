/// Completion callback
///
/// Fired once after a pass in which no object failed, so the gallery front
/// end can refresh. Failures are logged by the caller and never change the
/// outcome of the pass.
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::reconcile::ReconcileReport;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("webhook returned HTTP {0}")]
    Status(u16),
}

/// Counts sent along with the notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub uploaded: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub full_upload: bool,
}

impl PassSummary {
    pub fn from_report(report: &ReconcileReport, full_upload: bool) -> Self {
        Self {
            uploaded: report.uploaded,
            skipped: report.skipped,
            deleted: report.deleted,
            full_upload,
        }
    }
}

pub trait Notifier {
    fn notify(&self, summary: &PassSummary) -> Result<(), NotifyError>;
}

/// POSTs the summary as JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, summary: &PassSummary) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(summary).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(url = %self.url, status = status.as_u16(), "webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
pub mod recording {
    use super::*;
    use std::cell::RefCell;

    /// Remembers every summary it was asked to send
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub sent: RefCell<Vec<PassSummary>>,
        pub fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, summary: &PassSummary) -> Result<(), NotifyError> {
            self.sent.borrow_mut().push(summary.clone());
            if self.fail {
                return Err(NotifyError::Status(503));
            }
            Ok(())
        }
    }
}

//! Event stream from the download worker to the embedding application.
//!
//! The worker never calls into UI code directly. Everything it has to say is
//! a [`DownloadEvent`] on an unbounded channel that the application drains on
//! its own thread. Credential refresh is a round trip: the event carries a
//! reply sender and the worker waits for the answer with a timeout.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Completed,
    Failed,
    Stopped,
}

/// Reply channel for a credential refresh request.
#[derive(Debug)]
pub struct RefreshReply(oneshot::Sender<bool>);

impl RefreshReply {
    /// `true` once the user has refreshed the cookies and wants a retry.
    pub fn send(self, refreshed: bool) {
        if self.0.send(refreshed).is_err() {
            log::debug!("Credential refresh answer arrived after the worker stopped waiting");
        }
    }

    /// True once the worker stopped waiting (timeout or session end).
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// Resolves when the worker stops waiting for the answer.
    pub async fn closed(&mut self) {
        self.0.closed().await;
    }
}

#[derive(Debug)]
pub enum DownloadEvent {
    Progress { percent: f64, label: String },
    Status(String),
    Error(String),
    Success,
    /// Answer through the reply; no answer within the timeout counts as declined.
    CredentialRefreshRequested(RefreshReply),
    /// Always the last event of a session.
    Finished(SessionEnd),
}

pub type EventReceiver = mpsc::UnboundedReceiver<DownloadEvent>;

/// Sending half, cheap to clone. Sends never block and never fail loudly:
/// a consumer that went away just stops receiving.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: DownloadEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("Event dropped: receiver closed");
        }
    }

    pub fn progress(&self, percent: f64, label: impl Into<String>) {
        self.send(DownloadEvent::Progress {
            percent,
            label: label.into(),
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.send(DownloadEvent::Status(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}", message);
        self.send(DownloadEvent::Error(message));
    }

    pub fn success(&self) {
        self.send(DownloadEvent::Success);
    }

    pub fn finished(&self, end: SessionEnd) {
        log::info!("Session finished: {:?}", end);
        self.send(DownloadEvent::Finished(end));
    }

    /// Asks the application to refresh credentials and waits for the answer.
    ///
    /// Returns false if the receiver is gone, the reply is dropped, or nothing
    /// arrives within `timeout`.
    pub async fn request_credential_refresh(&self, timeout: Duration) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(DownloadEvent::CredentialRefreshRequested(RefreshReply(reply_tx)))
            .is_err()
        {
            return false;
        }
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => {
                log::warn!("Credential refresh request dropped without an answer");
                false
            }
            Err(_) => {
                log::warn!("No answer to the credential refresh request within {:?}", timeout);
                false
            }
        }
    }
}

//! Retry logic for one logical download (a single video or a whole playlist).
//!
//! Failures are split in two:
//! - transient failures are retried up to `max_retries` with a fixed delay
//! - credential failures go to the playlist fallback (playlist URLs) or to a
//!   credential refresh followed by exactly one more attempt
//!
//! The refreshed attempt is a bonus on top of the regular retry loop and is
//! never followed by further retries. Callers rely on that bounded attempt
//! count, so keep the asymmetry.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::core::config;
use crate::download::ytdlp_errors::{is_cookie_expired, is_playlist_url};

/// Retry strategy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Fixed delay before each retry
    pub retry_delay: Duration,
    /// Ask the user to refresh credentials on a credential failure
    pub cookie_refresh_enabled: bool,
    /// Fall back to per-video downloads when a playlist fails on credentials
    pub individual_download_on_playlist_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: config::retry::DEFAULT_MAX_RETRIES,
            retry_delay: config::retry::default_retry_delay(),
            cookie_refresh_enabled: true,
            individual_download_on_playlist_failure: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Sets the delay between retries.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Disables the credential refresh request.
    #[must_use]
    pub fn no_cookie_refresh(mut self) -> Self {
        self.cookie_refresh_enabled = false;
        self
    }

    /// Disables the per-video playlist fallback.
    #[must_use]
    pub fn no_playlist_fallback(mut self) -> Self {
        self.individual_download_on_playlist_failure = false;
        self
    }

    /// Policy equivalent of the user-facing retry switches: disabling retry
    /// means zero retries.
    pub fn from_switches(enable_retry: bool, max_retries: u32, enable_individual: bool) -> Self {
        Self {
            max_retries: if enable_retry { max_retries } else { 0 },
            individual_download_on_playlist_failure: enable_individual,
            ..Self::default()
        }
    }
}

/// Counters for one orchestrated call. Never shared between calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryAttemptState {
    /// Retries performed (the first attempt is not a retry)
    pub retry_count: u32,
    /// Operation invocations, including the first
    pub attempts: u32,
    /// A credential refresh was granted during this call
    pub refreshed: bool,
}

/// States the orchestrator moves through, recorded in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    Retrying,
    RefreshingCredential,
    ExpandingPlaylist,
    Succeeded,
    Failed,
}

/// How the orchestrated call ended.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded(T),
    /// The playlist fallback ran; `succeeded` is its own verdict
    PlaylistFallback { succeeded: bool },
    /// Last error seen
    Failed(E),
}

/// Result of an orchestrated call.
#[derive(Debug)]
pub struct RetryRun<T, E> {
    pub outcome: RetryOutcome<T, E>,
    pub state: RetryAttemptState,
    /// Every state entered, in order
    pub trace: Vec<RetryState>,
    /// Total time spent, delays included
    pub total_duration: Duration,
}

impl<T, E> RetryRun<T, E> {
    /// Returns true if the download (or its playlist fallback) succeeded.
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            RetryOutcome::Succeeded(_) | RetryOutcome::PlaylistFallback { succeeded: true }
        )
    }
}

/// Classifies failures for the orchestrator.
pub trait Retryable: std::fmt::Display {
    /// Returns true if the failure means credentials are missing or expired.
    fn is_credential_error(&self) -> bool {
        is_cookie_expired(&self.to_string())
    }

    /// Returns true if the failure must end orchestration at once
    /// (validation errors, cancellation).
    fn is_fatal(&self) -> bool {
        false
    }
}

impl Retryable for String {}

impl Retryable for std::io::Error {}

impl Retryable for anyhow::Error {}

/// Collaborators the orchestrator calls out to.
#[async_trait]
pub trait RetryHooks: Send + Sync {
    /// Called before each retry with the new retry count and the reason.
    fn on_retry_attempt(&self, _retry_count: u32, _reason: &str) {}

    /// Asks the user to refresh credentials. `false` means declined.
    async fn request_credential_refresh(&self) -> bool {
        false
    }

    /// Downloads a playlist video by video. Returns true if at least one succeeded.
    async fn download_playlist_individually(&self, _url: &str) -> bool {
        false
    }
}

/// Hooks that decline everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl RetryHooks for NoHooks {}

/// Drives one logical download through the retry policy.
#[derive(Debug, Clone, Default)]
pub struct RetryOrchestrator {
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn pause(&self) {
        if !self.policy.retry_delay.is_zero() {
            tokio::time::sleep(self.policy.retry_delay).await;
        }
    }

    /// Runs `operation` for `url` until it succeeds or the policy gives up.
    pub async fn execute<F, Fut, T, E, H>(&self, url: &str, hooks: &H, mut operation: F) -> RetryRun<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
        H: RetryHooks + ?Sized,
    {
        let start = Instant::now();
        let mut state = RetryAttemptState::default();
        let mut trace = Vec::new();

        let finish = |outcome: RetryOutcome<T, E>, state: RetryAttemptState, mut trace: Vec<RetryState>| {
            trace.push(match outcome {
                RetryOutcome::Failed(_) | RetryOutcome::PlaylistFallback { succeeded: false } => RetryState::Failed,
                _ => RetryState::Succeeded,
            });
            RetryRun {
                outcome,
                state,
                trace,
                total_duration: start.elapsed(),
            }
        };

        let err = loop {
            trace.push(RetryState::Attempting);
            state.attempts += 1;

            let err = match operation().await {
                Ok(value) => return finish(RetryOutcome::Succeeded(value), state, trace),
                Err(e) => e,
            };

            if err.is_fatal() {
                log::debug!("Attempt {} ended with a fatal error: {}", state.attempts, err);
                return finish(RetryOutcome::Failed(err), state, trace);
            }

            if err.is_credential_error() {
                break err;
            }

            if state.retry_count >= self.policy.max_retries {
                log::error!(
                    "All {} attempt(s) failed for {}: {}",
                    state.attempts,
                    url,
                    err
                );
                return finish(RetryOutcome::Failed(err), state, trace);
            }

            state.retry_count += 1;
            trace.push(RetryState::Retrying);
            log::warn!(
                "Attempt {}/{} failed (retrying in {:?}): {}",
                state.attempts,
                self.policy.max_retries + 1,
                self.policy.retry_delay,
                err
            );
            hooks.on_retry_attempt(state.retry_count, &err.to_string());
            self.pause().await;
        };

        log::warn!("🍪 Credential failure for {}: {}", url, err);

        if is_playlist_url(url) && self.policy.individual_download_on_playlist_failure {
            trace.push(RetryState::ExpandingPlaylist);
            log::info!("📋 Falling back to individual downloads for {}", url);
            let succeeded = hooks.download_playlist_individually(url).await;
            return finish(RetryOutcome::PlaylistFallback { succeeded }, state, trace);
        }

        if !self.policy.cookie_refresh_enabled {
            return finish(RetryOutcome::Failed(err), state, trace);
        }

        trace.push(RetryState::RefreshingCredential);
        let refreshed = hooks.request_credential_refresh().await;
        if !refreshed || state.retry_count >= self.policy.max_retries {
            log::info!(
                "Credential refresh {} (retries used: {}/{})",
                if refreshed { "granted but no retries left" } else { "declined" },
                state.retry_count,
                self.policy.max_retries
            );
            return finish(RetryOutcome::Failed(err), state, trace);
        }

        // One extra attempt with fresh credentials; whatever it returns is final
        state.retry_count += 1;
        state.refreshed = true;
        trace.push(RetryState::Retrying);
        hooks.on_retry_attempt(state.retry_count, "retry after cookie refresh");
        self.pause().await;

        trace.push(RetryState::Attempting);
        state.attempts += 1;
        match operation().await {
            Ok(value) => finish(RetryOutcome::Succeeded(value), state, trace),
            Err(e) => {
                log::error!("Attempt after credential refresh failed for {}: {}", url, e);
                finish(RetryOutcome::Failed(e), state, trace)
            }
        }
    }
}

//! Top-level download coordinator.
//!
//! `DownloadManager` owns a dedicated worker thread running a single-threaded
//! tokio runtime. `start` validates the request and schedules the download
//! task on that runtime; everything the task has to report goes out as
//! [`DownloadEvent`](crate::download::events::DownloadEvent)s. `stop` is
//! synchronous: it kills the process tree before returning, whatever the
//! worker is doing at that moment.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::retry::{RetryHooks, RetryOrchestrator, RetryOutcome, RetryPolicy, Retryable};
use crate::download::builder::{CredentialSource, DownloadArgsBuilder};
use crate::download::error::DownloadError;
use crate::download::events::{EventReceiver, EventSink, SessionEnd};
use crate::download::phase::{LineEvent, PhaseDetector};
use crate::download::playlist::PlaylistExpander;
use crate::download::preflight::{check_if_cookies_needed, ProbeVerdict};
use crate::download::process::{Launcher, LineRead, ProcessController, ProcessHandle};
use crate::download::session::{SessionExit, SessionGuard, SessionSnapshot, SharedSession};
use crate::download::ytdlp_errors::credential_guidance;

/// Everything the manager needs from its environment.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub launcher: Launcher,
    pub cookie_file: PathBuf,
    pub cookies_browser: String,
    /// Run the members-only probe when no credentials are configured
    pub preflight: bool,
    /// `None` keeps the controller's default name sweep
    pub sweep_targets: Option<Vec<String>>,
    pub poll_interval: Duration,
    pub graceful_timeout: Duration,
    pub settle_delay: Duration,
    pub refresh_timeout: Duration,
    pub probe_timeout: Duration,
    pub playlist_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            launcher: Launcher::new(config::YTDL_BIN.as_str()).with_args(config::YTDL_BIN_ARGS.clone()),
            cookie_file: config::cookie_file_path(),
            cookies_browser: config::YTDL_COOKIES_BROWSER.clone(),
            preflight: true,
            sweep_targets: None,
            poll_interval: config::process::READ_POLL_INTERVAL,
            graceful_timeout: config::process::GRACEFUL_TERMINATE_TIMEOUT,
            settle_delay: config::process::KILL_SETTLE_DELAY,
            refresh_timeout: config::credentials::REFRESH_RESPONSE_TIMEOUT,
            probe_timeout: config::download::PROBE_TIMEOUT,
            playlist_timeout: config::download::PLAYLIST_TIMEOUT,
        }
    }
}

impl ManagerConfig {
    fn controller(&self) -> ProcessController {
        let controller = ProcessController::new(self.launcher.clone())
            .poll_interval(self.poll_interval)
            .graceful_timeout(self.graceful_timeout)
            .settle_delay(self.settle_delay);
        match &self.sweep_targets {
            Some(targets) if targets.is_empty() => controller.without_sweep(),
            Some(targets) => controller.with_sweep_targets(targets.clone()),
            None => controller,
        }
    }
}

/// One download as requested by the user.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub target_dir: PathBuf,
    /// User-facing quality such as "720p (HD)"
    pub quality: String,
    pub use_browser_cookies: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            target_dir: target_dir.into(),
            quality: format!("{}p", config::download::DEFAULT_QUALITY_HEIGHT),
            use_browser_cookies: false,
        }
    }

    #[must_use]
    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    #[must_use]
    pub fn browser_cookies(mut self, enabled: bool) -> Self {
        self.use_browser_cookies = enabled;
        self
    }

    fn validate(&self) -> Result<(), DownloadError> {
        if self.url.trim().is_empty() {
            return Err(DownloadError::Validation("Please enter a video URL".to_string()));
        }
        if self.url.trim_start().starts_with('-') {
            return Err(DownloadError::Validation(format!("Not a video URL: {}", self.url.trim())));
        }
        if self.target_dir.as_os_str().is_empty() || self.target_dir.to_string_lossy().trim().is_empty() {
            return Err(DownloadError::Validation("Please select a download folder".to_string()));
        }
        if !self.target_dir.is_dir() {
            return Err(DownloadError::Validation(format!(
                "Download folder does not exist: {}",
                self.target_dir.display()
            )));
        }
        Ok(())
    }
}

struct Worker {
    handle: Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn start() -> AppResult<Self> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("ytgrab-worker".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        log::error!("Failed to build worker runtime: {}", e);
                        return;
                    }
                };
                if handle_tx.send(runtime.handle().clone()).is_err() {
                    return;
                }
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                log::debug!("Worker runtime shut down");
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|_| AppError::Validation("Download worker failed to start".to_string()))?;

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Download worker thread panicked");
            }
        }
    }
}

/// Coordinates one download session at a time.
pub struct DownloadManager {
    config: Arc<ManagerConfig>,
    controller: ProcessController,
    session: SharedSession,
    events: EventSink,
    policy: Arc<Mutex<RetryPolicy>>,
    worker: Worker,
}

impl DownloadManager {
    /// Starts the worker thread. Events for every session arrive on the returned receiver.
    pub fn new(config: ManagerConfig) -> AppResult<(Self, EventReceiver)> {
        let worker = Worker::start()?;
        let (events, rx) = EventSink::channel();
        let controller = config.controller();
        log::info!(
            "Download manager ready ({}, kill strategy {:?})",
            controller.launcher(),
            controller.strategy()
        );
        Ok((
            Self {
                config: Arc::new(config),
                controller,
                session: SharedSession::new(),
                events,
                policy: Arc::new(Mutex::new(RetryPolicy::default())),
                worker,
            },
            rx,
        ))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn is_downloading(&self) -> bool {
        self.session.is_downloading()
    }

    fn current_policy(&self) -> RetryPolicy {
        self.policy.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Replaces the retry policy. Applies from the next `start`.
    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        *self.policy.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = policy;
    }

    /// Applies the user-facing retry switches, keeping delay and refresh settings.
    pub fn update_retry_config(&self, enable_retry: bool, max_retries: u32, enable_individual: bool) {
        let mut policy = self.policy.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let switches = RetryPolicy::from_switches(enable_retry, max_retries, enable_individual);
        policy.max_retries = switches.max_retries;
        policy.individual_download_on_playlist_failure = switches.individual_download_on_playlist_failure;
        log::info!(
            "Retry config updated: max_retries={}, individual_download={}",
            policy.max_retries,
            policy.individual_download_on_playlist_failure
        );
    }

    /// Validates the request and schedules the download. Returns immediately;
    /// the outcome arrives as events.
    pub fn start(&self, request: DownloadRequest) -> Result<(), DownloadError> {
        request.validate()?;
        let (generation, stop) = self.session.begin()?;
        log::info!("📥 Download requested: {} -> {}", request.url, request.target_dir.display());
        self.events.status("Starting download...");

        let context = SessionContext {
            config: Arc::clone(&self.config),
            controller: self.controller.clone(),
            session: self.session.clone(),
            events: self.events.clone(),
            generation,
            stop,
            request,
        };
        let policy = self.current_policy();
        let task = self.worker.handle.spawn(async move {
            let _guard = SessionGuard::new(context.session.clone(), generation);
            context.run(policy).await;
        });
        self.session.set_task(generation, task.abort_handle());
        Ok(())
    }

    /// Stops the running download. Kills the process tree before returning.
    /// Safe to call when idle and safe to call repeatedly.
    pub fn stop(&self) {
        let targets = self.session.request_stop();
        if !targets.was_downloading {
            self.session.reset_after_stop();
            log::debug!("Stop requested while idle");
            return;
        }

        log::info!("⏹️ Stop requested (pid {:?})", targets.process_id);
        if targets.process_id.is_some() || targets.process.is_some() {
            let report = self
                .controller
                .terminate_immediately(targets.process_id, targets.process.as_ref());
            self.events.status(report.status_message());
        }

        if let Some(task) = targets.task {
            if !task.is_finished() {
                task.abort();
            }
        }

        if let Some(process) = targets.process {
            let controller = self.controller.clone();
            self.worker.handle.spawn(async move {
                if let Err(e) = controller.terminate_gracefully(&process).await {
                    e.log("follow-up termination");
                }
            });
        }

        self.session.reset_after_stop();
        self.events.status("Download stopped");
        self.events.finished(SessionEnd::Stopped);
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        if self.session.is_downloading() {
            self.stop();
        }
    }
}

/// State of one session, shared by the download task and the retry hooks.
struct SessionContext {
    config: Arc<ManagerConfig>,
    controller: ProcessController,
    session: SharedSession,
    events: EventSink,
    generation: u64,
    stop: CancellationToken,
    request: DownloadRequest,
}

impl SessionContext {
    fn stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    fn credentials(&self) -> CredentialSource {
        CredentialSource::resolve(
            self.request.use_browser_cookies,
            &self.config.cookies_browser,
            &self.config.cookie_file,
        )
    }

    async fn run(&self, policy: RetryPolicy) {
        let url = self.request.url.trim().to_string();
        let orchestrator = RetryOrchestrator::new(policy);
        let target = url.as_str();
        let run = orchestrator.execute(target, self, move || self.attempt(target)).await;
        log::info!(
            "Download of {} ended after {} attempt(s) in {:?}: {:?}",
            url,
            run.state.attempts,
            run.total_duration,
            run.trace.last()
        );

        let stop_requested = match self.session.conclude(self.generation) {
            SessionExit::AlreadyEnded => return,
            SessionExit::Owned { stop_requested } => stop_requested,
        };
        if stop_requested {
            self.events.status("Download stopped");
            self.events.finished(SessionEnd::Stopped);
            return;
        }

        match run.outcome {
            RetryOutcome::Succeeded(()) | RetryOutcome::PlaylistFallback { succeeded: true } => {
                self.events.success();
                self.events.status("Download complete!");
                self.events.finished(SessionEnd::Completed);
            }
            RetryOutcome::PlaylistFallback { succeeded: false } => {
                self.events.error("No video from the playlist could be downloaded");
                self.events.finished(SessionEnd::Failed);
            }
            RetryOutcome::Failed(e) => {
                if e.is_credential_error() {
                    self.events.error(format!("{}\n\n{}", e, credential_guidance()));
                } else {
                    self.events.error(format!("Download failed: {}", e));
                }
                self.events.finished(SessionEnd::Failed);
            }
        }
    }

    /// One yt-dlp run for `url`, from argument construction to exit status.
    async fn attempt(&self, url: &str) -> Result<(), DownloadError> {
        if self.stopped() {
            return Err(DownloadError::Cancelled);
        }

        let credentials = self.credentials();
        log::info!("Using {}", credentials.describe());
        if credentials == CredentialSource::None && self.config.preflight {
            self.events.status("Checking video access...");
            match check_if_cookies_needed(self.controller.launcher(), url, self.config.probe_timeout).await {
                ProbeVerdict::Proceed => {}
                ProbeVerdict::ProceedWithWarning(warning) => self.events.status(warning),
                ProbeVerdict::CredentialRequired(detail) => {
                    return Err(DownloadError::CredentialRequired(if detail.is_empty() {
                        "This video requires sign-in".to_string()
                    } else {
                        detail
                    }));
                }
            }
            if self.stopped() {
                return Err(DownloadError::Cancelled);
            }
        }

        let args = DownloadArgsBuilder::new(url, self.request.target_dir.as_path())
            .quality(&self.request.quality)
            .credentials(credentials)
            .build();

        let (process, mut lines) = self.controller.spawn(&args)?;
        self.session.attach_process(self.generation, &process);
        if self.stopped() {
            // stop() ran between spawn and attach and could not see this process
            self.teardown(&process).await;
            return Err(DownloadError::Cancelled);
        }
        self.events.status("Downloading...");

        let mut detector = PhaseDetector::with_phase(self.session.snapshot().phase);
        let mut last_meaningful = String::new();
        loop {
            match lines.next_line(&self.stop).await {
                LineRead::Line(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event = detector.observe(&line);
                    self.session.set_phase(self.generation, detector.phase());
                    match event {
                        LineEvent::Progress(update) => {
                            if !self.stopped() {
                                self.events.progress(update.percent, update.label());
                            }
                        }
                        LineEvent::Merging => {
                            if !self.stopped() {
                                self.events.status("Merging video and audio...");
                            }
                        }
                        LineEvent::CredentialError => {
                            log::warn!("🍪 Credential error in downloader output: {}", line);
                            self.events.error(format!("{}\n\n{}", line.trim(), credential_guidance()));
                            self.stop.cancel();
                        }
                        LineEvent::Other => {
                            if !line.starts_with("[download]") {
                                last_meaningful = line.trim().to_string();
                            }
                        }
                    }
                }
                LineRead::Tick => continue,
                LineRead::Cancelled => {
                    self.teardown(&process).await;
                    return Err(DownloadError::Cancelled);
                }
                LineRead::Closed => break,
            }
        }

        let status = process.wait().await;
        self.session.detach_process(self.generation);
        if self.stopped() {
            return Err(DownloadError::Cancelled);
        }
        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                let reason = if last_meaningful.is_empty() {
                    "no output".to_string()
                } else {
                    last_meaningful
                };
                Err(DownloadError::Process(format!("yt-dlp exited with code {}: {}", code, reason)))
            }
            Err(e) => Err(DownloadError::Other(format!("Could not get downloader exit status: {}", e))),
        }
    }

    async fn teardown(&self, process: &ProcessHandle) {
        if let Err(e) = self.controller.terminate_gracefully(process).await {
            e.log("session teardown");
        }
        self.session.detach_process(self.generation);
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}...", head)
    }
}

#[async_trait]
impl RetryHooks for SessionContext {
    fn on_retry_attempt(&self, retry_count: u32, reason: &str) {
        if !self.stopped() {
            self.events
                .status(format!("Retrying ({}): {}", retry_count, truncate_chars(reason, 50)));
        }
    }

    async fn request_credential_refresh(&self) -> bool {
        if self.stopped() {
            return false;
        }
        self.events.status("Cookies may have expired. Waiting for a cookie refresh...");
        self.events.request_credential_refresh(self.config.refresh_timeout).await
    }

    async fn download_playlist_individually(&self, url: &str) -> bool {
        self.events.status("Fetching video list from playlist...");
        let expander = PlaylistExpander::new(self.controller.launcher().clone())
            .credentials(self.credentials())
            .timeout(self.config.playlist_timeout);

        let entries = match expander.extract_video_info(url).await {
            Ok(entries) if entries.is_empty() => {
                self.events.error("The playlist has no downloadable videos");
                return false;
            }
            Ok(entries) => entries,
            Err(e) => {
                self.events.error(format!("Could not get video list: {}", e));
                return false;
            }
        };

        let total = entries.len();
        self.events
            .status(format!("Found {} videos, downloading them one by one...", total));

        let mut succeeded = 0;
        for (index, entry) in entries.iter().enumerate() {
            if self.stopped() {
                break;
            }
            let title = if entry.title.is_empty() { entry.url.as_str() } else { entry.title.as_str() };
            self.events
                .status(format!("Video {}/{}: {}", index + 1, total, truncate_chars(title, 30)));
            match self.attempt(&entry.url).await {
                Ok(()) => succeeded += 1,
                Err(DownloadError::Cancelled) => break,
                Err(e) => {
                    log::warn!("Playlist item {} failed: {}", entry.url, e);
                    self.events.error(format!("Video {}/{} failed: {}", index + 1, total, e));
                }
            }
        }

        if !self.stopped() {
            self.events.status(format!(
                "Individual downloads finished: {}/{} succeeded",
                succeeded, total
            ));
        }
        succeeded > 0
    }
}

/// Returns the folder to use when the caller has none: the last one, or the current directory.
pub fn default_target_dir(last: Option<&Path>) -> PathBuf {
    last.filter(|p| p.is_dir())
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_validation_messages() {
        let dir = tempfile::tempdir().unwrap();
        let blank_url = DownloadRequest::new("  ", dir.path());
        assert!(matches!(blank_url.validate(), Err(DownloadError::Validation(ref m)) if m.contains("URL")));

        let option_like = DownloadRequest::new("--exec=touch /tmp/owned", dir.path());
        assert!(matches!(option_like.validate(), Err(DownloadError::Validation(ref m)) if m.starts_with("Not a video URL")));

        let blank_dir = DownloadRequest::new("https://youtu.be/abc", "");
        assert!(matches!(blank_dir.validate(), Err(DownloadError::Validation(ref m)) if m.contains("folder")));

        let missing = DownloadRequest::new("https://youtu.be/abc", dir.path().join("nope"));
        assert!(matches!(missing.validate(), Err(DownloadError::Validation(ref m)) if m.contains("does not exist")));

        assert!(DownloadRequest::new("https://youtu.be/abc", dir.path()).validate().is_ok());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("ééééé", 3), "ééé...");
    }

    #[test]
    fn test_sweep_override() {
        let config = ManagerConfig {
            sweep_targets: Some(Vec::new()),
            ..ManagerConfig::default()
        };
        assert!(config.controller().sweep_targets().is_empty());

        let config = ManagerConfig {
            sweep_targets: Some(vec!["fake-dl".to_string()]),
            ..ManagerConfig::default()
        };
        assert_eq!(config.controller().sweep_targets(), ["fake-dl".to_string()]);
    }

    #[test]
    fn test_default_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(default_target_dir(Some(dir.path())), dir.path().to_path_buf());
        assert_ne!(default_target_dir(Some(&dir.path().join("gone"))), dir.path().join("gone"));
    }

    #[test]
    fn test_stop_while_idle_is_a_no_op() {
        let (manager, mut rx) = DownloadManager::new(ManagerConfig::default()).unwrap();
        manager.stop();
        manager.stop();
        assert!(!manager.is_downloading());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_update_retry_config_keeps_delay() {
        let (manager, _rx) = DownloadManager::new(ManagerConfig::default()).unwrap();
        manager.set_retry_policy(RetryPolicy::new().retry_delay(Duration::from_millis(10)));
        manager.update_retry_config(false, 5, false);
        let policy = manager.current_policy();
        assert_eq!(policy.max_retries, 0);
        assert!(!policy.individual_download_on_playlist_failure);
        assert_eq!(policy.retry_delay, Duration::from_millis(10));
    }
}

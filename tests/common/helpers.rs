//! Fake yt-dlp scripts and event collection for manager tests
//!
//! The fake downloader is a shell script run as `sh <script> <yt-dlp args>`,
//! so `$1` is the first yt-dlp argument and the URL is the last one.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use ytgrab::core::retry::RetryPolicy;
use ytgrab::download::{DownloadEvent, DownloadManager, EventReceiver, Launcher, ManagerConfig, SessionEnd};

/// A temp dir holding the fake downloader script; also used as download folder.
pub struct FakeDownloader {
    pub dir: TempDir,
    pub script: PathBuf,
}

impl FakeDownloader {
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-ytdlp.sh");
        std::fs::write(&script, body).unwrap();
        Self { dir, script }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path usable inside the script for state shared between runs
    pub fn state_file(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    pub fn config(&self) -> ManagerConfig {
        ManagerConfig {
            launcher: Launcher::new("sh").with_args(vec![self.script.to_string_lossy().into_owned()]),
            cookie_file: self.dir.path().join("no-cookies.txt"),
            cookies_browser: "firefox".to_string(),
            preflight: false,
            sweep_targets: Some(Vec::new()),
            poll_interval: Duration::from_millis(100),
            graceful_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_millis(100),
            refresh_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(10),
            playlist_timeout: Duration::from_secs(10),
        }
    }
}

/// Manager over the fake downloader with a zero retry delay.
pub fn fake_manager(fake: &FakeDownloader) -> (DownloadManager, EventReceiver) {
    manager_with(fake.config())
}

pub fn manager_with(config: ManagerConfig) -> (DownloadManager, EventReceiver) {
    let (manager, rx) = DownloadManager::new(config).unwrap();
    manager.set_retry_policy(RetryPolicy::new().retry_delay(Duration::ZERO));
    (manager, rx)
}

/// How to answer credential refresh requests while collecting.
#[derive(Debug, Clone, Copy)]
pub enum Refresh {
    Grant,
    Decline,
}

/// Simplified event for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Progress(f64, String),
    Status(String),
    Error(String),
    Success,
    RefreshRequested,
    Finished(SessionEnd),
}

impl Seen {
    pub fn is_status(&self, text: &str) -> bool {
        matches!(self, Seen::Status(s) if s.contains(text))
    }

    pub fn is_error(&self, text: &str) -> bool {
        matches!(self, Seen::Error(s) if s.contains(text))
    }
}

/// Receives events until `Finished`, answering refresh requests as told.
pub async fn collect_until_finished(rx: &mut EventReceiver, refresh: Refresh) -> Vec<Seen> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for download events")
            .expect("event channel closed");
        match event {
            DownloadEvent::Progress { percent, label } => seen.push(Seen::Progress(percent, label)),
            DownloadEvent::Status(s) => seen.push(Seen::Status(s)),
            DownloadEvent::Error(s) => seen.push(Seen::Error(s)),
            DownloadEvent::Success => seen.push(Seen::Success),
            DownloadEvent::CredentialRefreshRequested(reply) => {
                seen.push(Seen::RefreshRequested);
                reply.send(matches!(refresh, Refresh::Grant));
            }
            DownloadEvent::Finished(end) => {
                seen.push(Seen::Finished(end));
                return seen;
            }
        }
    }
}

/// Waits until the manager reports a live process id.
pub async fn wait_for_pid(manager: &DownloadManager) -> u32 {
    for _ in 0..200 {
        if let Some(pid) = manager.snapshot().process_id {
            return pid;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("download process never started");
}

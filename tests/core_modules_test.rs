//! Integration tests for core modules (retry orchestration, output parsing, URL checks)
//!
//! Run with: cargo test --test core_modules_test

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Retry Orchestrator Tests
// ============================================================================

mod retry_tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use ytgrab::core::retry::{RetryHooks, RetryOrchestrator, RetryOutcome, RetryPolicy};
    use ytgrab::download::DownloadError;

    #[derive(Default)]
    struct RecordingHooks {
        notifications: Mutex<Vec<(u32, String)>>,
        playlist_calls: Mutex<Vec<String>>,
        refresh_answer: bool,
    }

    #[async_trait]
    impl RetryHooks for RecordingHooks {
        fn on_retry_attempt(&self, retry_count: u32, reason: &str) {
            self.notifications.lock().unwrap().push((retry_count, reason.to_string()));
        }

        async fn request_credential_refresh(&self) -> bool {
            self.refresh_answer
        }

        async fn download_playlist_individually(&self, url: &str) -> bool {
            self.playlist_calls.lock().unwrap().push(url.to_string());
            true
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::new().retry_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_two_transient_failures_then_success() {
        let hooks = RecordingHooks::default();
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let run = RetryOrchestrator::new(quick_policy())
            .execute("https://youtu.be/abc", &hooks, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DownloadError::Process("yt-dlp exited with code 1: connection reset".into()))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(run.is_success());
        assert_eq!(run.state.retry_count, 2);
        let counts: Vec<u32> = hooks.notifications.lock().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(counts, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_retry_count_never_exceeds_bound() {
        let hooks = RecordingHooks::default();
        let run = RetryOrchestrator::new(quick_policy().max_retries(3))
            .execute("https://youtu.be/abc", &hooks, || async {
                Err::<(), _>(DownloadError::Process("network unreachable".into()))
            })
            .await;

        assert!(matches!(run.outcome, RetryOutcome::Failed(_)));
        assert_eq!(run.state.retry_count, 3);
        assert_eq!(run.state.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playlist_credential_failure_goes_straight_to_fallback() {
        let hooks = RecordingHooks::default();
        let url = "https://www.youtube.com/watch?v=abc&list=XYZ";
        let started = tokio::time::Instant::now();
        let run = RetryOrchestrator::new(RetryPolicy::new().retry_delay(Duration::from_secs(5)))
            .execute(url, &hooks, || async {
                Err::<(), _>(DownloadError::Process("ERROR: HTTP Error 403: Forbidden".into()))
            })
            .await;

        assert!(matches!(run.outcome, RetryOutcome::PlaylistFallback { succeeded: true }));
        assert_eq!(*hooks.playlist_calls.lock().unwrap(), vec![url.to_string()]);
        assert!(hooks.notifications.lock().unwrap().is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_refresh_grants_exactly_one_extra_attempt() {
        let hooks = RecordingHooks {
            refresh_answer: true,
            ..Default::default()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let run = RetryOrchestrator::new(quick_policy())
            .execute("https://youtu.be/abc", &hooks, || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DownloadError::CredentialRequired("Sign in to confirm your age".into()))
                }
            })
            .await;

        assert!(matches!(run.outcome, RetryOutcome::Failed(DownloadError::CredentialRequired(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(run.state.refreshed);
    }
}

// ============================================================================
// Output Parsing Tests
// ============================================================================

mod phase_tests {
    use pretty_assertions::assert_eq;
    use ytgrab::download::phase::{detect_phase, is_credential_error_line, parse_progress, PhaseTransition};
    use ytgrab::download::{Phase, PhaseDetector};

    #[test]
    fn test_audio_extension_wins_regardless_of_previous_phase() {
        for previous in [Phase::Preparing, Phase::Video, Phase::Merging] {
            let mut detector = PhaseDetector::with_phase(previous);
            detector.observe("[download] Destination: clip.f140.m4a");
            assert_eq!(detector.phase(), Phase::Audio);
        }
    }

    #[test]
    fn test_size_line_keeps_phase_knowledge() {
        let mut detector = PhaseDetector::new();
        detector.observe("[download] Destination: clip.f137.mp4");
        detector.observe("[download] 100% of 45.3MiB");
        assert_eq!(detector.phase(), Phase::Video);
        assert_eq!(detect_phase("[download] 100% of 45.3MiB"), PhaseTransition::Unchanged);
    }

    #[test]
    fn test_percent_is_not_clamped() {
        assert_eq!(parse_progress("[download] 150.0% of 1.00MiB").map(|p| p.0), Some(150.0));
    }

    #[test]
    fn test_bare_video_unavailable_is_not_a_credential_error() {
        assert!(!is_credential_error_line("ERROR: [youtube] abc: Video unavailable"));
        assert!(is_credential_error_line("ERROR: Video unavailable. This video is private"));
        assert!(is_credential_error_line("ERROR: Video unavailable. Sign in to confirm"));
        assert!(is_credential_error_line("Video unavailable: members only"));
    }
}

// ============================================================================
// URL and Error Classification Tests
// ============================================================================

mod classification_tests {
    use ytgrab::download::ytdlp_errors::{is_cookie_expired, is_playlist_url, is_valid_video_url};

    #[test]
    fn test_playlist_urls() {
        assert!(is_playlist_url("https://www.youtube.com/watch?v=abc&list=XYZ"));
        assert!(is_playlist_url("https://music.youtube.com/playlist?list=XYZ"));
        assert!(!is_playlist_url("https://youtu.be/abc"));
    }

    #[test]
    fn test_video_url_validator() {
        assert!(is_valid_video_url("https://m.youtube.com/watch?v=abc"));
        assert!(!is_valid_video_url("ftp://youtube.com/watch?v=abc"));
        assert!(!is_valid_video_url("https://evil-youtube.com/watch?v=abc"));
    }

    #[test]
    fn test_cookie_expiry_classification() {
        assert!(is_cookie_expired("ERROR: HTTP Error 403: Forbidden"));
        assert!(is_cookie_expired("The provided YouTube account cookies are no longer valid. Cookies have expired"));
        assert!(!is_cookie_expired("ERROR: Video unavailable"));
        assert!(!is_cookie_expired("ERROR: Unable to download webpage: timed out"));
    }
}

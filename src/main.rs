use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::io::Write;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};

use ytgrab::cli::{Cli, Commands, CookiesAction, SettingsAction};
use ytgrab::core::{config, init_logger, log_cookies_configuration, Settings};
use ytgrab::download::cookies::{diagnose_cookies_content, CookieStore};
use ytgrab::download::manager::default_target_dir;
use ytgrab::download::{DownloadEvent, DownloadManager, DownloadRequest, ManagerConfig, RefreshReply, SessionEnd};

/// Main entry point
///
/// Parses CLI arguments and dispatches to the subcommand.
fn main() -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(run());
    // A refresh prompt may still be blocked on stdin; it must not hold the exit
    runtime.shutdown_background();
    result
}

async fn run() -> Result<ExitCode> {
    // Load environment variables from .env if present
    let _ = dotenv();

    let cli = Cli::parse_args();
    init_logger(std::path::Path::new(config::LOG_FILE_PATH.as_str()), cli.verbose)?;

    let settings_path = config::settings_file_path();
    let mut settings = Settings::load(&settings_path);
    let store = CookieStore::default();

    match cli.command {
        Commands::Download {
            url,
            dir,
            quality,
            browser_cookies,
            max_retries,
            no_retry,
            no_playlist_fallback,
        } => {
            let use_browser = browser_cookies || settings.get_cookies_from_browser;
            log_cookies_configuration(&store, use_browser);

            let target_dir = dir.unwrap_or_else(|| default_target_dir(settings.last_save_folder.as_deref()));
            let request = DownloadRequest::new(url, target_dir.clone())
                .quality(quality.unwrap_or_else(|| settings.quality_default.clone()))
                .browser_cookies(use_browser);

            let (manager, events) = DownloadManager::new(ManagerConfig {
                cookie_file: store.path().to_path_buf(),
                ..ManagerConfig::default()
            })?;
            // Command-line overrides apply to this run only
            let effective = Settings {
                enable_retry: settings.enable_retry && !no_retry,
                max_retries: max_retries.unwrap_or(settings.max_retries),
                enable_individual_download: settings.enable_individual_download && !no_playlist_fallback,
                ..settings.clone()
            };
            manager.set_retry_policy(effective.retry_policy());

            if let Err(e) = manager.start(request) {
                eprintln!("❌ {}", e);
                return Ok(ExitCode::FAILURE);
            }

            settings.last_save_folder = Some(target_dir);
            if let Err(e) = settings.save(&settings_path) {
                log::warn!("Could not save settings: {}", e);
            }

            let end = drive(&manager, events).await;
            Ok(match end {
                SessionEnd::Completed => ExitCode::SUCCESS,
                SessionEnd::Failed => ExitCode::FAILURE,
                SessionEnd::Stopped => ExitCode::from(130),
            })
        }
        Commands::Cookies { action } => {
            match action {
                CookiesAction::Set { file } => {
                    let diagnostic = store
                        .import(&file)
                        .with_context(|| format!("Failed to import {}", file.display()))?;
                    println!("✅ Saved {} cookies to {}", diagnostic.total_cookies, store.path().display());
                    for issue in &diagnostic.issues {
                        println!("⚠️  {}", issue);
                    }
                }
                CookiesAction::Show => match store.load()? {
                    Some(content) => {
                        let diagnostic = diagnose_cookies_content(&content);
                        println!("🍪 {}", store.path().display());
                        println!(
                            "   {} cookies, {} for YouTube/Google",
                            diagnostic.total_cookies, diagnostic.youtube_cookies
                        );
                        for issue in &diagnostic.issues {
                            println!("⚠️  {}", issue);
                        }
                    }
                    None => println!("No cookie file at {}", store.path().display()),
                },
                CookiesAction::Clear => {
                    if store.clear()? {
                        println!("🗑️ Cookie file removed");
                    } else {
                        println!("No cookie file to remove");
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Settings { action } => {
            match action {
                SettingsAction::Show => {}
                SettingsAction::Retry {
                    enable,
                    max_retries,
                    individual_download,
                } => {
                    if let Some(enable) = enable {
                        settings.enable_retry = enable;
                    }
                    if let Some(max) = max_retries {
                        settings.max_retries = max;
                    }
                    if let Some(individual) = individual_download {
                        settings.enable_individual_download = individual;
                    }
                    settings.save(&settings_path)?;
                }
                SettingsAction::BrowserCookies { enabled } => {
                    settings.get_cookies_from_browser = enabled;
                    settings.save(&settings_path)?;
                }
                SettingsAction::Quality { quality } => {
                    settings.quality_default = quality;
                    settings.save(&settings_path)?;
                }
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Prints events until the session finishes. Ctrl-C stops the download.
async fn drive(manager: &DownloadManager, mut events: ytgrab::download::EventReceiver) -> SessionEnd {
    let mut last_label = String::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(DownloadEvent::Progress { label, .. }) => {
                    if label != last_label {
                        eprint!("\r\x1b[2K{}", label);
                        let _ = std::io::stderr().flush();
                        last_label = label;
                    }
                }
                Some(DownloadEvent::Status(message)) => {
                    eprintln!("\r\x1b[2K{}", message);
                }
                Some(DownloadEvent::Error(message)) => {
                    eprintln!("\r\x1b[2K❌ {}", message);
                }
                Some(DownloadEvent::Success) => {
                    eprintln!("\r\x1b[2K✅ Done");
                }
                Some(DownloadEvent::CredentialRefreshRequested(reply)) => {
                    tokio::spawn(ask_for_refresh(reply));
                }
                Some(DownloadEvent::Finished(end)) => return end,
                None => return SessionEnd::Failed,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                tokio::task::block_in_place(|| manager.stop());
            }
        }
    }
}

async fn ask_for_refresh(mut reply: RefreshReply) {
    eprintln!("\n🍪 Cookies look expired. Refresh them (e.g. `ytgrab cookies set <file>` in another terminal),");
    eprint!("   then type 'y' to retry or anything else to give up: ");
    let _ = std::io::stderr().flush();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let answer = tokio::select! {
        line = lines.next_line() => matches!(line, Ok(Some(ref l)) if l.trim().eq_ignore_ascii_case("y")),
        _ = reply.closed() => {
            eprintln!("\n⏱️  No answer in time, giving up on the refresh");
            return;
        }
    };
    reply.send(answer);
}

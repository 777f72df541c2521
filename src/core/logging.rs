//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - A startup report of which credential source downloads will use

use anyhow::Result;
use simplelog::*;
use std::path::Path;

use crate::core::config;
use crate::download::cookies::CookieStore;

const BANNER: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
/// * `verbose` - Show debug output on the console
pub fn init_logger(log_file_path: &Path, verbose: bool) -> Result<()> {
    if let Some(parent) = log_file_path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let log_file = fs_err::File::create(log_file_path)
        .map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    let console_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    CombinedLogger::init(vec![
        TermLogger::new(console_level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Debug, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Which credential source the next download will use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieSetup {
    Browser(String),
    File(std::path::PathBuf),
    Missing,
}

/// Works out the credential setup the same way a download resolves it:
/// browser first when enabled, then a non-empty cookie file.
pub fn cookie_setup(store: &CookieStore, use_browser: bool) -> CookieSetup {
    if use_browser && !config::YTDL_COOKIES_BROWSER.is_empty() {
        CookieSetup::Browser(config::YTDL_COOKIES_BROWSER.clone())
    } else if store.exists_non_empty() {
        CookieSetup::File(store.path().to_path_buf())
    } else {
        CookieSetup::Missing
    }
}

/// Logs the credential configuration at startup
pub fn log_cookies_configuration(store: &CookieStore, use_browser: bool) -> CookieSetup {
    log::info!("{}", BANNER);
    log::info!("🍪 Cookies Configuration Check");
    log::info!("{}", BANNER);

    let setup = cookie_setup(store, use_browser);
    match &setup {
        CookieSetup::Browser(browser) => {
            log::info!("✅ Cookies from browser: {}", browser);
        }
        CookieSetup::File(path) => {
            log::info!("✅ Cookies file: {}", path.display());
        }
        CookieSetup::Missing => {
            log::warn!("⚠️  No cookies configured ({} missing or empty)", store.path().display());
            log::warn!("   Public videos work; members-only and age-restricted ones will not.");
            log::warn!("💡 Export cookies.txt from your browser, then: ytgrab cookies set <file>");
        }
    }
    log::info!("{}", BANNER);
    setup
}

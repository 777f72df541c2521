use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ytgrab")]
#[command(author, version, about = "Download YouTube videos and playlists with yt-dlp", long_about = None)]
pub struct Cli {
    /// Show debug output on the console
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download a video or a playlist
    Download {
        /// Video or playlist URL
        url: String,

        /// Target folder (defaults to the last used folder, then the current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Quality such as "720p" (defaults to the saved setting)
        #[arg(short, long)]
        quality: Option<String>,

        /// Read cookies from the browser instead of the cookie file
        #[arg(long)]
        browser_cookies: bool,

        /// Override the saved retry count
        #[arg(long)]
        max_retries: Option<u32>,

        /// Disable retries for this run
        #[arg(long)]
        no_retry: bool,

        /// Do not fall back to per-video downloads when a playlist fails
        #[arg(long)]
        no_playlist_fallback: bool,
    },

    /// Manage the stored cookie file
    Cookies {
        #[command(subcommand)]
        action: CookiesAction,
    },

    /// Show or change saved settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CookiesAction {
    /// Import an exported cookies.txt
    Set { file: PathBuf },
    /// Show where the cookie file lives and what it contains
    Show,
    /// Delete the stored cookie file
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    /// Print the current settings as JSON
    Show,
    /// Change retry switches
    Retry {
        #[arg(long)]
        enable: Option<bool>,
        #[arg(long)]
        max_retries: Option<u32>,
        #[arg(long)]
        individual_download: Option<bool>,
    },
    /// Use browser cookies by default
    BrowserCookies { enabled: bool },
    /// Default quality, e.g. "720p"
    Quality { quality: String },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

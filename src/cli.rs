//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use webagent_core::CookieFormat;

/// Fetch a page the way a browser session would.
///
/// Follows redirects and refreshes per the config file, keeps cookies in an
/// optional cookie file across runs, and prints what it ended up with.
#[derive(Parser, Debug)]
#[command(name = "webagent")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// JSON agent configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cookie file loaded before the fetch and written back after it
    #[arg(long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Format of the cookie file
    #[arg(long, value_enum, default_value_t = CookieFileFormat::Netscape)]
    pub cookie_format: CookieFileFormat,

    /// Also write session cookies to the cookie file
    #[arg(long)]
    pub save_session: bool,

    /// URL to fetch
    pub url: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CookieFileFormat {
    Netscape,
    Json,
}

impl From<CookieFileFormat> for CookieFormat {
    fn from(format: CookieFileFormat) -> Self {
        match format {
            CookieFileFormat::Netscape => Self::Netscape,
            CookieFileFormat::Json => Self::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_url_only_parses_successfully() {
        let args = Args::try_parse_from(["webagent", "https://example.com/"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.url, "https://example.com/");
        assert_eq!(args.cookie_format, CookieFileFormat::Netscape);
        assert!(args.cookies.is_none());
        assert!(!args.save_session);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["webagent", "-vv", "http://h/"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_cookie_options() {
        let args = Args::try_parse_from([
            "webagent",
            "--cookies",
            "jar.json",
            "--cookie-format",
            "json",
            "--save-session",
            "http://h/",
        ])
        .unwrap();
        assert_eq!(args.cookies, Some(PathBuf::from("jar.json")));
        assert_eq!(CookieFormat::from(args.cookie_format), CookieFormat::Json);
        assert!(args.save_session);
    }

    #[test]
    fn test_cli_missing_url_rejected() {
        let err = Args::try_parse_from(["webagent"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_unknown_cookie_format_rejected() {
        let err = Args::try_parse_from(["webagent", "--cookie-format", "sqlite", "http://h/"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["webagent", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}

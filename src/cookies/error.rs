//! Errors raised while loading or saving a cookie jar.

#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// A Netscape entry that cannot become a cookie. `reason` never quotes
    /// the cookie value.
    #[error("line {line}: {reason}")]
    BadLine { line: usize, reason: String },

    #[error("cookie file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON cookie file: {0}")]
    Json(#[from] serde_json::Error),

    /// Every cookie line in the file was skipped.
    #[error("none of the {skipped} cookie lines could be used")]
    NoUsableLines { skipped: usize },
}

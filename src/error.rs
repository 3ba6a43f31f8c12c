use thiserror::Error;

/// Top-level failure taxonomy for the crawl core.
///
/// Only `BrowserStart` and non-timeout `Navigation` errors are fatal to a
/// task. Partial page renders, missing selectors and per-item extraction
/// problems degrade to smaller results instead of surfacing here.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("browser engine failed to start: {0}")]
    BrowserStart(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Per-item extraction failure. Items carrying one of these are counted and
/// skipped; they never abort the surrounding crawl.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("stable identifier missing")]
    MissingId,

    #[error("no plausible name found for listing {0}")]
    ImplausibleName(String),
}

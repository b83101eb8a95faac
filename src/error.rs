#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The identity provider answered with a non-success status.
    #[error("{operation} failed{}: {detail}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Provider {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[cfg(feature = "client")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Provider-side failure without an HTTP status (e.g. a missing session in a 200 body).
    pub(crate) fn provider(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Provider {
            operation,
            status: None,
            detail: detail.into(),
        }
    }
}

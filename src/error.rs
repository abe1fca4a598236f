use thiserror::Error;

/// Crate-level error enum.
///
/// `Cancelled` is deliberately its own variant: a caller-initiated abort must
/// be distinguishable from a real failure so it never surfaces as a
/// user-visible error state.
#[derive(Debug, Error)]
pub enum Error {
    /// Non-2xx response from the backend. `detail` is the human-readable
    /// message extracted from the JSON body, or the HTTP status line.
    #[error("{detail}")]
    Http { status: u16, detail: String },

    /// Network-level failure (connect, read, timeout).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The in-flight call was aborted via its cancellation token.
    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    /// Invalid submission (no valid slot, too many slots, no models).
    #[error("{0}")]
    Session(String),

    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when this error came from caller-initiated cancellation rather
    /// than a genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Build an `Http` error from a non-2xx response, preferring the JSON
    /// body's `detail` field over the bare status line.
    pub async fn from_response(response: reqwest::Response) -> Error {
        let status = response.status();
        let detail = response
            .text()
            .await
            .ok()
            .and_then(|body| serde_json::from_str::<serde_json::Value>(&body).ok())
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
            .unwrap_or_else(|| format!("HTTP {}", status));
        Error::Http { status: status.as_u16(), detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_displays_detail() {
        let err = Error::Http { status: 404, detail: "question not found".to_string() };
        assert_eq!(err.to_string(), "question not found");
    }

    #[test]
    fn test_cancelled_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
    }

    #[test]
    fn test_http_is_not_cancelled() {
        let err = Error::Http { status: 500, detail: "boom".to_string() };
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_config_error_displays_message() {
        let err = Error::Config("missing base_url".to_string());
        assert!(err.to_string().contains("missing base_url"));
    }

    #[test]
    fn test_serde_failure_converts_to_decode() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{broken").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().starts_with("unexpected response shape"));
    }
}

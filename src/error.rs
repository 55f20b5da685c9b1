use std::time::Duration;

use thiserror::Error;

pub type ReportResult<T> = std::result::Result<T, ReportError>;

/// Failures surfaced by the report core. Each variant maps to one IPC error code.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("no data: {0}")]
    NoData(String),

    #[error("render failed: {0}")]
    RenderFailure(String),

    #[error("render exceeded deadline of {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl ReportError {
    pub fn code(&self) -> &'static str {
        match self {
            ReportError::InvalidRange(_) => "bad_params",
            ReportError::NoData(_) => "not_found",
            ReportError::RenderFailure(_) => "render_failed",
            ReportError::Timeout(_) => "timeout",
        }
    }
}

impl From<std::io::Error> for ReportError {
    fn from(e: std::io::Error) -> Self {
        ReportError::RenderFailure(format!("io: {e}"))
    }
}

impl From<lopdf::Error> for ReportError {
    fn from(e: lopdf::Error) -> Self {
        ReportError::RenderFailure(format!("pdf: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_for_timeout_and_render_failure() {
        let t = ReportError::Timeout(Duration::from_millis(5));
        let r = ReportError::RenderFailure("x".into());
        assert_eq!(t.code(), "timeout");
        assert_eq!(r.code(), "render_failed");
        assert_eq!(t.to_string(), "render exceeded deadline of 5ms");
    }
}

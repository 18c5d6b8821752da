//! Error types for soundbake.
//!
//! Defines the error codes and the error type used throughout the crate
//! for consistent reporting. Failures are scoped: a source or tool error
//! aborts the affected track only, never the whole run.

use std::fmt;
use std::path::Path;

/// Error codes attached to every [`BakeError`].
///
/// The code decides how a failure is treated: whether a source request is
/// retried, and what hint the operator gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Generation service returned a non-success response.
    /// Trigger: HTTP 4xx other than 429, empty response body.
    SourceFailed,

    /// Generation service is throttling or temporarily down.
    /// Trigger: HTTP 429, HTTP 5xx.
    SourceUnavailable,

    /// Generation request did not complete in time or the connection dropped.
    /// Trigger: HTTP timeout, transport error.
    SourceTimeout,

    /// No API key could be resolved.
    /// Trigger: ELEVENLABS_API_KEY unset and no public/config.js entry.
    MissingApiKey,

    /// The audio tool binary could not be started.
    /// Trigger: ffmpeg/ffprobe not on PATH.
    ToolMissing,

    /// The audio tool exited abnormally.
    /// Trigger: non-zero exit status, unreadable input.
    ToolFailed,

    /// The audio tool exceeded its invocation timeout and was killed.
    ToolTimeout,

    /// A tool invocation succeeded but produced no audio.
    EmptyOutput,

    /// The merge plan cannot be applied to the segments.
    /// Trigger: overlap >= segment duration, zero segments.
    InvalidPlan,

    /// A segment lacks the fades overlap-mix depends on.
    UnfadedSegment,

    /// A cached segment required by assemble-only mode is absent.
    MissingSegment,

    /// The catalog file could not be read or parsed.
    InvalidCatalog,

    /// The pipeline was cancelled between steps.
    Cancelled,

    /// Filesystem error outside of tool invocations.
    Io,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SourceFailed => "SOURCE_FAILED",
            ErrorCode::SourceUnavailable => "SOURCE_UNAVAILABLE",
            ErrorCode::SourceTimeout => "SOURCE_TIMEOUT",
            ErrorCode::MissingApiKey => "MISSING_API_KEY",
            ErrorCode::ToolMissing => "TOOL_MISSING",
            ErrorCode::ToolFailed => "TOOL_FAILED",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
            ErrorCode::EmptyOutput => "EMPTY_OUTPUT",
            ErrorCode::InvalidPlan => "INVALID_PLAN",
            ErrorCode::UnfadedSegment => "UNFADED_SEGMENT",
            ErrorCode::MissingSegment => "MISSING_SEGMENT",
            ErrorCode::InvalidCatalog => "INVALID_CATALOG",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Io => "IO_ERROR",
        }
    }

    /// Returns true if a request failing with this code may succeed on retry.
    ///
    /// Only source-side failures are transient. Tool failures point at a
    /// configuration or input problem and are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCode::SourceUnavailable | ErrorCode::SourceTimeout)
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::SourceFailed => {
                "Check the prompt and API quota; re-run to resume from cached segments"
            }
            ErrorCode::SourceUnavailable => {
                "Wait for the rate limit to reset or lower --segment-batch"
            }
            ErrorCode::SourceTimeout => {
                "Check network connectivity; re-run to resume from cached segments"
            }
            ErrorCode::MissingApiKey => {
                "Set ELEVENLABS_API_KEY, add it to public/config.js, \
                 or use --assemble-only to reuse cached segments"
            }
            ErrorCode::ToolMissing => {
                "Install ffmpeg (with ffprobe) or point SOUNDBAKE_FFMPEG at the binary"
            }
            ErrorCode::ToolFailed => {
                "Inspect the tool output above; re-run with --keep-intermediates to keep scratch files"
            }
            ErrorCode::ToolTimeout => {
                "Raise SOUNDBAKE_TOOL_TIMEOUT or reduce the number of segments per track"
            }
            ErrorCode::EmptyOutput => {
                "The segment may be entirely silent; delete it from the segment cache to regenerate"
            }
            ErrorCode::InvalidPlan => {
                "Use an overlap shorter than every segment (e.g. --overlap 6 for 22s segments)"
            }
            ErrorCode::UnfadedSegment => {
                "Use --strategy sequential-crossfade or --unfaded bake for this source"
            }
            ErrorCode::MissingSegment => {
                "Run without --assemble-only to generate the missing segments"
            }
            ErrorCode::InvalidCatalog => "Validate the catalog JSON against the built-in one",
            ErrorCode::Cancelled => "Re-run to resume; cached segments are kept",
            ErrorCode::Io => "Check permissions and free space in the output directory",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for soundbake operations.
#[derive(Debug)]
pub struct BakeError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BakeError {
    /// Creates a new BakeError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new BakeError with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a source error for a non-success HTTP status.
    ///
    /// 429 and 5xx map to SOURCE_UNAVAILABLE, everything else to SOURCE_FAILED.
    pub fn source_status(status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        let code = if status == 429 || status >= 500 {
            ErrorCode::SourceUnavailable
        } else {
            ErrorCode::SourceFailed
        };
        Self::new(code, format!("HTTP {}: {}", status, snippet))
    }

    /// Creates a SOURCE_TIMEOUT error.
    pub fn source_timeout(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::SourceTimeout,
            format!("Generation request failed: {}", reason.into()),
        )
    }

    /// Creates a MISSING_API_KEY error.
    pub fn missing_api_key() -> Self {
        Self::new(ErrorCode::MissingApiKey, "No API key found")
    }

    /// Creates an INVALID_PLAN error.
    pub fn invalid_plan(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPlan, reason)
    }

    /// Creates a MISSING_SEGMENT error.
    pub fn missing_segment(path: &Path) -> Self {
        Self::new(
            ErrorCode::MissingSegment,
            format!("Segment not cached: {}", path.display()),
        )
    }

    /// Creates a CANCELLED error.
    pub fn cancelled(track: &str) -> Self {
        Self::new(ErrorCode::Cancelled, format!("Track {} cancelled", track))
    }

    /// Creates an IO_ERROR with the path that caused it.
    pub fn io(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::with_source(
            ErrorCode::Io,
            format!("Failed to {} {}: {}", action, path.display(), source),
            source,
        )
    }
}

impl fmt::Display for BakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Recovery: {}",
            self.code,
            self.message,
            self.code.recovery_hint()
        )
    }
}

impl std::error::Error for BakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias using BakeError.
pub type Result<T> = std::result::Result<T, BakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_as_str() {
        assert_eq!(ErrorCode::SourceFailed.as_str(), "SOURCE_FAILED");
        assert_eq!(ErrorCode::ToolFailed.as_str(), "TOOL_FAILED");
        assert_eq!(ErrorCode::InvalidPlan.as_str(), "INVALID_PLAN");
        assert_eq!(ErrorCode::Io.as_str(), "IO_ERROR");
    }

    #[test]
    fn only_source_timeouts_are_transient() {
        assert!(ErrorCode::SourceTimeout.is_transient());
        assert!(ErrorCode::SourceUnavailable.is_transient());
        assert!(!ErrorCode::SourceFailed.is_transient());
        assert!(!ErrorCode::ToolFailed.is_transient());
        assert!(!ErrorCode::ToolTimeout.is_transient());
    }

    #[test]
    fn source_status_truncates_body() {
        let body = "x".repeat(500);
        let err = BakeError::source_status(500, &body);
        assert_eq!(err.code, ErrorCode::SourceUnavailable);
        assert!(err.message.starts_with("HTTP 500: "));
        assert_eq!(err.message.len(), "HTTP 500: ".len() + 200);

        let err = BakeError::source_status(401, "unauthorized");
        assert_eq!(err.code, ErrorCode::SourceFailed);
    }

    #[test]
    fn bake_error_display() {
        let err = BakeError::invalid_plan("overlap 30s >= segment 22s");
        let text = err.to_string();
        assert!(text.contains("INVALID_PLAN"));
        assert!(text.contains("30s"));
        assert!(text.contains("Recovery:"));
    }
}

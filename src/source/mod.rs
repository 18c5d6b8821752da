//! Audio generation sources.
//!
//! A [`SegmentSource`] turns a [`ClipRequest`] into encoded audio bytes.
//! [`ElevenLabsSource`] talks to the hosted service; tests substitute their
//! own implementation.

pub mod elevenlabs;

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

pub use elevenlabs::{ElevenLabsSource, DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT};

/// A single generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipRequest {
    /// Prompt-to-sound generation, used for SFX and music segments.
    SoundEffect {
        prompt: String,
        duration_sec: Option<f64>,
    },
    /// Text-to-speech for one voice line.
    Speech {
        text: String,
        voice_id: String,
        model_id: String,
    },
}

impl ClipRequest {
    /// Short description for logs.
    pub fn describe(&self) -> String {
        let (kind, text) = match self {
            ClipRequest::SoundEffect { prompt, .. } => ("sfx", prompt),
            ClipRequest::Speech { text, .. } => ("speech", text),
        };
        let excerpt: String = text.chars().take(60).collect();
        format!("{kind}: {excerpt}")
    }
}

/// Produces encoded audio for a request.
pub trait SegmentSource: Send + Sync {
    /// Performs one request. Implementations must not retry internally.
    fn fetch(&self, request: &ClipRequest) -> Result<Vec<u8>>;
}

/// Bounded exponential backoff for transient source failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each retry.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Fetches `request`, retrying transient failures under `policy`.
pub fn fetch_with_retry(
    source: &dyn SegmentSource,
    request: &ClipRequest,
    policy: &RetryPolicy,
) -> Result<Vec<u8>> {
    let mut attempt = 1;
    loop {
        match source.fetch(request) {
            Ok(bytes) => return Ok(bytes),
            Err(err) if err.code.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient source failure, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

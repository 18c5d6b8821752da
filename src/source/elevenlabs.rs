//! ElevenLabs HTTP source.
//!
//! Sound effects and music segments use the sound-generation endpoint;
//! voice lines use text-to-speech. Both return MP3 bytes in the body.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::{ClipRequest, SegmentSource};
use crate::error::{BakeError, ErrorCode, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";

/// Per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct SoundGenerationBody<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<f64>,
}

#[derive(Serialize)]
struct SpeechBody<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// Blocking client for the ElevenLabs API.
pub struct ElevenLabsSource {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl ElevenLabsSource {
    /// Creates a client against the public API.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::with_base_url(api_key, timeout, DEFAULT_BASE_URL)
    }

    /// Creates a client against `base_url`.
    pub fn with_base_url(
        api_key: impl Into<String>,
        timeout: Duration,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                BakeError::with_source(ErrorCode::SourceFailed, "Failed to create HTTP client", e)
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Returns the endpoint URL for a request.
    pub fn endpoint(&self, request: &ClipRequest) -> String {
        match request {
            ClipRequest::SoundEffect { .. } => format!("{}/v1/sound-generation", self.base_url),
            ClipRequest::Speech { voice_id, .. } => {
                format!("{}/v1/text-to-speech/{}", self.base_url, voice_id)
            }
        }
    }

    fn post<B: Serialize>(&self, url: &str, body: &B) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(body)
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(BakeError::source_status(status.as_u16(), &text));
        }

        let bytes = response.bytes().map_err(transport_error)?;
        if bytes.is_empty() {
            return Err(BakeError::new(
                ErrorCode::SourceFailed,
                format!("Empty response body from {}", url),
            ));
        }
        Ok(bytes.to_vec())
    }
}

fn transport_error(err: reqwest::Error) -> BakeError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        BakeError::source_timeout(err.to_string())
    } else {
        BakeError::with_source(ErrorCode::SourceFailed, "Generation request failed", err)
    }
}

impl SegmentSource for ElevenLabsSource {
    fn fetch(&self, request: &ClipRequest) -> Result<Vec<u8>> {
        let url = self.endpoint(request);
        debug!(url = %url, request = %request.describe(), "requesting clip");
        match request {
            ClipRequest::SoundEffect {
                prompt,
                duration_sec,
            } => self.post(
                &url,
                &SoundGenerationBody {
                    text: prompt,
                    duration_seconds: *duration_sec,
                },
            ),
            ClipRequest::Speech {
                text, model_id, ..
            } => self.post(
                &url,
                &SpeechBody {
                    text,
                    model_id,
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_per_request_kind() {
        let source =
            ElevenLabsSource::with_base_url("key", DEFAULT_REQUEST_TIMEOUT, "http://host/").unwrap();
        let sfx = ClipRequest::SoundEffect {
            prompt: "click".to_string(),
            duration_sec: Some(1.0),
        };
        let speech = ClipRequest::Speech {
            text: "Ready!".to_string(),
            voice_id: "abc123".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
        };
        assert_eq!(source.endpoint(&sfx), "http://host/v1/sound-generation");
        assert_eq!(source.endpoint(&speech), "http://host/v1/text-to-speech/abc123");
    }

    #[test]
    fn duration_is_omitted_when_absent() {
        let body = SoundGenerationBody {
            text: "rain",
            duration_seconds: None,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"text":"rain"}"#);

        let body = SoundGenerationBody {
            text: "rain",
            duration_seconds: Some(22.0),
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"text":"rain","duration_seconds":22.0}"#
        );
    }

    #[test]
    fn unreachable_host_is_transient() {
        let source = ElevenLabsSource::with_base_url(
            "key",
            Duration::from_millis(500),
            "http://127.0.0.1:1",
        )
        .unwrap();
        let err = source
            .fetch(&ClipRequest::SoundEffect {
                prompt: "click".to_string(),
                duration_sec: None,
            })
            .unwrap_err();
        assert!(err.code.is_transient());
    }
}

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{EngineError, Transcript, TranscriptSegment, TranscriptionEngine};
use crate::captions::srt::parse_timestamp;
use crate::config::TranscriptionConfig;

/// Whisper engine reached over an OpenAI-compatible HTTP endpoint
/// (`/v1/audio/transcriptions`, also served by whisper.cpp server builds)
#[derive(Debug, Clone)]
pub struct WhisperApiEngine {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

impl WhisperApiEngine {
    pub fn new(config: TranscriptionConfig) -> Result<Self, EngineError> {
        if config.endpoint.trim().is_empty() {
            return Err(EngineError::Configuration(
                "transcription endpoint not configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    async fn attempt(&self, media: &[u8], filename: &str) -> Result<Transcript, EngineError> {
        let file = Part::bytes(media.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;

        let mut form = Form::new()
            .part("file", file)
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json");

        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        let mut request = self.client.post(&self.config.endpoint).multipart(form);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Status {
                status,
                body: truncate(&body, 500),
            });
        }

        let body = response.text().await.map_err(|e| self.map_request_error(e))?;
        debug!("📊 Engine response size: {} bytes", body.len());
        parse_response(&body)
    }

    fn map_request_error(&self, e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            EngineError::Timeout(self.config.timeout_secs)
        } else {
            EngineError::Request(e)
        }
    }
}

#[async_trait]
impl TranscriptionEngine for WhisperApiEngine {
    async fn transcribe(&self, media: Vec<u8>, filename: &str) -> Result<Transcript, EngineError> {
        let start_time = Instant::now();
        let attempts = self.config.max_retries + 1;

        info!(
            "🎤 Sending {} ({:.1} MB) to {} with model {}",
            filename,
            media.len() as f64 / 1_000_000.0,
            self.config.endpoint,
            self.config.model
        );

        let mut attempt = 1;
        loop {
            match self.attempt(&media, filename).await {
                Ok(transcript) => {
                    info!(
                        "✅ Transcription finished in {:.1}s (attempt {}/{}, segmented: {})",
                        start_time.elapsed().as_secs_f64(),
                        attempt,
                        attempts,
                        transcript.is_segmented()
                    );
                    return Ok(transcript);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = Duration::from_millis(self.config.retry_delay_ms * attempt as u64);
                    warn!(
                        "⚠️ Transcription attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("❌ Transcription failed after {} attempt(s): {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    fn max_file_size(&self) -> u64 {
        self.config.max_file_size
    }

    fn name(&self) -> &str {
        "whisper-api"
    }
}

/// Parse any of the JSON shapes Whisper servers return
pub fn parse_response(body: &str) -> Result<Transcript, EngineError> {
    let output: WhisperOutput = serde_json::from_str(body)
        .map_err(|e| EngineError::Malformed(format!("{} in {}", e, truncate(body, 200))))?;

    let (segments, text) = if !output.transcription.is_empty() {
        // whisper.cpp server format
        let segments = output
            .transcription
            .into_iter()
            .map(|seg| -> Result<TranscriptSegment, EngineError> {
                let (start, end) = match seg.offsets {
                    Some(offsets) => (offsets.from as f64 / 1000.0, offsets.to as f64 / 1000.0),
                    None => (
                        timestamp_seconds(&seg.timestamps.from)?,
                        timestamp_seconds(&seg.timestamps.to)?,
                    ),
                };
                Ok(TranscriptSegment::new(start, end, seg.text))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        (segments, None)
    } else if let Some(result) = output.result.filter(|r| !r.segments.is_empty() || r.text.is_some()) {
        (convert_segments(result.segments), result.text)
    } else {
        (convert_segments(output.segments), output.text)
    };

    if segments.is_empty() {
        return Ok(Transcript::PlainText {
            text: text.unwrap_or_default(),
            duration: output.duration,
        });
    }

    Ok(Transcript::Segmented { segments })
}

fn convert_segments(segments: Vec<WhisperSegment>) -> Vec<TranscriptSegment> {
    segments
        .into_iter()
        .map(|seg| TranscriptSegment::new(seg.start, seg.end, seg.text))
        .collect()
}

fn timestamp_seconds(timestamp: &str) -> Result<f64, EngineError> {
    parse_timestamp(timestamp)
        .map(|ms| ms as f64 / 1000.0)
        .map_err(|e| EngineError::Malformed(e.to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    #[serde(default)]
    transcription: Vec<WhisperTranscriptionSegment>,
    #[serde(default)]
    result: Option<WhisperResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperResult {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperTranscriptionSegment {
    timestamps: WhisperTimestamps,
    #[serde(default)]
    offsets: Option<WhisperOffsets>,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperTimestamps {
    from: String,
    to: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperOffsets {
    from: u64,
    to: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_verbose_json() {
        let body = r#"{
            "task": "transcribe",
            "language": "english",
            "duration": 7.2,
            "text": "Hello world. Second line.",
            "segments": [
                {"id": 0, "seek": 0, "start": 0.0, "end": 3.5, "text": " Hello world.", "avg_logprob": -0.2},
                {"id": 1, "seek": 0, "start": 3.6, "end": 7.2, "text": " Second line."}
            ]
        }"#;

        match parse_response(body).unwrap() {
            Transcript::Segmented { segments } => {
                assert_eq!(segments.len(), 2);
                assert_eq!(segments[1].start, 3.6);
                assert_eq!(segments[0].text, " Hello world.");
            }
            other => panic!("expected segments, got {:?}", other),
        }
    }

    #[test]
    fn test_whisper_cpp_format_prefers_offsets() {
        let body = r#"{
            "result": {"language": "en"},
            "transcription": [
                {"timestamps": {"from": "00:00:00,000", "to": "00:00:02,000"},
                 "offsets": {"from": 0, "to": 2040}, "text": " one"},
                {"timestamps": {"from": "00:00:02,000", "to": "00:01:05,500"}, "text": " two"}
            ]
        }"#;

        match parse_response(body).unwrap() {
            Transcript::Segmented { segments } => {
                assert_eq!(segments[0].end, 2.04);
                assert_eq!(segments[1].end, 65.5);
            }
            other => panic!("expected segments, got {:?}", other),
        }
    }

    #[test]
    fn test_text_only_response_is_plain_text() {
        let body = r#"{"text": "just words here", "duration": 4.0}"#;
        assert_eq!(
            parse_response(body).unwrap(),
            Transcript::PlainText {
                text: "just words here".to_string(),
                duration: Some(4.0),
            }
        );
    }

    #[test]
    fn test_result_wrapper_segments() {
        let body = r#"{"result": {"language": "en", "segments": [{"start": 1.0, "end": 2.0, "text": "x"}]}}"#;
        assert!(parse_response(body).unwrap().is_segmented());
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            parse_response("<html>502</html>"),
            Err(EngineError::Malformed(_))
        ));
    }

    #[test]
    fn test_engine_requires_endpoint() {
        let config = TranscriptionConfig {
            endpoint: String::new(),
            ..TranscriptionConfig::default()
        };
        assert!(matches!(
            WhisperApiEngine::new(config),
            Err(EngineError::Configuration(_))
        ));
    }

    mod http {
        use super::*;
        use wiremock::matchers::{body_string_contains, header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const SEGMENTED_BODY: &str = r#"{"duration": 2.0, "text": "hi", "segments": [{"start": 0.0, "end": 2.0, "text": " hi"}]}"#;

        fn engine(server: &MockServer, timeout_secs: u64, max_retries: u32) -> WhisperApiEngine {
            WhisperApiEngine::new(TranscriptionConfig {
                endpoint: format!("{}/v1/audio/transcriptions", server.uri()),
                api_key: Some("test-key".to_string()),
                timeout_secs,
                max_retries,
                retry_delay_ms: 100,
                ..TranscriptionConfig::default()
            })
            .unwrap()
        }

        async fn request_count(server: &MockServer) -> usize {
            server.received_requests().await.unwrap_or_default().len()
        }

        #[tokio::test]
        async fn test_server_errors_are_retried_with_linear_backoff() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/audio/transcriptions"))
                .respond_with(ResponseTemplate::new(503))
                .up_to_n_times(2)
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .and(path("/v1/audio/transcriptions"))
                .and(header("authorization", "Bearer test-key"))
                .and(body_string_contains("verbose_json"))
                .respond_with(ResponseTemplate::new(200).set_body_string(SEGMENTED_BODY))
                .mount(&server)
                .await;

            let started = Instant::now();
            let transcript = engine(&server, 5, 2)
                .transcribe(b"media".to_vec(), "clip.mp4")
                .await
                .unwrap();

            assert!(transcript.is_segmented());
            assert_eq!(request_count(&server).await, 3);
            // 100ms after the first failure, 200ms after the second
            assert!(started.elapsed() >= Duration::from_millis(300));
        }

        #[tokio::test]
        async fn test_rate_limit_exhausts_all_attempts() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
                .mount(&server)
                .await;

            let result = engine(&server, 5, 2)
                .transcribe(b"media".to_vec(), "clip.mp4")
                .await;

            assert!(matches!(result, Err(EngineError::Status { status: 429, .. })));
            assert_eq!(request_count(&server).await, 3);
        }

        #[tokio::test]
        async fn test_client_error_is_not_retried() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(400).set_body_string("bad file"))
                .mount(&server)
                .await;

            let result = engine(&server, 5, 2)
                .transcribe(b"media".to_vec(), "clip.mp4")
                .await;

            match result {
                Err(EngineError::Status { status, body }) => {
                    assert_eq!(status, 400);
                    assert_eq!(body, "bad file");
                }
                other => panic!("expected status error, got {:?}", other),
            }
            assert_eq!(request_count(&server).await, 1);
        }

        #[tokio::test]
        async fn test_slow_response_times_out() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(SEGMENTED_BODY)
                        .set_delay(Duration::from_secs(3)),
                )
                .mount(&server)
                .await;

            let started = Instant::now();
            let result = engine(&server, 1, 0)
                .transcribe(b"media".to_vec(), "clip.mp4")
                .await;

            assert!(matches!(result, Err(EngineError::Timeout(1))));
            assert!(started.elapsed() < Duration::from_secs(3));
            assert_eq!(request_count(&server).await, 1);
        }
    }

}

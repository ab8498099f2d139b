//! Cloud batch transcription over HTTP.
//!
//! Async-upload flavor of API: upload the WAV via multipart, create a
//! transcription job, poll until it completes, fetch the transcript, and
//! clean the uploaded file up best-effort. Responses come back either as a
//! list of segments or as one whole-transcript body; both are accepted.

use crate::error::{Result, VoxcapError};
use async_trait::async_trait;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const DELETE_RETRIES: u32 = 3;
const DELETE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One segment of a remote transcription result.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSegment {
    pub text: String,
    /// Start time as reported by the backend; may be session-relative or
    /// absolute — callers normalize.
    pub start: Option<f64>,
    pub confidence: Option<f32>,
}

/// Batch transcription backend seam.
#[async_trait]
pub trait CloudTranscriber: Send + Sync {
    /// Transcribes an encoded WAV asset. An empty result is valid.
    async fn transcribe_wav(&self, wav: &[u8]) -> Result<Vec<RemoteSegment>>;
}

#[derive(Serialize)]
struct CreateTranscriptionRequest {
    file_id: String,
    model: String,
}

#[derive(Deserialize, Debug)]
struct FileUploadResponse {
    id: String,
}

#[derive(Deserialize, Debug)]
struct CreateTranscriptionResponse {
    id: String,
}

#[derive(Deserialize, Debug)]
struct TranscriptionStatus {
    status: String,
}

#[derive(Deserialize, Debug)]
struct SegmentPayload {
    text: String,
    #[serde(default)]
    start: Option<f64>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Deserialize, Debug)]
struct TranscriptPayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Option<Vec<SegmentPayload>>,
}

/// HTTP implementation of [`CloudTranscriber`].
pub struct HttpCloudTranscriber {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
    timeout_seconds: u32,
}

impl HttpCloudTranscriber {
    /// Create a client with the default job timeout (120 seconds).
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self::with_timeout(api_url, api_key, model, 120)
    }

    pub fn with_timeout(
        api_url: String,
        api_key: String,
        model: String,
        timeout_seconds: u32,
    ) -> Self {
        Self {
            api_url,
            api_key,
            model,
            client: reqwest::Client::new(),
            timeout_seconds,
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    async fn upload_file(&self, wav: &[u8]) -> Result<String> {
        let part = multipart::Part::bytes(wav.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoxcapError::Other(format!("invalid mime type: {}", e)))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.api_url))
            .header("Authorization", self.bearer())
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;

        let response = check_status("file upload", response).await?;
        let upload: FileUploadResponse = response.json().await.map_err(request_error)?;
        debug!("uploaded recovery audio as file {}", upload.id);
        Ok(upload.id)
    }

    async fn create_transcription(&self, file_id: String) -> Result<String> {
        let request = CreateTranscriptionRequest {
            file_id,
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(format!("{}/transcriptions", self.api_url))
            .header("Authorization", self.bearer())
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        let response = check_status("create transcription", response).await?;
        let created: CreateTranscriptionResponse = response.json().await.map_err(request_error)?;
        debug!("created transcription job {}", created.id);
        Ok(created.id)
    }

    /// Polls for completion with a capped exponential interval.
    async fn wait_for_completion(&self, transcription_id: &str) -> Result<()> {
        let timeout = Duration::from_secs(self.timeout_seconds as u64);
        let start_time = std::time::Instant::now();
        let mut poll_interval = Duration::from_millis(500);
        let max_poll_interval = Duration::from_secs(5);

        while start_time.elapsed() < timeout {
            let response = self
                .client
                .get(format!("{}/transcriptions/{}", self.api_url, transcription_id))
                .header("Authorization", self.bearer())
                .send()
                .await
                .map_err(request_error)?;

            let response = check_status("transcription status", response).await?;
            let status: TranscriptionStatus = response.json().await.map_err(request_error)?;

            match status.status.as_str() {
                "completed" => return Ok(()),
                "error" => {
                    return Err(VoxcapError::Transcription {
                        message: format!("transcription job {} failed", transcription_id),
                    });
                }
                _ => {
                    tokio::time::sleep(poll_interval).await;
                    poll_interval = std::cmp::min(poll_interval * 2, max_poll_interval);
                }
            }
        }

        Err(VoxcapError::Network {
            message: format!(
                "transcription timed out after {} seconds",
                self.timeout_seconds
            ),
        })
    }

    async fn fetch_transcript(&self, transcription_id: &str) -> Result<Vec<RemoteSegment>> {
        let response = self
            .client
            .get(format!(
                "{}/transcriptions/{}/transcript",
                self.api_url, transcription_id
            ))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(request_error)?;

        let response = check_status("fetch transcript", response).await?;
        let raw = response.text().await.map_err(request_error)?;
        parse_transcript(&raw)
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/files/{}", self.api_url, file_id))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(request_error)?;

        check_status("delete file", response).await?;
        Ok(())
    }

    /// Best-effort cleanup of the uploaded asset.
    async fn delete_file_with_retry(&self, file_id: &str) {
        for attempt in 0..DELETE_RETRIES {
            match self.delete_file(file_id).await {
                Ok(()) => {
                    debug!("deleted uploaded file {}", file_id);
                    return;
                }
                Err(e) => {
                    warn!(
                        "failed to delete file {} (attempt {}/{}): {}",
                        file_id,
                        attempt + 1,
                        DELETE_RETRIES,
                        e
                    );
                    if attempt < DELETE_RETRIES - 1 {
                        tokio::time::sleep(DELETE_RETRY_DELAY).await;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CloudTranscriber for HttpCloudTranscriber {
    async fn transcribe_wav(&self, wav: &[u8]) -> Result<Vec<RemoteSegment>> {
        if wav.is_empty() {
            return Ok(Vec::new());
        }

        info!("uploading {} bytes for cloud batch transcription", wav.len());
        let file_id = self.upload_file(wav).await?;

        let result = async {
            let transcription_id = self.create_transcription(file_id.clone()).await?;
            self.wait_for_completion(&transcription_id).await?;
            self.fetch_transcript(&transcription_id).await
        }
        .await;

        self.delete_file_with_retry(&file_id).await;

        let segments = result?;
        info!("cloud batch transcription produced {} segments", segments.len());
        Ok(segments)
    }
}

/// Accepts either a per-segment response or a whole-transcript body.
fn parse_transcript(raw: &str) -> Result<Vec<RemoteSegment>> {
    let payload: TranscriptPayload =
        serde_json::from_str(raw).map_err(|e| VoxcapError::Other(format!(
            "unrecognized transcript response: {} - {}",
            e,
            &raw[..raw.len().min(200)]
        )))?;

    if let Some(segments) = payload.segments {
        return Ok(segments
            .into_iter()
            .filter(|segment| !segment.text.trim().is_empty())
            .map(|segment| RemoteSegment {
                text: segment.text.trim().to_string(),
                start: segment.start,
                confidence: segment.confidence,
            })
            .collect());
    }

    let text = payload.text.unwrap_or_default().trim().to_string();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![RemoteSegment {
        text,
        start: None,
        confidence: None,
    }])
}

/// Maps HTTP status codes onto the error taxonomy.
async fn check_status(operation: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{} failed with {}: {}", operation, status, body);
    Err(classify_status(status.as_u16(), message))
}

fn classify_status(status: u16, message: String) -> VoxcapError {
    match status {
        401 | 403 => VoxcapError::Auth {
            service: "cloud-batch".to_string(),
            message,
        },
        429 => VoxcapError::RateLimit {
            service: "cloud-batch".to_string(),
            message,
        },
        _ => VoxcapError::Network { message },
    }
}

fn request_error(error: reqwest::Error) -> VoxcapError {
    VoxcapError::Network {
        message: error.to_string(),
    }
}

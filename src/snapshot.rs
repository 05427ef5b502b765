//! One-shot high-resolution snapshot analysis
//!
//! A scan grabs the newest full-resolution frame, compresses it at higher
//! quality than the live stream and asks the analysis endpoint for a short
//! mode-specific report. Only one scan runs at a time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{api_key_from_env, SnapshotConfig};
use crate::error::AnalysisError;
use crate::protocol::{GenerateContentRequest, GenerateContentResponse};
use crate::video::camera::Camera;
use crate::video::frame::VideoFrame;

/// Shown when the model answers with nothing
pub const NO_ANALYSIS_TEXT: &str = "Could not analyze image.";

/// Shown when the request fails
pub const ANALYSIS_FAILED_TEXT: &str = "Analysis failed.";

/// What the analysis should focus on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScanMode {
    #[default]
    General,
    Plant,
    Soil,
    Pest,
    Disease,
}

impl ScanMode {
    pub const ALL: [ScanMode; 5] = [
        ScanMode::General,
        ScanMode::Plant,
        ScanMode::Soil,
        ScanMode::Pest,
        ScanMode::Disease,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::General => "General",
            ScanMode::Plant => "Plant",
            ScanMode::Soil => "Soil",
            ScanMode::Pest => "Pest",
            ScanMode::Disease => "Disease",
        }
    }

    pub fn prompt(&self) -> String {
        format!(
            "Analyze this farming image. Mode: {}.\n\
             Identify specific plants, diseases, pests, or soil conditions.\n\
             Provide 3 specific actionable bullet points.\n\
             Keep it concise and professional.",
            self.as_str()
        )
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown scan mode '{}'", s))
    }
}

/// A completed scan, as handed to the history store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub mode: ScanMode,
    pub analysis_text: String,
}

/// Receives every completed scan exactly once
pub trait ScanHistory: Send + Sync {
    fn save_scan(&self, result: ScanResult);
}

impl<F> ScanHistory for F
where
    F: Fn(ScanResult) + Send + Sync,
{
    fn save_scan(&self, result: ScanResult) {
        self(result)
    }
}

/// Request/response analysis of one image
pub trait AnalysisClient: Send + Sync {
    fn analyze(
        &self,
        jpeg_base64: String,
        prompt: String,
    ) -> BoxFuture<'static, Result<String, AnalysisError>>;
}

/// generateContent over blocking HTTP, run off the async workers
#[derive(Clone)]
pub struct GeminiAnalysisClient {
    agent: ureq::Agent,
    url: String,
    api_key: String,
}

impl GeminiAnalysisClient {
    pub fn new(config: &SnapshotConfig, api_key: &str) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(config.timeout_ms)))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            url: format!(
                "{}/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            api_key: api_key.to_string(),
        }
    }

    pub fn from_env(config: &SnapshotConfig) -> Result<Self, AnalysisError> {
        let key = api_key_from_env()
            .ok_or_else(|| AnalysisError::Request("API key not found".to_string()))?;
        Ok(Self::new(config, &key))
    }

    fn request_blocking(&self, body: &GenerateContentRequest) -> Result<String, AnalysisError> {
        let mut response = self
            .agent
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .send_json(body)
            .map_err(|e| AnalysisError::Request(e.to_string()))?;

        let parsed: GenerateContentResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| AnalysisError::Response(e.to_string()))?;

        Ok(parsed.text())
    }
}

impl AnalysisClient for GeminiAnalysisClient {
    fn analyze(
        &self,
        jpeg_base64: String,
        prompt: String,
    ) -> BoxFuture<'static, Result<String, AnalysisError>> {
        let client = self.clone();
        Box::pin(async move {
            let body = GenerateContentRequest::image_with_prompt(jpeg_base64, &prompt);
            tokio::task::spawn_blocking(move || client.request_blocking(&body))
                .await
                .map_err(|e| AnalysisError::Request(e.to_string()))?
        })
    }
}

/// Result of [`SnapshotAnalyzer::capture`]
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Completed(ScanResult),
    /// The request failed; carries the text to show the user
    Failed(String),
    /// Nothing was attempted
    Rejected(AnalysisError),
}

impl ScanOutcome {
    /// Text for display
    pub fn text(&self) -> String {
        match self {
            ScanOutcome::Completed(result) => result.analysis_text.clone(),
            ScanOutcome::Failed(text) => text.clone(),
            ScanOutcome::Rejected(e) => e.to_string(),
        }
    }
}

/// Clears the in-flight flag even if the scan future is dropped
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SnapshotAnalyzer {
    client: Arc<dyn AnalysisClient>,
    history: Option<Arc<dyn ScanHistory>>,
    jpeg_quality: u8,
    scanning: AtomicBool,
    completed: AtomicU64,
}

impl SnapshotAnalyzer {
    pub fn new(client: Arc<dyn AnalysisClient>, jpeg_quality: u8) -> Self {
        Self {
            client,
            history: None,
            jpeg_quality,
            scanning: AtomicBool::new(false),
            completed: AtomicU64::new(0),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn ScanHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn completed_scans(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Analyze the camera's newest frame
    pub async fn capture(&self, camera: Option<Arc<dyn Camera>>, mode: ScanMode) -> ScanOutcome {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Scan rejected, another is in flight");
            return ScanOutcome::Rejected(AnalysisError::Busy);
        }
        let _in_flight = InFlight(&self.scanning);

        let Some(camera) = camera else {
            return ScanOutcome::Rejected(AnalysisError::NoFrame);
        };

        let quality = self.jpeg_quality;
        let encoded = tokio::task::spawn_blocking(move || {
            let image = camera.snapshot()?;
            Some(VideoFrame::encode(&image, quality).map(|frame| BASE64.encode(&frame.jpeg_bytes)))
        })
        .await;

        let jpeg_base64 = match encoded {
            Ok(Some(Ok(data))) => data,
            Ok(None) => return ScanOutcome::Rejected(AnalysisError::NoFrame),
            Ok(Some(Err(e))) => {
                tracing::error!("Snapshot compression failed: {}", e);
                return ScanOutcome::Failed(ANALYSIS_FAILED_TEXT.to_string());
            }
            Err(e) => {
                tracing::error!("Snapshot task failed: {}", e);
                return ScanOutcome::Failed(ANALYSIS_FAILED_TEXT.to_string());
            }
        };

        tracing::info!("Running {} scan", mode);

        let analysis_text = match self.client.analyze(jpeg_base64, mode.prompt()).await {
            Ok(text) if text.trim().is_empty() => NO_ANALYSIS_TEXT.to_string(),
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Scan failed: {}", e);
                return ScanOutcome::Failed(ANALYSIS_FAILED_TEXT.to_string());
            }
        };

        let result = ScanResult {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            mode,
            analysis_text,
        };
        self.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(history) = &self.history {
            history.save_scan(result.clone());
        }
        ScanOutcome::Completed(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAnalysisClient, FakeCamera};
    use parking_lot::Mutex;

    fn camera() -> Option<Arc<dyn Camera>> {
        let camera: Arc<dyn Camera> = FakeCamera::with_zoom(None);
        Some(camera)
    }

    fn recorder() -> (Arc<dyn ScanHistory>, Arc<Mutex<Vec<ScanResult>>>) {
        let saved = Arc::new(Mutex::new(Vec::new()));
        let sink = saved.clone();
        let history: Arc<dyn ScanHistory> = Arc::new(move |r: ScanResult| sink.lock().push(r));
        (history, saved)
    }

    #[test]
    fn mode_parsing_and_prompt() {
        assert_eq!("soil".parse::<ScanMode>(), Ok(ScanMode::Soil));
        assert!("weather".parse::<ScanMode>().is_err());
        assert!(ScanMode::Pest.prompt().contains("Mode: Pest."));
    }

    #[tokio::test]
    async fn completed_scan_is_saved_once() {
        let client = FakeAnalysisClient::replying(Ok("- water less".to_string()));
        let (history, saved) = recorder();
        let analyzer = SnapshotAnalyzer::new(client.clone(), 80).with_history(history);

        let outcome = analyzer
            .capture(camera(), ScanMode::Plant)
            .await;

        let ScanOutcome::Completed(result) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(result.mode, ScanMode::Plant);
        assert_eq!(result.analysis_text, "- water less");
        assert_eq!(saved.lock().len(), 1);
        assert_eq!(client.calls(), 1);
        assert!(client.last_prompt().unwrap().contains("Mode: Plant."));
        assert!(!analyzer.is_scanning());
    }

    #[tokio::test]
    async fn empty_answer_and_failure_texts() {
        let empty = SnapshotAnalyzer::new(FakeAnalysisClient::replying(Ok("  ".into())), 80);
        let outcome = empty.capture(camera(), ScanMode::General).await;
        assert_eq!(outcome.text(), NO_ANALYSIS_TEXT);

        let (history, saved) = recorder();
        let failing = SnapshotAnalyzer::new(
            FakeAnalysisClient::replying(Err(AnalysisError::Request("503".into()))),
            80,
        )
        .with_history(history);
        let outcome = failing.capture(camera(), ScanMode::Soil).await;
        assert_eq!(outcome, ScanOutcome::Failed(ANALYSIS_FAILED_TEXT.to_string()));
        assert!(saved.lock().is_empty());
    }

    #[tokio::test]
    async fn second_scan_rejected_while_first_in_flight() {
        let client = FakeAnalysisClient::gated(Ok("ok".to_string()));
        let (history, saved) = recorder();
        let analyzer = Arc::new(SnapshotAnalyzer::new(client.clone(), 80).with_history(history));

        let first = {
            let analyzer = analyzer.clone();
            tokio::spawn(async move {
                analyzer
                    .capture(camera(), ScanMode::Pest)
                    .await
            })
        };
        client.wait_until_called().await;

        let second = analyzer
            .capture(camera(), ScanMode::Pest)
            .await;
        assert_eq!(second, ScanOutcome::Rejected(AnalysisError::Busy));

        client.release();
        assert!(matches!(first.await.unwrap(), ScanOutcome::Completed(_)));
        assert_eq!(saved.lock().len(), 1);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn no_camera_is_rejected() {
        let analyzer = SnapshotAnalyzer::new(FakeAnalysisClient::replying(Ok("x".into())), 80);
        let outcome = analyzer.capture(None, ScanMode::General).await;
        assert_eq!(outcome, ScanOutcome::Rejected(AnalysisError::NoFrame));
        assert!(!analyzer.is_scanning());
    }
}

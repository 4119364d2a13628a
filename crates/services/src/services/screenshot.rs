//! Screenshot capture: ask the external browser-rendering API for a PNG of
//! the preview URL and persist it for the app record.

use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use utils::assets::screenshots_dir;
use uuid::Uuid;

use crate::services::app_service::{AppService, AppServiceError};

const GOTO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ScreenshotError {
    #[error("Screenshot API is not configured")]
    NotConfigured,
    #[error("Screenshot API error: {0}")]
    Api(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Decode(#[from] base64::DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    AppService(#[from] AppServiceError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    viewport: Viewport,
    goto_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    /// Base64-encoded PNG bytes.
    screenshot: String,
}

#[derive(Clone)]
pub struct ScreenshotService {
    client: reqwest::Client,
    render_api_url: Option<String>,
    app_service: AppService,
}

impl ScreenshotService {
    pub fn new(render_api_url: Option<String>, app_service: AppService) -> Self {
        Self {
            client: reqwest::Client::new(),
            render_api_url,
            app_service,
        }
    }

    /// Capture the preview, write the PNG under the asset dir, and update
    /// the app's screenshot pointer. Returns the stored file path.
    pub async fn capture(
        &self,
        app_id: Uuid,
        preview_url: &str,
        viewport: Viewport,
    ) -> Result<String, ScreenshotError> {
        let render_api_url = self
            .render_api_url
            .as_ref()
            .ok_or(ScreenshotError::NotConfigured)?;

        let response = self
            .client
            .post(render_api_url)
            .json(&RenderRequest {
                url: preview_url,
                viewport,
                goto_timeout_ms: GOTO_TIMEOUT.as_millis() as u64,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ScreenshotError::Api(format!(
                "render API returned {}",
                response.status()
            )));
        }
        let rendered: RenderResponse = response.json().await?;
        let bytes = base64::engine::general_purpose::STANDARD.decode(rendered.screenshot)?;

        let dir = screenshots_dir().join(app_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let file_path = dir.join(format!("{}.png", chrono::Utc::now().timestamp_millis()));
        tokio::fs::write(&file_path, &bytes).await?;

        let stored = file_path.to_string_lossy().to_string();
        self.app_service
            .update_app_screenshot(app_id, &stored)
            .await?;
        tracing::info!(app_id = %app_id, path = %stored, "Screenshot captured");
        Ok(stored)
    }
}

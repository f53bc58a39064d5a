use crate::config::ExtractionConfig;
use crate::error::{PipelineError, Result};
use crate::models::ExtractionPayload;
use async_trait::async_trait;
use std::time::Duration;

/// 外部抽取服务: 输入原始文件, 返回宽松结构的抽取结果
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn extract(&self, file_name: &str, bytes: Vec<u8>) -> Result<ExtractionPayload>;
}

/// 基于 HTTP JSON 的抽取服务客户端
pub struct HttpExtractionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpExtractionClient {
    pub fn new(config: &ExtractionConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Extraction(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ExtractionClient for HttpExtractionClient {
    async fn extract(&self, file_name: &str, bytes: Vec<u8>) -> Result<ExtractionPayload> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .query(&[("file_name", file_name)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::Extraction(format!("extraction request timed out: {}", e))
            } else {
                PipelineError::Extraction(format!("failed to reach extraction service: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Extraction(format!(
                "extraction service error {}: {}",
                status,
                body.trim()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Extraction(format!("failed to read extraction response: {}", e)))?;
        serde_json::from_slice(&body).map_err(|e| PipelineError::MalformedPayload(e.to_string()))
    }
}

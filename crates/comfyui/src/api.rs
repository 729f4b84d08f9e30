//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, cancellation,
//! history retrieval, health probes) using [`reqwest`].

use serde::Deserialize;

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i32,
}

/// Snapshot of the `/queue` endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct QueueStatus {
    #[serde(default)]
    pub queue_running: Vec<serde_json::Value>,
    #[serde(default)]
    pub queue_pending: Vec<serde_json::Value>,
}

impl QueueStatus {
    /// Running plus pending jobs.
    pub fn depth(&self) -> usize {
        self.queue_running.len() + self.queue_pending.len()
    }
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A URL could not be built from the configured base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (connection pooling across many workers).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Send `key` with every request, both as a bearer token and as
    /// `X-API-Key`.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.is_empty());
        self
    }

    /// Submit a workflow graph for execution.
    ///
    /// Sends `POST /prompt` with `{prompt, client_id}` and returns the
    /// server-assigned `prompt_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .request(reqwest::Method::POST, "/prompt")
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Remove a queued prompt (`POST /queue` with `{"delete": [id]}`).
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .request(reqwest::Method::POST, "/queue")
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Interrupt whatever is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .request(reqwest::Method::POST, "/interrupt")
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// The returned JSON is keyed by prompt ID and contains the node
    /// outputs and execution status once the prompt has finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/history/{prompt_id}"))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `GET /system_stats`, the first half of a health probe.
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .request(reqwest::Method::GET, "/system_stats")
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `GET /queue`, the second half of a health probe.
    pub async fn queue(&self) -> Result<QueueStatus, ComfyUIApiError> {
        let response = self.request(reqwest::Method::GET, "/queue").send().await?;

        Self::parse_response(response).await
    }

    /// Public URL of an output image served by `GET /view`.
    pub fn view_url(
        &self,
        filename: &str,
        subfolder: &str,
        kind: &str,
    ) -> Result<String, ComfyUIApiError> {
        let mut url = reqwest::Url::parse(&format!("{}/view", self.api_url))
            .map_err(|e| ComfyUIApiError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("filename", filename)
            .append_pair("subfolder", subfolder)
            .append_pair("type", kind);
        Ok(url.into())
    }

    // ---- private helpers ----

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.api_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key).header("X-API-Key", key),
            None => builder,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    #[cfg(test)]
    fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ComfyUIApi::new("http://gpu:8188/".into());
        assert_eq!(api.api_url(), "http://gpu:8188");
    }

    #[test]
    fn view_url_encodes_query() {
        let api = ComfyUIApi::new("http://gpu:8188".into());
        let url = api.view_url("fox 1.png", "", "output").unwrap();
        assert_eq!(
            url,
            "http://gpu:8188/view?filename=fox+1.png&subfolder=&type=output"
        );
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let api = ComfyUIApi::new("http://gpu:8188".into()).with_api_key(Some(String::new()));
        assert!(api.api_key.is_none());
    }

    #[test]
    fn queue_depth_counts_both_lists() {
        let q: QueueStatus = serde_json::from_value(serde_json::json!({
            "queue_running": [["a"]],
            "queue_pending": [["b"], ["c"]],
        }))
        .unwrap();
        assert_eq!(q.depth(), 3);
    }
}

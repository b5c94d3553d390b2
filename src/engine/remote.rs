//! Inference pipeline served by an HTTP sidecar.
//!
//! The sidecar hosts the actual vision-language pipeline. This client only
//! speaks its JSON protocol:
//! - `POST /load` constructs a pipeline for a model, device and precision.
//! - `POST /generate` runs it over a message list.
//! - `POST /device` moves the loaded weights.
//! - `GET /accelerator` reports whether CUDA is usable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::backend::{EngineFactory, EngineSpec, Generation, InferenceEngine};
use super::device::{Device, DeviceProbe};
use crate::chat::Message;
use crate::error::{ChatError, ChatResult};

/// Connect timeout towards the sidecar. Requests themselves are unbounded:
/// a generation may legitimately run for minutes.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct LoadRequest<'a> {
    model: &'a str,
    device: &'a str,
    torch_dtype: &'a str,
    cache_dir: String,
    model_dir: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    text: &'a [Message],
}

#[derive(Serialize)]
struct DeviceRequest<'a> {
    model: &'a str,
    device: &'a str,
}

#[derive(Deserialize)]
struct AcceleratorResponse {
    available: bool,
}

/// Thin client for one sidecar.
#[derive(Clone)]
pub struct RemoteClient {
    client: Client,
    base_url: Url,
}

impl RemoteClient {
    /// Create a client for the sidecar at `base_url`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> ChatResult<Self> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        // Relative joins replace the last path segment unless it ends in '/'.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> ChatResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> ChatResult<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(path)?)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::HttpStatus(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl DeviceProbe for RemoteClient {
    async fn accelerator_available(&self) -> bool {
        let result = async {
            let response = self
                .client
                .get(self.endpoint("accelerator")?)
                .send()
                .await?
                .error_for_status()?;
            Ok::<_, ChatError>(response.json::<AcceleratorResponse>().await?.available)
        }
        .await;

        match result {
            Ok(available) => available,
            Err(err) => {
                tracing::warn!("Accelerator probe failed, assuming none: {err}");
                false
            }
        }
    }
}

/// Pipeline instance living in the sidecar.
pub struct RemotePipeline {
    client: RemoteClient,
    model_id: String,
}

#[async_trait]
impl InferenceEngine for RemotePipeline {
    async fn generate(&self, messages: &[Message]) -> ChatResult<Vec<Generation>> {
        let request = GenerateRequest {
            model: &self.model_id,
            text: messages,
        };
        let response = self.client.post("generate", &request).await?;
        let generations = response.json::<Vec<Generation>>().await?;
        tracing::info!(?generations, "Generated text");
        Ok(generations)
    }

    async fn move_to(&mut self, device: Device) -> ChatResult<()> {
        let request = DeviceRequest {
            model: &self.model_id,
            device: device.as_str(),
        };
        self.client.post("device", &request).await?;
        Ok(())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Loads pipelines into the sidecar.
#[derive(Clone)]
pub struct RemoteFactory {
    client: RemoteClient,
}

impl RemoteFactory {
    /// Factory sharing `client`.
    #[must_use]
    pub const fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EngineFactory for RemoteFactory {
    async fn load(&self, spec: &EngineSpec) -> ChatResult<Box<dyn InferenceEngine>> {
        let request = LoadRequest {
            model: &spec.model_id,
            device: spec.device.as_str(),
            torch_dtype: spec.precision.as_str(),
            cache_dir: spec.cache_dir.display().to_string(),
            model_dir: spec.model_dir.display().to_string(),
        };

        self.client
            .post("load", &request)
            .await
            .map_err(|err| ChatError::ModelLoad {
                model: spec.model_id.clone(),
                reason: err.to_string(),
            })?;

        Ok(Box::new(RemotePipeline {
            client: self.client.clone(),
            model_id: spec.model_id.clone(),
        }))
    }
}

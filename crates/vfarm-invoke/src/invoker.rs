//! Function invocation substrate.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tracing::debug;

use crate::error::{InvokeError, InvokeResult};

/// Live byte fragments of one invocation's response.
pub type FragmentStream = Pin<Box<dyn Stream<Item = InvokeResult<Bytes>> + Send>>;

/// Invokes a named function with a JSON payload, returning its response as a
/// stream of byte fragments.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(
        &self,
        function_name: &str,
        payload: serde_json::Value,
    ) -> InvokeResult<FragmentStream>;
}

/// HTTP-backed invoker: POSTs the payload and consumes the chunked response
/// body as it arrives.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInvoker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn invoke_url(&self, function_name: &str) -> String {
        format!("{}/invoke/{}", self.base_url, function_name)
    }
}

#[async_trait]
impl FunctionInvoker for HttpInvoker {
    async fn invoke(
        &self,
        function_name: &str,
        payload: serde_json::Value,
    ) -> InvokeResult<FragmentStream> {
        let url = self.invoke_url(function_name);
        debug!("Invoking {}", url);

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| InvokeError::transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(InvokeError::transport(format!(
                "{} responded with status {}",
                function_name,
                response.status()
            )));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| InvokeError::transport(e.to_string()));

        Ok(Box::pin(stream))
    }
}

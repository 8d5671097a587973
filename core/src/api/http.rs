use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::operations::{Operation, OperationKind};
use super::{ApiError, ControlApi, Response};

/// Address the daemon listens on unless configured otherwise.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";

/// Key the daemon is started with unless configured otherwise.
pub const DEFAULT_API_KEY: &str = "api-key";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Control API client speaking the daemon's JSON-over-HTTP protocol.
#[derive(Debug, Clone)]
pub struct HttpControlClient {
    http: Client,
    base: Url,
    api_key: String,
}

impl HttpControlClient {
    pub fn new(base: &str, api_key: impl Into<String>) -> Result<Self, ApiError> {
        let mut base = Url::parse(base).map_err(|e| ApiError::Client(Box::new(e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| ApiError::Client(Box::new(e)))?;

        Ok(Self {
            http,
            base,
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, operation: Operation) -> Result<Url, ApiError> {
        let format = match operation.kind {
            OperationKind::Other => "OTHER",
            _ => "JSON",
        };
        self.base
            .join(&format!("{format}/{}", operation.path()))
            .map_err(|e| ApiError::Transport {
                operation,
                source: Box::new(e),
            })
    }

    async fn send(
        &self,
        operation: Operation,
        params: &[(&str, &str)],
    ) -> Result<reqwest::Response, ApiError> {
        let mut url = self.endpoint(operation)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("apikey", &self.api_key);
            for (name, value) in params.iter().filter(|(_, v)| !v.is_empty()) {
                query.append_pair(name, value);
            }
        }

        debug!("Calling {operation}");
        self.http
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                operation,
                source: Box::new(e),
            })
    }
}

#[async_trait]
impl ControlApi for HttpControlClient {
    async fn call(
        &self,
        operation: Operation,
        params: &[(&str, &str)],
    ) -> Result<Response, ApiError> {
        // Rejected calls come back as 4xx with a JSON body carrying `code`,
        // so the body is decoded regardless of status.
        let body = self
            .send(operation, params)
            .await?
            .bytes()
            .await
            .map_err(|e| ApiError::Transport {
                operation,
                source: Box::new(e),
            })?;

        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(ApiError::Decode { operation }),
        }
    }

    async fn fetch(&self, operation: Operation) -> Result<Vec<u8>, ApiError> {
        let response = self.send(operation, &[]).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                operation,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| ApiError::Transport {
            operation,
            source: Box::new(e),
        })?;
        Ok(body.to_vec())
    }
}

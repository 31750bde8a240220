use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use super::{
    BuilderRegistration, CollectionSummary, CreateCollectionRequest, CreateRecordRequest,
    RecordReference, RemoteError, VaultTransport,
};
use crate::{
    config::VaultConfig,
    delegation::Token,
    error::VaultKitResult,
    http_request::{Request, RequestInterceptor},
};

/// Talks to a vault node over its JSON HTTP API.
pub struct HttpTransport {
    base_url: String,
    request: Request,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Default, Deserialize)]
struct CreatedRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "_id", default)]
    alt_id: Option<String>,
}

impl HttpTransport {
    /// Creates a transport for `base_url` with explicit timeout and retry settings.
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request: Request::new(timeout, max_retries),
        }
    }

    /// Creates a transport from a validated configuration.
    ///
    /// # Errors
    /// Returns [`crate::VaultKitError::InvalidConfig`] if the configuration is rejected.
    pub fn from_config(config: &VaultConfig) -> VaultKitResult<Self> {
        config.validate()?;
        Ok(Self::new(
            &config.base_url,
            config.request_timeout(),
            config.max_retries,
        ))
    }

    /// Adds a request interceptor after the default logging one.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request.push_interceptor(interceptor);
        self
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.request.handle(builder).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::classify(status.as_u16(), error_message(&body)))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, RemoteError> {
        let response = self.send(builder).await?;
        response.json().await.map_err(|err| RemoteError::Malformed {
            message: err.to_string(),
        })
    }

    /// Ids come from the vault and are pushed as percent-encoded path segments.
    fn record_url(&self, reference: &RecordReference) -> Result<Url, RemoteError> {
        let base = self.url("/v1/users/data");
        let mut url = Url::parse(&base).map_err(|err| RemoteError::Network {
            url: base.clone(),
            status: None,
            error: err.to_string(),
        })?;
        url.path_segments_mut()
            .map_err(|()| RemoteError::Network {
                url: base,
                status: None,
                error: "base URL cannot carry a path".to_string(),
            })?
            .push(&reference.collection)
            .push(&reference.document);
        Ok(url)
    }
}

/// Extracts a readable message from an error body: `errors`, then `message`, then `error`,
/// then the raw text.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    if let Some(errors) = value.get("errors").and_then(Value::as_array) {
        let joined = errors
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .map(ToString::to_string)
                    .or_else(|| {
                        entry
                            .get("message")
                            .and_then(Value::as_str)
                            .map(ToString::to_string)
                    })
                    .unwrap_or_else(|| entry.to_string())
            })
            .collect::<Vec<_>>()
            .join("; ");
        if !joined.is_empty() {
            return joined;
        }
    }
    ["message", "error"]
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map_or_else(|| body.trim().to_string(), ToString::to_string)
}

#[async_trait]
impl VaultTransport for HttpTransport {
    async fn register(&self, registration: &BuilderRegistration) -> Result<(), RemoteError> {
        let builder = self
            .request
            .post(&self.url("/v1/builders/register"))
            .json(registration);
        self.send(builder).await.map(drop)
    }

    async fn list_collections(&self, token: &Token) -> Result<Vec<CollectionSummary>, RemoteError> {
        let builder = self
            .request
            .get(&self.url("/v1/collections"))
            .bearer_auth(token.as_str());
        let envelope: DataEnvelope<Vec<CollectionSummary>> = self.send_json(builder).await?;
        Ok(envelope.data)
    }

    async fn create_collection(
        &self,
        token: &Token,
        request: &CreateCollectionRequest,
    ) -> Result<(), RemoteError> {
        let builder = self
            .request
            .post(&self.url("/v1/collections"))
            .bearer_auth(token.as_str())
            .json(request);
        self.send(builder).await.map(drop)
    }

    async fn create_record(
        &self,
        token: &Token,
        request: &CreateRecordRequest,
    ) -> Result<String, RemoteError> {
        let builder = self
            .request
            .post(&self.url("/v1/data/owned"))
            .bearer_auth(token.as_str())
            .json(request);
        let response = self.send(builder).await?;
        let body = response.text().await.map_err(|err| RemoteError::Malformed {
            message: err.to_string(),
        })?;
        let created = serde_json::from_str::<DataEnvelope<CreatedRecord>>(&body)
            .map(|envelope| envelope.data)
            .unwrap_or_default();

        created
            .id
            .or(created.alt_id)
            .or_else(|| {
                request
                    .data
                    .get("_id")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            })
            .ok_or_else(|| RemoteError::Malformed {
                message: "created record carries no identifier".to_string(),
            })
    }

    async fn list_record_references(
        &self,
        token: &Token,
        collection: Option<&str>,
    ) -> Result<Vec<RecordReference>, RemoteError> {
        let mut builder = self
            .request
            .get(&self.url("/v1/users/data"))
            .bearer_auth(token.as_str());
        if let Some(collection) = collection {
            builder = builder.query(&[("collection", collection)]);
        }
        let envelope: DataEnvelope<Vec<RecordReference>> = self.send_json(builder).await?;
        Ok(envelope.data)
    }

    async fn read_record(
        &self,
        token: &Token,
        reference: &RecordReference,
    ) -> Result<Value, RemoteError> {
        let builder = self
            .request
            .get(self.record_url(reference)?.as_str())
            .bearer_auth(token.as_str());
        let envelope: DataEnvelope<Value> = self.send_json(builder).await?;
        Ok(envelope.data)
    }

    async fn delete_record(
        &self,
        token: &Token,
        reference: &RecordReference,
    ) -> Result<(), RemoteError> {
        let builder = self
            .request
            .delete(self.record_url(reference)?.as_str())
            .bearer_auth(token.as_str());
        self.send(builder).await.map(drop)
    }
}

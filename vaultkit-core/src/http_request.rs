//! HTTP client wrapper used by [`crate::HttpTransport`], with retries for transient failures.

use std::{sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, Request as HttpRequest, RequestBuilder, Response};

use crate::transport::RemoteError;

/// Observes outgoing requests and their outcome.
pub trait RequestInterceptor: Send + Sync {
    /// Called before every attempt.
    fn on_request(&self, request: &HttpRequest);

    /// Called after every attempt that produced a response.
    fn on_response(&self, url: &str, status: u16);
}

/// Logs every attempt at debug level. Headers are never logged, they carry tokens.
#[derive(Debug, Default)]
pub struct LoggingInterceptor;

impl RequestInterceptor for LoggingInterceptor {
    fn on_request(&self, request: &HttpRequest) {
        log::debug!("vault request: {} {}", request.method(), request.url());
    }

    fn on_response(&self, url: &str, status: u16) {
        log::debug!("vault response: {url} -> {status}");
    }
}

/// A simple wrapper on an HTTP client for making requests. Sets sensible defaults such as timeouts
/// and user-agent, and applies retry middleware for transient failures.
pub(crate) struct Request {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl Request {
    /// Initializes a new `Request` instance. `max_retries` of 3 means 4 attempts in total.
    pub(crate) fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            max_retries,
            interceptors: vec![Arc::new(LoggingInterceptor)],
        }
    }

    /// Adds an interceptor that sees every attempt after the ones already registered.
    pub(crate) fn push_interceptor(&mut self, interceptor: Arc<dyn RequestInterceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Creates a request builder with defaults applied.
    pub(crate) fn req(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("vaultkit-core/{}", env!("CARGO_PKG_VERSION")),
            )
    }

    /// Creates a GET request builder with defaults applied.
    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.req(Method::GET, url)
    }

    /// Creates a POST request builder with defaults applied.
    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.req(Method::POST, url)
    }

    /// Creates a DELETE request builder with defaults applied.
    pub(crate) fn delete(&self, url: &str) -> RequestBuilder {
        self.req(Method::DELETE, url)
    }

    /// Handles sending a request built by `req`/`get`/`post`/`delete` with retries for transient
    /// failures.
    ///
    /// Once retries are exhausted the last response is returned as is, so callers can read the
    /// error body. Only failures without any response become [`RemoteError::Network`].
    pub(crate) async fn handle(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, RemoteError> {
        let Some(template) = request_builder.try_clone() else {
            return settle(self.execute_request_builder(request_builder).await);
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries as usize);

        let result = (|| async {
            let request_builder = template.try_clone().ok_or_else(|| {
                RequestHandleError::permanent(
                    "<unknown>".to_string(),
                    None,
                    "request cannot be retried because it is not cloneable".to_string(),
                )
            })?;
            self.execute_request_builder(request_builder).await
        })
        .retry(backoff)
        .when(|err: &RequestHandleError| err.is_retryable())
        .notify(|err: &RequestHandleError, delay: Duration| {
            log::warn!("retrying vault request to {} in {delay:?}: {}", err.url, err.error);
        })
        .await;
        settle(result)
    }

    async fn execute_request_builder(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, RequestHandleError> {
        let (client, request) = request_builder.build_split();
        let request = request.map_err(|err| {
            RequestHandleError::permanent(
                err.url()
                    .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
                None,
                format!("request build failed: {err}"),
            )
        })?;
        let url = request.url().to_string();
        for interceptor in &self.interceptors {
            interceptor.on_request(&request);
        }

        match client.execute(request).await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                for interceptor in &self.interceptors {
                    interceptor.on_response(&url, status);
                }
                if status == 429 || (500..600).contains(&status) {
                    let mut err = RequestHandleError::retryable(
                        url,
                        Some(status),
                        format!("request error with bad status code {status}"),
                    );
                    err.response = Some(resp);
                    return Err(err);
                }
                Ok(resp)
            }
            Err(err) => {
                if err.is_timeout() || err.is_connect() {
                    return Err(RequestHandleError::retryable(
                        url,
                        None,
                        format!("request timeout/connect error: {err}"),
                    ));
                }

                Err(RequestHandleError::permanent(
                    url,
                    None,
                    format!("request failed: {err}"),
                ))
            }
        }
    }
}

fn settle(result: Result<Response, RequestHandleError>) -> Result<Response, RemoteError> {
    match result {
        Ok(response) => Ok(response),
        Err(RequestHandleError {
            response: Some(response),
            ..
        }) => Ok(response),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug)]
struct RequestHandleError {
    url: String,
    status: Option<u16>,
    error: String,
    retryable: bool,
    /// The last response of a retryable status.
    response: Option<Response>,
}

impl RequestHandleError {
    fn retryable(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: true,
            response: None,
        }
    }

    fn permanent(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: false,
            response: None,
        }
    }

    const fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<RequestHandleError> for RemoteError {
    fn from(value: RequestHandleError) -> Self {
        Self::Network {
            url: value.url,
            status: value.status,
            error: value.error,
        }
    }
}

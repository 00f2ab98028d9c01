use axum::http::Extensions;
use funding_core::FundingError;
use futures::StreamExt;
use log::{info, warn};
use reqwest_middleware::{
    reqwest::{self, Certificate, Client, StatusCode},
    ClientBuilder, ClientWithMiddleware, Middleware, RequestBuilder,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Shared outbound client. Requests are bounded by `timeout` and never
/// retried, a retried payment could go out twice.
pub fn build_reqwest_client(timeout: Duration) -> Result<ClientWithMiddleware, anyhow::Error> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(ClientBuilder::new(client).with(LoggingMiddleware).build())
}

pub fn build_reqwest_tls_client(
    tls_cert: Certificate,
    timeout: Duration,
) -> Result<ClientWithMiddleware, anyhow::Error> {
    let client = Client::builder()
        .add_root_certificate(tls_cert)
        .tls_built_in_root_certs(true)
        .timeout(timeout)
        .build()?;
    Ok(ClientBuilder::new(client).with(LoggingMiddleware).build())
}

struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let method = req.method().clone();
        // query strings are left out, they can carry provider keys
        let url = format!(
            "{}://{}{}",
            req.url().scheme(),
            req.url().host_str().unwrap_or_default(),
            req.url().path()
        );

        info!("Making {} request to: {}", method, url);

        let result = next.run(req, extensions).await;

        match &result {
            Ok(response) => {
                info!("{} {} -> Status: {}", method, url, response.status());
            }
            Err(error) => {
                warn!("{} {} -> Error: {:?}", method, url, error);
            }
        }

        result
    }
}

/// Status and raw body of a provider reply
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ProviderResponse {
    pub fn is_error(&self) -> bool {
        self.status.is_client_error() || self.status.is_server_error()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FundingError> {
        serde_json::from_str(&self.body).map_err(|e| {
            FundingError::MalformedResponse(format!("{} (status {})", e, self.status.as_u16()))
        })
    }

    /// Human readable reason for a failed call: the `message` or `error`
    /// field of a JSON body, else the raw body, else the status line
    pub fn error_message(&self) -> String {
        if let Ok(Value::Object(body)) = serde_json::from_str::<Value>(&self.body) {
            for key in ["message", "error"] {
                if let Some(Value::String(message)) = body.get(key) {
                    return message.clone();
                }
            }
        }

        let raw = self.body.trim();
        if !raw.is_empty() {
            return raw.to_string();
        }

        format!(
            "HTTP {} {}",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or_default()
        )
    }

    pub fn into_error(self) -> FundingError {
        match self.status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                FundingError::Authentication(self.error_message())
            }
            _ => FundingError::Provider(self.error_message()),
        }
    }
}

/// Send a request and read its body, anything below HTTP level becomes a
/// transport error
pub async fn send(request: RequestBuilder) -> Result<ProviderResponse, FundingError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| FundingError::Transport(format!("failed to read response body: {}", e)))?;
    Ok(ProviderResponse { status, body })
}

/// Like [`send`] for endpoints that stream newline delimited updates. Only
/// the first non empty line is read, the connection is dropped after it.
pub async fn send_first_line(request: RequestBuilder) -> Result<ProviderResponse, FundingError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let mut stream = response.bytes_stream();
    let mut buffer = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(body_error)?;
        buffer.extend_from_slice(&chunk);
        if let Some(line) = drain_lines(&mut buffer)
            .into_iter()
            .find(|line| !line.is_empty())
        {
            return Ok(ProviderResponse { status, body: line });
        }
    }

    let body = String::from_utf8_lossy(&buffer).trim().to_string();
    Ok(ProviderResponse { status, body })
}

/// Split the complete lines off the front of `buffer`. A trailing partial
/// line stays buffered, lines are only decoded once whole.
pub fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(end) = buffer.iter().position(|byte| *byte == b'\n') {
        let line: Vec<u8> = buffer.drain(..=end).collect();
        lines.push(String::from_utf8_lossy(&line).trim().to_string());
    }
    lines
}

fn transport_error(error: reqwest_middleware::Error) -> FundingError {
    match error {
        reqwest_middleware::Error::Reqwest(e) => body_error(e),
        e => FundingError::Transport(e.to_string()),
    }
}

fn body_error(error: reqwest::Error) -> FundingError {
    if error.is_timeout() {
        FundingError::Transport(String::from("provider did not answer in time"))
    } else if error.is_connect() {
        FundingError::Transport(format!("could not connect to provider: {}", error))
    } else {
        FundingError::Transport(error.to_string())
    }
}

/// Checking-ids are placed in request paths, so only plain id characters
/// are accepted. Anything else could point the lookup at another resource.
pub fn path_segment(checking_id: &str) -> Result<&str, FundingError> {
    let plain = !checking_id.is_empty()
        && checking_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain {
        Ok(checking_id)
    } else {
        Err(FundingError::InvalidRequest(format!(
            "invalid checking id {:?}",
            checking_id
        )))
    }
}

/// Provider endpoints are configured with or without a trailing slash
pub fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

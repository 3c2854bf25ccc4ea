//! HTTP transport
//!
//! `reqwest`-backed implementation of the transport contract. Relative URLs
//! are joined onto the configured server; responses are decoded as envelopes.

use reqwest::multipart::{Form, Part};
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde_json::Value;

use super::{BoxFuture, Envelope, LoadParams, Method, ProgressFn, Transport, TransportError, UploadFile};

/// Where the backend lives
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend
    pub server_url: String,
    /// Upload endpoint, relative to the server
    pub upload_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_url: "http://localhost:3000".to_string(),
            upload_path: "upload.json".to_string(),
        }
    }
}

/// Transport talking to the backend over HTTP
pub struct HttpTransport {
    config: ClientConfig,
    http_client: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        HttpTransport {
            config,
            http_client: HttpClient::new(),
        }
    }

    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        format!("{}/{}", self.config.server_url.trim_end_matches('/'), url.trim_start_matches('/'))
    }

    async fn decode(response: Response) -> Result<Envelope, TransportError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        // failure envelopes usually come back with a 4xx/5xx, so try them first
        match serde_json::from_str::<Envelope>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(TransportError::Status {
                code: status.as_u16(),
                message: status.canonical_reason().unwrap_or("error").to_string(),
            }),
            Err(e) => Err(TransportError::Decode(e.to_string())),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten parameter values into strings for query strings and form bodies
fn as_pairs(params: &LoadParams) -> Vec<(String, String)> {
    params
        .data
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), text)
        })
        .collect()
}

impl Transport for HttpTransport {
    fn load<'a>(&'a self, url: &'a str, params: LoadParams) -> BoxFuture<'a, Result<Envelope, TransportError>> {
        Box::pin(async move {
            let url = self.absolute(url);
            let pairs = as_pairs(&params);
            log::debug!("http: {:?} {}", params.method, url);

            let request = match params.method {
                Method::Get => self.http_client.get(&url).query(&pairs),
                Method::Post => self.http_client.post(&url).form(&pairs),
            };
            let response = request
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            Self::decode(response).await
        })
    }

    fn upload<'a>(&'a self, file: UploadFile, on_progress: ProgressFn) -> BoxFuture<'a, Result<Envelope, TransportError>> {
        Box::pin(async move {
            let url = self.absolute(&self.config.upload_path);
            let total = file.bytes.len() as u64;
            on_progress(0, total);

            let mut part = Part::bytes(file.bytes).file_name(file.name);
            if let Some(mime) = file.mime {
                part = part
                    .mime_str(&mime)
                    .map_err(|e| TransportError::Network(e.to_string()))?;
            }
            let response = self
                .http_client
                .post(&url)
                .multipart(Form::new().part("upload", part))
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            on_progress(total, total);
            Self::decode(response).await
        })
    }
}

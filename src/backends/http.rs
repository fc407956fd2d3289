//! Shared blocking JSON transport for the HTTP backends.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::BackendError;

pub struct JsonTransport {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl JsonTransport {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BackendError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn client(&self) -> &reqwest::blocking::Client {
        &self.client
    }

    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let response = self.send(self.client.get(self.url(path)))?;
        parse_json(response)
    }

    /// GET with query parameters, url-encoded.
    pub fn get_json_with<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, BackendError> {
        let url = reqwest::Url::parse_with_params(&self.url(path), params)
            .map_err(|e| BackendError::HttpClient(e.to_string()))?;
        let response = self.send(self.client.get(url))?;
        parse_json(response)
    }

    pub fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let response = self.send(self.client.post(self.url(path)).json(body))?;
        parse_json(response)
    }

    /// POST whose response body is ignored.
    pub fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), BackendError> {
        self.send(self.client.post(self.url(path)).json(body))?;
        Ok(())
    }

    pub fn put_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), BackendError> {
        self.send(self.client.put(self.url(path)).json(body))?;
        Ok(())
    }

    pub fn patch_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), BackendError> {
        self.send(self.client.patch(self.url(path)).json(body))?;
        Ok(())
    }

    /// Send and map transport failures and non-2xx statuses.
    pub fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request.send().map_err(|e| {
            if e.is_connect() {
                BackendError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                BackendError::Timeout(self.timeout_secs)
            } else {
                BackendError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(response.url().path().to_string()));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

pub fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    response
        .json()
        .map_err(|e| BackendError::ResponseParsing(e.to_string()))
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_bytes(encoded: &str) -> Result<Vec<u8>, BackendError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| BackendError::ResponseParsing(format!("invalid base64 payload: {e}")))
}

// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use volume_contracts::{KmsClient, KmsRequest, VolumeError};

use crate::{Result, SysError};

#[derive(Debug, Deserialize)]
struct KmsResponse {
    /// Base64 payload
    data: String,
}

/// KMS reached over HTTPS with JSON bodies at `<endpoint>/seal` and
/// `<endpoint>/unseal`.
#[derive(Debug, Clone)]
pub struct HttpKmsClient {
    client: Client,
}

impl HttpKmsClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).https_only(true).build()?;
        Ok(Self { client })
    }

    fn build_url(endpoint: &str, operation: &str) -> String {
        format!("{}/{operation}", endpoint.trim_end_matches('/'))
    }

    async fn call(&self, endpoint: &str, operation: &str, request: &KmsRequest) -> Result<Vec<u8>> {
        let url = Self::build_url(endpoint, operation);
        debug!(%url, slot = request.slot, "KMS request");

        let response = self.client.post(&url).json(request).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: KmsResponse = response.json().await?;
                STANDARD.decode(body.data).map_err(|e| {
                    SysError::OperationFailed(format!("KMS {operation} returned invalid data: {e}"))
                })
            }
            status => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP {status}"));
                Err(SysError::OperationFailed(format!(
                    "KMS {operation} at {endpoint} failed: {status}: {message}"
                )))
            }
        }
    }
}

#[async_trait]
impl KmsClient for HttpKmsClient {
    async fn seal(
        &self,
        endpoint: &str,
        request: &KmsRequest,
    ) -> std::result::Result<Vec<u8>, VolumeError> {
        Ok(self.call(endpoint, "seal", request).await?)
    }

    async fn unseal(
        &self,
        endpoint: &str,
        request: &KmsRequest,
    ) -> std::result::Result<Vec<u8>, VolumeError> {
        Ok(self.call(endpoint, "unseal", request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_cleanly() {
        assert_eq!(
            HttpKmsClient::build_url("https://kms.example.com:4443/", "seal"),
            "https://kms.example.com:4443/seal"
        );
        assert_eq!(
            HttpKmsClient::build_url("https://kms.example.com", "unseal"),
            "https://kms.example.com/unseal"
        );
    }

    #[tokio::test]
    async fn plain_http_is_refused() {
        let client = HttpKmsClient::new(Duration::from_secs(1)).unwrap();
        let request = KmsRequest {
            node_uuid: "node".into(),
            nonce: String::new(),
            slot: 0,
            data: String::new(),
        };
        assert!(client.unseal("http://127.0.0.1:9", &request).await.is_err());
    }
}

//! Vault transit-backend client.
//!
//! Speaks `POST {addr}/v1/{key_storage}/{encrypt|decrypt}/{key_name}` with an
//! `X-Vault-Token` header. Plaintext crosses the wire base64-encoded; the
//! wrapped form is the opaque `ciphertext` string Vault returns. No retries,
//! no caching: transient failures surface to the caller as 503s.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;

use super::{KeyService, KmsError};

const TOKEN_ENV_VAR: &str = "VAULT_TOKEN";
const ADDR_ENV_VAR: &str = "VAULT_ADDR";
const KEY_STORAGE_ENV_VAR: &str = "KEY_STORAGE";
const KEY_NAME_ENV_VAR: &str = "KEY_NAME";

/// Generic Vault response envelope: every payload sits under `"data"`.
#[derive(Debug, Deserialize)]
struct VaultResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct EncryptData {
    ciphertext: String,
}

#[derive(Debug, Deserialize)]
struct DecryptData {
    plaintext: String,
}

/// Key-wrapping client for the Vault transit secrets engine.
pub struct VaultTransit {
    http: Client<HttpConnector, Full<Bytes>>,
    address: String,
    token: String,
    key_storage: String,
    key_name: String,
}

impl VaultTransit {
    /// Build a client from `VAULT_TOKEN`, `VAULT_ADDR`, `KEY_STORAGE` and
    /// `KEY_NAME`. Each variable is read once and then removed from the
    /// process environment so the token does not linger where child processes
    /// or debug dumps could see it.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing variable.
    pub fn from_env() -> anyhow::Result<Self> {
        let token = take_env_var(TOKEN_ENV_VAR)?;
        let address = take_env_var(ADDR_ENV_VAR)?;
        let key_storage = take_env_var(KEY_STORAGE_ENV_VAR)?;
        let key_name = take_env_var(KEY_NAME_ENV_VAR)?;

        Ok(Self {
            http: Client::builder(TokioExecutor::new()).build_http(),
            address,
            token,
            key_storage,
            key_name,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/v1/{}/{}/{}",
            self.address, self.key_storage, action, self.key_name
        )
    }

    async fn call(&self, action: &str, body: String) -> Result<Bytes, KmsError> {
        let uri: hyper::Uri = self
            .endpoint(action)
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| KmsError::Transport(e.to_string()))?;

        let request = Request::post(uri)
            .header("X-Vault-Token", &self.token)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| KmsError::Transport(e.to_string()))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| KmsError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| KmsError::Transport(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(KmsError::Transport(format!(
                "unexpected response code {}; body: {}",
                status,
                String::from_utf8_lossy(&bytes),
            )));
        }

        Ok(bytes)
    }
}

#[async_trait]
impl KeyService for VaultTransit {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let body = format!(r#"{{"plaintext":"{}"}}"#, STANDARD.encode(plaintext));
        let bytes = self.call("encrypt", body).await?;

        let response: VaultResponse<EncryptData> =
            serde_json::from_slice(&bytes).map_err(|e| KmsError::Protocol(e.to_string()))?;

        Ok(response.data.ciphertext.into_bytes())
    }

    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>, KmsError> {
        let ciphertext = std::str::from_utf8(wrapped)
            .map_err(|_| KmsError::Protocol("wrapped key is not valid UTF-8".into()))?;
        let body = serde_json::json!({ "ciphertext": ciphertext }).to_string();
        let bytes = self.call("decrypt", body).await?;

        let response: VaultResponse<DecryptData> =
            serde_json::from_slice(&bytes).map_err(|e| KmsError::Protocol(e.to_string()))?;

        STANDARD
            .decode(&response.data.plaintext)
            .map_err(|e| KmsError::Protocol(e.to_string()))
    }
}

fn take_env_var(name: &str) -> anyhow::Result<String> {
    let value =
        std::env::var(name).map_err(|_| anyhow::anyhow!("env var {name} is not set"))?;
    std::env::remove_var(name);
    if value.is_empty() {
        anyhow::bail!("env var {name} is empty");
    }
    Ok(value)
}

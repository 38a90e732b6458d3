//! Azure Shared Key credentials
//!
//! Holds the storage account name and decoded account key, and signs requests
//! with the Shared Key scheme:
//!
//! ```text
//! Authorization: SharedKey {account}:{base64(HMAC-SHA256(key, string_to_sign))}
//! ```
//!
//! # Example
//!
//! ```
//! use azure_upload_relay::storage::azure::credentials::SharedKeyCredential;
//!
//! let credential = SharedKeyCredential::from_base64("devaccount", "c2VjcmV0LWtleQ==").unwrap();
//! assert_eq!(credential.account(), "devaccount");
//! ```

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Credential errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Storage account name plus decoded account key
#[derive(Clone)]
pub struct SharedKeyCredential {
    account: String,
    key: Vec<u8>,
}

// Never print the key
impl std::fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .field("key", &"**********")
            .finish()
    }
}

impl SharedKeyCredential {
    /// Build a credential from the account name and the base64 account key
    /// as shown in the Azure portal
    pub fn from_base64(
        account: impl Into<String>,
        access_key: &str,
    ) -> Result<Self, CredentialsError> {
        let account = account.into();
        if account.trim().is_empty() {
            return Err(CredentialsError::MissingCredentials(
                "storage account name not set".into(),
            ));
        }
        if access_key.trim().is_empty() {
            return Err(CredentialsError::MissingCredentials(
                "storage access key not set".into(),
            ));
        }

        let key = BASE64_STANDARD.decode(access_key.trim()).map_err(|e| {
            CredentialsError::InvalidCredentials(format!("access key is not valid base64: {}", e))
        })?;

        Ok(Self { account, key })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Sign a prepared string-to-sign and return the `Authorization` value
    pub fn authorization(&self, string_to_sign: &str) -> Result<String, CredentialsError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| CredentialsError::InvalidCredentials(format!("HMAC key error: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!("SharedKey {}:{}", self.account, signature))
    }
}

/// The parts of a blob request that take part in the Shared Key signature
#[derive(Debug, Default)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub content_length: u64,
    pub content_type: &'a str,
    /// `x-ms-*` headers, any order
    pub ms_headers: &'a [(&'a str, &'a str)],
    /// `/{account}{request path}`
    pub resource: &'a str,
    pub query: &'a [(&'a str, &'a str)],
}

impl SignableRequest<'_> {
    /// Build the Shared Key string-to-sign (service version 2015-02-21 and later)
    pub fn string_to_sign(&self) -> String {
        // Content-Length is left empty when zero
        let content_length = match self.content_length {
            0 => String::new(),
            n => n.to_string(),
        };

        let mut headers: Vec<(String, &str)> = self
            .ms_headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.trim()))
            .filter(|(k, _)| k.starts_with("x-ms-"))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        let canonicalized_headers = headers
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        let mut canonicalized_resource = self.resource.to_string();
        let mut query: Vec<(String, &str)> = self
            .query
            .iter()
            .map(|(k, v)| (k.to_lowercase(), *v))
            .collect();
        query.sort_by(|a, b| a.0.cmp(&b.0));
        for (k, v) in &query {
            canonicalized_resource.push_str(&format!("\n{}:{}", k, v));
        }

        format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}\n{}",
            self.method, content_length, self.content_type, canonicalized_headers, canonicalized_resource
        )
    }
}

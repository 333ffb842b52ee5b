// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! QR credential decoding.
//!
//! A lock's QR code carries an issuer URL of the form
//! `https://<issuer-host>/...?mac=<address>&key=<base64>&iv=<hex>`. The `key`
//! parameter is AES-256-CBC ciphertext under a key embedded in the client.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Host every genuine credential URL points at.
pub const ISSUER_HOST: &str = "pslock.ceclin.top";

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;

/// Pre-shared issuer key compiled into the client.
pub const EMBEDDED_KEY: [u8; KEY_SIZE] = [
    0x3f, 0x8a, 0x1c, 0x52, 0xe7, 0x09, 0xb4, 0x6d, 0x21, 0xc3, 0x75, 0x9e, 0x40, 0xfb, 0x12, 0x88,
    0x5a, 0xd6, 0x2e, 0x97, 0x0b, 0x63, 0xcf, 0x14, 0xa9, 0x7e, 0x35, 0xe0, 0x4c, 0x81, 0xbd, 0x26,
];

/// Why a scanned payload did not yield a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Not an issuer URL, or a required parameter is missing.
    #[error("content is not a recognized credential")]
    NotRecognized,
    /// Parameters present but could not be decoded or decrypted.
    #[error("failed to decode credential: {0}")]
    Decode(String),
}

/// Device address and shared key recovered from one QR scan.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub device_address: String,
    /// URL-safe base64 of the decrypted key material.
    pub shared_key: String,
}

impl Credential {
    pub fn new(device_address: impl Into<String>, shared_key: impl Into<String>) -> Self {
        Self {
            device_address: device_address.into(),
            shared_key: shared_key.into(),
        }
    }

    /// Raw bytes written to the lock during pairing.
    pub fn key_bytes(&self) -> Result<Vec<u8>, CredentialError> {
        lenient(&alphabet::URL_SAFE)
            .decode(&self.shared_key)
            .map_err(|e| CredentialError::Decode(format!("shared key: {}", e)))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("device_address", &self.device_address)
            .field("shared_key", &"<redacted>")
            .finish()
    }
}

/// Accepts padded or unpadded input and non-canonical trailing bits.
fn lenient(alphabet: &alphabet::Alphabet) -> GeneralPurpose {
    GeneralPurpose::new(
        alphabet,
        GeneralPurposeConfig::new()
            .with_decode_allow_trailing_bits(true)
            .with_decode_padding_mode(DecodePaddingMode::Indifferent),
    )
}

/// Decodes issuer URLs into [`Credential`]s.
#[derive(Clone)]
pub struct CredentialCodec {
    issuer_host: String,
    key: [u8; KEY_SIZE],
}

impl Default for CredentialCodec {
    fn default() -> Self {
        Self::new(ISSUER_HOST, EMBEDDED_KEY)
    }
}

impl CredentialCodec {
    pub fn new(issuer_host: impl Into<String>, key: [u8; KEY_SIZE]) -> Self {
        Self {
            issuer_host: issuer_host.into(),
            key,
        }
    }

    /// Build a codec from configuration, falling back to the embedded key.
    pub fn from_config(config: &crate::config::CredentialConfig) -> anyhow::Result<Self> {
        let key = match &config.issuer_key {
            Some(hex_key) => {
                let bytes = hex::decode(hex_key)?;
                <[u8; KEY_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
                    anyhow::anyhow!(
                        "issuer key must be {} bytes, got {}",
                        KEY_SIZE,
                        bytes.len()
                    )
                })?
            }
            None => EMBEDDED_KEY,
        };
        Ok(Self::new(config.issuer_host.clone(), key))
    }

    /// Decode scanned text into a credential.
    pub fn decode(&self, content: &str) -> Result<Credential, CredentialError> {
        let url = Url::parse(content.trim()).map_err(|_| CredentialError::NotRecognized)?;
        if !matches!(url.scheme(), "http" | "https")
            || url.host_str() != Some(self.issuer_host.as_str())
        {
            return Err(CredentialError::NotRecognized);
        }

        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        let mac = param("mac").ok_or(CredentialError::NotRecognized)?;
        let encrypted = param("key").ok_or(CredentialError::NotRecognized)?;
        let iv_hex = param("iv").ok_or(CredentialError::NotRecognized)?;

        // Form decoding turns an unescaped '+' into a space. Either alphabet
        // is accepted, padded or not.
        let encrypted: String = encrypted
            .chars()
            .map(|c| match c {
                ' ' | '-' => '+',
                '_' => '/',
                c => c,
            })
            .collect();
        let encrypted = lenient(&alphabet::STANDARD)
            .decode(encrypted)
            .map_err(|e| CredentialError::Decode(format!("key: {}", e)))?;
        let iv = hex::decode(&iv_hex).map_err(|e| CredentialError::Decode(format!("iv: {}", e)))?;

        let plaintext = match decrypt(&encrypted, &self.key, &iv) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to parse QR code content: {}", e);
                return Err(e);
            }
        };

        let credential = Credential::new(mac, URL_SAFE.encode(plaintext));
        info!("Parsed QR code for device {}", credential.device_address);
        debug!("Shared key: {}", credential.shared_key);
        Ok(credential)
    }
}

/// Decrypt AES-256-CBC with PKCS#7 padding.
pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CredentialError> {
    if iv.len() != IV_SIZE {
        return Err(CredentialError::Decode(format!(
            "iv must be {} bytes, got {}",
            IV_SIZE,
            iv.len()
        )));
    }
    Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| CredentialError::Decode(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CredentialError::Decode("bad padding or length".to_string()))
}

/// Encrypt AES-256-CBC with PKCS#7 padding.
pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CredentialError> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| CredentialError::Decode(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

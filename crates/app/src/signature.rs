use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SUPPORTED_ALGORITHM: &str = "sha256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signature mismatch")]
    Mismatch,
    #[error("webhook secret cannot key HMAC-SHA256")]
    InvalidKey,
}

impl SignatureError {
    pub fn problem_type(&self) -> &'static str {
        match self {
            Self::UnsupportedAlgorithm(_) => "unsupported_signature_algorithm",
            Self::Mismatch => "signature_mismatch",
            Self::InvalidKey => "signature_key",
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::UnsupportedAlgorithm(_) => "algorithm",
            Self::Mismatch => "mismatch",
            Self::InvalidKey => "key",
        }
    }
}

/// Hex HMAC-SHA256 of `message_id || timestamp || body`.
pub fn compute(
    secret: &[u8],
    message_id: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a `Twitch-Eventsub-Message-Signature` header (`sha256=<hex>`)
/// against the raw request body.
pub fn verify(
    secret: &[u8],
    message_id: &str,
    timestamp: &str,
    body: &[u8],
    header: &str,
) -> Result<(), SignatureError> {
    let (algorithm, provided) = match header.split_once('=') {
        Some((algorithm, provided)) => (algorithm, provided),
        None => (header, ""),
    };
    if algorithm != SUPPORTED_ALGORITHM {
        return Err(SignatureError::UnsupportedAlgorithm(algorithm.to_string()));
    }
    if provided.is_empty() {
        return Err(SignatureError::Mismatch);
    }

    let expected = compute(secret, message_id, timestamp, body)?;
    if digests_match(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// `subtle::ConstantTimeEq` owns the timing guarantee: equal-length slices are
/// compared byte by byte without early exit. Only the length may leak.
fn digests_match(expected: &[u8], provided: &[u8]) -> bool {
    expected.ct_eq(provided).into()
}

//! Request signing for the gateway API and HMAC helpers for provider webhooks.
//!
//! Backend calls into the settlement server are body-signed:
//!
//! ```text
//! Edupay-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! where the signature is `HMAC-SHA256("{timestamp}.{json_body}", secret)`.
//!
//! Providers sign their webhooks with hex-encoded HMACs instead; the
//! [`verify_hex`] helper checks those in constant time.

/// Header name for the gateway HMAC signature.
pub const SIGNATURE_HEADER: &str = "Edupay-Signature";

/// Maximum allowed age of a signature (in seconds).
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

/// Marker trait for types that can participate in body signing via
/// [`SignedObject`].
pub trait Signature: for<'de> serde::Deserialize<'de> + serde::Serialize {}

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

/// A signed API body carrying its typed payload, timestamp, raw JSON, and
/// HMAC-SHA256 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedObject<T: Signature> {
    pub body: T,
    pub timestamp: i64,
    pub json: String,
    pub signature: Box<[u8]>,
}

impl<T: Signature> SignedObject<T> {
    /// Serialize `body` and sign it with the current timestamp.
    pub fn new(body: T, key: &[u8]) -> Result<Self, serde_json::Error> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        Self::new_at(body, key, now)
    }

    pub fn new_at(body: T, key: &[u8], timestamp: i64) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(&body)?;
        let data = format!("{timestamp}.{json}");
        let signature = ring::hmac::sign(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
            data.as_bytes(),
        );
        let signature = signature.as_ref().to_owned().into_boxed_slice();
        Ok(Self {
            body,
            timestamp,
            json,
            signature,
        })
    }

    /// Reconstruct a [`SignedObject`] from a raw `Edupay-Signature` header
    /// value and the JSON request body string.
    ///
    /// This parses the header and deserializes the body but does **not**
    /// verify the HMAC. Call [`verify`](Self::verify) for that.
    pub fn from_header_and_body(
        header_value: &str,
        body_json: String,
    ) -> Result<Self, SignatureError> {
        let (timestamp, signature) = parse_signature_header(header_value)?;
        let body: T = serde_json::from_str(&body_json)?;
        Ok(Self {
            body,
            timestamp,
            json: body_json,
            signature,
        })
    }

    /// Verify the HMAC signature and timestamp freshness, consuming `self`
    /// and returning the authenticated payload.
    pub fn verify(self, key: &[u8]) -> Result<T, SignatureError> {
        let data = format!("{}.{}", self.timestamp, self.json);
        ring::hmac::verify(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
            data.as_bytes(),
            self.signature.as_ref(),
        )?;
        check_timestamp(self.timestamp)?;
        Ok(self.body)
    }

    /// Format the full `Edupay-Signature` header value (`{timestamp}.{b64}`).
    pub fn to_header(&self) -> String {
        format_signature_header(self.timestamp, &self.signature)
    }
}

/// Parse an `Edupay-Signature` header value (`{timestamp}.{base64}`) into
/// `(timestamp, raw_signature_bytes)`.
pub fn parse_signature_header(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let (timestamp, encoded) = value.split_once('.').ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature_bytes = fast32::base64::RFC4648_NOPAD
        .decode_str(encoded)
        .map_err(|_| SignatureError::InvalidBase64)?
        .into_boxed_slice();
    Ok((timestamp, signature_bytes))
}

pub fn format_signature_header(timestamp: i64, signature: &[u8]) -> String {
    format!(
        "{}.{}",
        timestamp,
        fast32::base64::RFC4648_NOPAD.encode(signature)
    )
}

/// Check that a signature timestamp is within [`MAX_SIGNATURE_AGE`].
pub fn check_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    if now - timestamp > MAX_SIGNATURE_AGE {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

/// HMAC algorithms used by provider webhook signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacAlgorithm {
    Sha256,
    Sha512,
}

impl HmacAlgorithm {
    fn ring(self) -> ring::hmac::Algorithm {
        match self {
            HmacAlgorithm::Sha256 => ring::hmac::HMAC_SHA256,
            HmacAlgorithm::Sha512 => ring::hmac::HMAC_SHA512,
        }
    }
}

/// Lowercase hex HMAC of `data`.
pub fn hmac_hex(algorithm: HmacAlgorithm, key: &[u8], data: &[u8]) -> String {
    let tag = ring::hmac::sign(&ring::hmac::Key::new(algorithm.ring(), key), data);
    hex::encode(tag.as_ref())
}

/// Constant-time check of a hex-encoded HMAC.
///
/// Case-insensitive in the hex digits. Anything that does not decode as hex
/// is a mismatch.
pub fn verify_hex(algorithm: HmacAlgorithm, key: &[u8], data: &[u8], provided_hex: &str) -> bool {
    let Ok(provided) = hex::decode(provided_hex.trim()) else {
        return false;
    };
    ring::hmac::verify(
        &ring::hmac::Key::new(algorithm.ring(), key),
        data,
        &provided,
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Ping {
        value: u32,
    }

    impl Signature for Ping {}

    #[test]
    fn test_signed_object_verifies() {
        let signed = SignedObject::new(Ping { value: 7 }, b"secret").unwrap();
        let header = signed.to_header();
        let parsed = SignedObject::<Ping>::from_header_and_body(&header, signed.json.clone()).unwrap();
        assert_eq!(parsed.verify(b"secret").unwrap(), Ping { value: 7 });
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let signed = SignedObject::new(Ping { value: 7 }, b"secret").unwrap();
        assert!(matches!(
            signed.verify(b"other"),
            Err(SignatureError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let signed = SignedObject::new(Ping { value: 7 }, b"secret").unwrap();
        let header = signed.to_header();
        let parsed =
            SignedObject::<Ping>::from_header_and_body(&header, r#"{"value":8}"#.to_owned()).unwrap();
        assert!(parsed.verify(b"secret").is_err());
    }

    #[test]
    fn test_expired_signature_is_rejected() {
        let old = time::OffsetDateTime::now_utc().unix_timestamp() - MAX_SIGNATURE_AGE - 10;
        let signed = SignedObject::new_at(Ping { value: 1 }, b"secret", old).unwrap();
        assert!(matches!(signed.verify(b"secret"), Err(SignatureError::Expired)));
    }

    #[test]
    fn test_header_format_errors() {
        assert!(matches!(
            parse_signature_header("no-dot"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("abc.AAAA"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("1700000000.!!!"),
            Err(SignatureError::InvalidBase64)
        ));
    }

    #[test]
    fn test_hex_hmac() {
        // RFC 4231 test case 2
        let expected = "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843";
        let tag = hmac_hex(HmacAlgorithm::Sha256, b"Jefe", b"what do ya want for nothing?");
        assert_eq!(tag, expected);
        assert!(verify_hex(
            HmacAlgorithm::Sha256,
            b"Jefe",
            b"what do ya want for nothing?",
            &expected.to_uppercase()
        ));
        assert!(!verify_hex(HmacAlgorithm::Sha256, b"Jefe", b"other", expected));
        assert!(!verify_hex(HmacAlgorithm::Sha512, b"Jefe", b"x", "not hex"));
    }
}

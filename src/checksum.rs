//! Checksum Codec
//!
//! Appends a short digest suffix to a string and validates it on the way
//! back in. The digest is MD5 over `data || magic`, encoded as hex or
//! unpadded URL-safe base64 and truncated to a fixed number of characters.
//!
//! The magic value is compiled into every deployment and is not a secret.
//! This codec detects corruption and truncation before more expensive work
//! (decryption) runs. It does not stop an adversary who knows the magic from
//! forging a matching suffix; confidentiality and authenticity of tokens come
//! from the cipher in [`crate::token`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

/// Suffix length used when a configured length is zero.
pub const DEFAULT_CHECKSUM_LENGTH: usize = 3;

/// Errors from [`ChecksumCodec::check`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChecksumError {
    /// Input too short to carry a checksum, or the suffix does not match
    #[error("data invalid")]
    DataInvalid,
}

/// Text encoding of the digest before truncation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestEncoding {
    /// Lower-case hex
    Hex,
    /// Unpadded URL-safe base64
    #[default]
    Base64,
}

impl DigestEncoding {
    /// Parse an encoding name. Anything other than `"hex"` selects base64.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("hex") {
            Self::Hex
        } else {
            Self::Base64
        }
    }
}

/// Adds and verifies truncated digest suffixes.
#[derive(Debug, Clone)]
pub struct ChecksumCodec {
    magic: String,
    length: usize,
    encoding: DigestEncoding,
}

impl ChecksumCodec {
    /// Create a codec. A `length` of zero falls back to
    /// [`DEFAULT_CHECKSUM_LENGTH`].
    pub fn new(magic: impl Into<String>, length: usize, encoding: DigestEncoding) -> Self {
        let length = if length == 0 {
            DEFAULT_CHECKSUM_LENGTH
        } else {
            length
        };
        Self {
            magic: magic.into(),
            length,
            encoding,
        }
    }

    /// Number of characters appended by [`add`](Self::add).
    pub fn length(&self) -> usize {
        self.length
    }

    /// Return `data` with its checksum appended.
    pub fn add(&self, data: &str) -> String {
        let mut out = String::with_capacity(data.len() + self.length);
        out.push_str(data);
        out.push_str(&self.digest(data));
        out
    }

    /// Strip and verify the checksum suffix, returning the original data.
    ///
    /// The input must carry at least two characters beyond the suffix.
    pub fn check<'a>(&self, data: &'a str) -> Result<&'a str, ChecksumError> {
        if data.len() <= self.length + 1 || !data.is_char_boundary(data.len() - self.length) {
            return Err(ChecksumError::DataInvalid);
        }
        let (body, suffix) = data.split_at(data.len() - self.length);
        if self.digest(body) != suffix {
            return Err(ChecksumError::DataInvalid);
        }
        Ok(body)
    }

    fn digest(&self, data: &str) -> String {
        let mut ctx = md5::Context::new();
        ctx.consume(data.as_bytes());
        ctx.consume(self.magic.as_bytes());
        let sum = ctx.compute();

        let mut encoded = match self.encoding {
            DigestEncoding::Hex => hex::encode(sum.0),
            DigestEncoding::Base64 => URL_SAFE_NO_PAD.encode(sum.0),
        };
        encoded.truncate(self.length);
        encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> ChecksumCodec {
        ChecksumCodec::new("1654fb0cf72bdcaf", 4, DigestEncoding::Base64)
    }

    #[test]
    fn test_add_then_check_returns_original() {
        let codec = codec();
        let signed = codec.add("T1abcdef");
        assert_eq!(signed.len(), "T1abcdef".len() + 4);
        assert_eq!(codec.check(&signed), Ok("T1abcdef"));
    }

    #[test]
    fn test_hex_encoding() {
        let codec = ChecksumCodec::new("magic", 6, DigestEncoding::Hex);
        let signed = codec.add("payload");
        let suffix = &signed["payload".len()..];
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(codec.check(&signed), Ok("payload"));
    }

    #[test]
    fn test_hex_suffix_matches_md5() {
        let codec = ChecksumCodec::new("", 32, DigestEncoding::Hex);
        // md5("abc")
        assert_eq!(
            codec.add("abc"),
            "abc900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn test_zero_length_uses_default() {
        let codec = ChecksumCodec::new("m", 0, DigestEncoding::Hex);
        assert_eq!(codec.length(), DEFAULT_CHECKSUM_LENGTH);
    }

    #[test]
    fn test_short_input_rejected() {
        let codec = codec();
        assert_eq!(codec.check(""), Err(ChecksumError::DataInvalid));
        assert_eq!(codec.check("abcd"), Err(ChecksumError::DataInvalid));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let codec = codec();
        let signed = codec.add("hello world");
        let tampered = signed.replacen('h', "j", 1);
        assert_eq!(codec.check(&tampered), Err(ChecksumError::DataInvalid));
    }

    #[test]
    fn test_different_magic_rejected() {
        let signed = codec().add("hello world");
        let other = ChecksumCodec::new("another-magic", 4, DigestEncoding::Base64);
        assert_eq!(other.check(&signed), Err(ChecksumError::DataInvalid));
    }

    #[test]
    fn test_multibyte_boundary_rejected_not_panicking() {
        let codec = ChecksumCodec::new("m", 3, DigestEncoding::Hex);
        assert_eq!(codec.check("\u{00e9}\u{00e9}"), Err(ChecksumError::DataInvalid));
    }

    #[test]
    fn test_encoding_parse() {
        assert_eq!(DigestEncoding::parse("HEX"), DigestEncoding::Hex);
        assert_eq!(DigestEncoding::parse("base64"), DigestEncoding::Base64);
    }
}

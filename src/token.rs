//! Session Token Codec
//!
//! Turns a session identity into an opaque string and back:
//!
//! ```text
//! <tag> + base64(AES-CFB("<hex userType>|<hex userID>|<hex expireTime>|<nonce>")) + <checksum>
//! ```
//!
//! - `tag` is `T1` for registered users and `A1` for anonymous sessions.
//! - The nonce is 8 random alphanumeric characters, so two logins with the
//!   same identity and expiry never produce the same ciphertext.
//! - The checksum suffix comes from [`ChecksumCodec`] and rejects corrupted
//!   or truncated input before the cipher runs.
//!
//! Expiry is not enforced here. [`TokenCodec::decrypt`] returns the embedded
//! expire time and callers compare it with their own clock, which keeps
//! "malformed" and "stale" as separate outcomes.
//!
//! The cipher key and IV are fixed for the life of the process. A fresh
//! stream cipher is built for every call, so a `TokenCodec` can be shared
//! across tasks without locking.
//!
//! # Usage
//!
//! ```ignore
//! use account_guard::token::{TokenCodec, TokenTag};
//!
//! let codec = TokenCodec::new(key, iv, checksum)?;
//! let token = codec.encrypt(TokenTag::Registered, 1, user_id, expire_at);
//! let claims = codec.decrypt(&token)?;
//! assert_eq!(claims.user_id, user_id);
//! ```

use aes::cipher::{generic_array::GenericArray, AsyncStreamCipher, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use rand::{distributions::Alphanumeric, Rng};

use crate::checksum::{ChecksumCodec, ChecksumError};
use crate::config::ConfigError;

/// Length of the version tag at the front of every token.
pub const TAG_LENGTH: usize = 2;

/// Length of the random nonce inside the plaintext.
pub const NONCE_LENGTH: usize = 8;

const IV_LENGTH: usize = 16;

// ============================================================================
// Types
// ============================================================================

/// Token version tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTag {
    /// `T1`: a registered user's session
    Registered,
    /// `A1`: an anonymous session
    Anonymous,
}

impl TokenTag {
    /// Wire representation of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "T1",
            Self::Anonymous => "A1",
        }
    }

    /// Parse a wire tag.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "T1" => Some(Self::Registered),
            "A1" => Some(Self::Anonymous),
            _ => None,
        }
    }
}

/// Identity recovered from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub tag: TokenTag,
    pub user_type: i16,
    pub user_id: i64,
    /// Unix seconds
    pub expire_time: i64,
}

impl TokenClaims {
    /// A token is expired once its expire time is strictly in the past.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expire_time < now
    }
}

/// Reasons a token fails to decode. All of them are format errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token too short")]
    TooShort,

    #[error("unknown token tag")]
    UnknownTag,

    #[error("token checksum mismatch")]
    Checksum(#[from] ChecksumError),

    #[error("token body is not valid base64")]
    Encoding,

    #[error("malformed token payload")]
    Payload,
}

#[derive(Clone)]
enum CipherKey {
    Aes128([u8; 16]),
    Aes192([u8; 24]),
    Aes256([u8; 32]),
}

impl CipherKey {
    fn from_slice(key: &[u8]) -> Result<Self, ConfigError> {
        let invalid = |_| ConfigError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Ok(Self::Aes128(key.try_into().map_err(invalid)?)),
            24 => Ok(Self::Aes192(key.try_into().map_err(invalid)?)),
            32 => Ok(Self::Aes256(key.try_into().map_err(invalid)?)),
            n => Err(ConfigError::InvalidKeyLength(n)),
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Encrypts and decrypts session tokens.
#[derive(Clone)]
pub struct TokenCodec {
    key: CipherKey,
    iv: [u8; IV_LENGTH],
    checksum: ChecksumCodec,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("key", &"[REDACTED]")
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl TokenCodec {
    /// Build a codec from raw key material.
    ///
    /// The key selects AES-128, AES-192 or AES-256 by length. Only the first
    /// 16 bytes of `iv` are used. Failure here means the service cannot
    /// issue or read sessions and must not start.
    pub fn new(key: &[u8], iv: &[u8], checksum: ChecksumCodec) -> Result<Self, ConfigError> {
        let key = CipherKey::from_slice(key)?;
        let iv: [u8; IV_LENGTH] = iv
            .get(..IV_LENGTH)
            .and_then(|s| s.try_into().ok())
            .ok_or(ConfigError::InvalidIvLength(iv.len()))?;

        Ok(Self { key, iv, checksum })
    }

    /// Issue a token for the given identity.
    pub fn encrypt(&self, tag: TokenTag, user_type: i16, user_id: i64, expire_time: i64) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LENGTH)
            .map(char::from)
            .collect();
        let plaintext = format!(
            "{}|{}|{}|{}",
            signed_hex(i64::from(user_type)),
            signed_hex(user_id),
            signed_hex(expire_time),
            nonce
        );

        let mut buf = plaintext.into_bytes();
        self.encrypt_in_place(&mut buf);

        let mut token = String::with_capacity(TAG_LENGTH + buf.len() * 4 / 3 + 8);
        token.push_str(tag.as_str());
        token.push_str(&STANDARD_NO_PAD.encode(&buf));
        self.checksum.add(&token)
    }

    /// Issue an anonymous (`A1`) token.
    pub fn encrypt_anonymous(&self, user_type: i16, user_id: i64, expire_time: i64) -> String {
        self.encrypt(TokenTag::Anonymous, user_type, user_id, expire_time)
    }

    /// Decode a token. Does not check expiry.
    pub fn decrypt(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let tag = token.get(..TAG_LENGTH).ok_or(TokenError::TooShort)?;
        let tag = TokenTag::parse(tag).ok_or(TokenError::UnknownTag)?;

        let body = self.checksum.check(token)?;
        let ciphertext = STANDARD_NO_PAD
            .decode(&body[TAG_LENGTH..])
            .map_err(|_| TokenError::Encoding)?;

        let mut buf = ciphertext;
        self.decrypt_in_place(&mut buf);
        let plaintext = String::from_utf8(buf).map_err(|_| TokenError::Payload)?;

        let fields: Vec<&str> = plaintext.splitn(4, '|').collect();
        let [user_type, user_id, expire_time, _nonce] = fields.as_slice() else {
            return Err(TokenError::Payload);
        };

        Ok(TokenClaims {
            tag,
            user_type: i16::from_str_radix(user_type, 16).map_err(|_| TokenError::Payload)?,
            user_id: i64::from_str_radix(user_id, 16).map_err(|_| TokenError::Payload)?,
            expire_time: i64::from_str_radix(expire_time, 16).map_err(|_| TokenError::Payload)?,
        })
    }

    fn encrypt_in_place(&self, buf: &mut [u8]) {
        let iv = GenericArray::from_slice(&self.iv);
        match &self.key {
            CipherKey::Aes128(k) => {
                cfb_mode::Encryptor::<Aes128>::new(GenericArray::from_slice(k), iv).encrypt(buf)
            }
            CipherKey::Aes192(k) => {
                cfb_mode::Encryptor::<Aes192>::new(GenericArray::from_slice(k), iv).encrypt(buf)
            }
            CipherKey::Aes256(k) => {
                cfb_mode::Encryptor::<Aes256>::new(GenericArray::from_slice(k), iv).encrypt(buf)
            }
        }
    }

    fn decrypt_in_place(&self, buf: &mut [u8]) {
        let iv = GenericArray::from_slice(&self.iv);
        match &self.key {
            CipherKey::Aes128(k) => {
                cfb_mode::Decryptor::<Aes128>::new(GenericArray::from_slice(k), iv).decrypt(buf)
            }
            CipherKey::Aes192(k) => {
                cfb_mode::Decryptor::<Aes192>::new(GenericArray::from_slice(k), iv).decrypt(buf)
            }
            CipherKey::Aes256(k) => {
                cfb_mode::Decryptor::<Aes256>::new(GenericArray::from_slice(k), iv).decrypt(buf)
            }
        }
    }
}

/// Hex with a leading minus for negative values, so `from_str_radix` reads it back.
fn signed_hex(v: i64) -> String {
    if v < 0 {
        format!("-{:x}", v.unsigned_abs())
    } else {
        format!("{:x}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::DigestEncoding;

    const KEY: &[u8] = b"cde6ca958b95b08db5f53c8f583dcb62";
    const IV: &[u8] = b"6760ca184fcee8c3194bf377d213d900";

    fn codec() -> TokenCodec {
        let checksum = ChecksumCodec::new("1654fb0cf72bdcaf", 4, DigestEncoding::Base64);
        TokenCodec::new(KEY, IV, checksum).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        for (user_type, user_id, expire) in [
            (1_i16, 10001_i64, 1_700_000_000_i64),
            (0, 0, 0),
            (i16::MAX, i64::MAX, i64::MAX),
            (-1, -42, i64::MIN),
        ] {
            let token = codec.encrypt(TokenTag::Registered, user_type, user_id, expire);
            assert!(token.starts_with("T1"));
            let claims = codec.decrypt(&token).unwrap();
            assert_eq!(claims.tag, TokenTag::Registered);
            assert_eq!(claims.user_type, user_type);
            assert_eq!(claims.user_id, user_id);
            assert_eq!(claims.expire_time, expire);
        }
    }

    #[test]
    fn test_anonymous_tag() {
        let codec = codec();
        let token = codec.encrypt_anonymous(0, 7, 100);
        assert!(token.starts_with("A1"));
        assert_eq!(codec.decrypt(&token).unwrap().tag, TokenTag::Anonymous);
    }

    #[test]
    fn test_nonce_makes_tokens_unique() {
        let codec = codec();
        let a = codec.encrypt(TokenTag::Registered, 1, 5, 99);
        let b = codec.encrypt(TokenTag::Registered, 1, 5, 99);
        assert_ne!(a, b);
    }

    #[test]
    fn test_single_character_tamper_rejected() {
        let codec = codec();
        let token = codec.encrypt(TokenTag::Registered, 1, 10001, 1_700_000_000);
        for (i, c) in token.char_indices() {
            let replacement = if c == 'A' { 'B' } else { 'A' };
            let mut tampered = token.clone();
            tampered.replace_range(i..i + 1, &replacement.to_string());
            assert!(codec.decrypt(&tampered).is_err(), "tamper at {} accepted", i);
        }
    }

    #[test]
    fn test_truncated_tokens_rejected() {
        let codec = codec();
        let token = codec.encrypt(TokenTag::Registered, 1, 10001, 1_700_000_000);
        for len in 0..=(TAG_LENGTH + 4) {
            assert!(codec.decrypt(&token[..len]).is_err());
        }
        assert!(codec.decrypt(&token[..token.len() - 1]).is_err());
    }

    #[test]
    fn test_unknown_tag() {
        let codec = codec();
        let token = codec.encrypt(TokenTag::Registered, 1, 1, 1);
        let forged = format!("X9{}", &token[2..]);
        assert_eq!(codec.decrypt(&forged), Err(TokenError::UnknownTag));
        assert_eq!(codec.decrypt("T"), Err(TokenError::TooShort));
    }

    #[test]
    fn test_checksum_error_is_distinct() {
        let codec = codec();
        let token = codec.encrypt(TokenTag::Registered, 1, 1, 1);
        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'z' { 'y' } else { 'z' });
        assert_eq!(
            codec.decrypt(&tampered),
            Err(TokenError::Checksum(ChecksumError::DataInvalid))
        );
    }

    #[test]
    fn test_valid_checksum_over_garbage_payload() {
        let codec = codec();
        let checksum = ChecksumCodec::new("1654fb0cf72bdcaf", 4, DigestEncoding::Base64);
        let forged = checksum.add("T1AAAA");
        assert_eq!(codec.decrypt(&forged), Err(TokenError::Payload));
        let bad_b64 = checksum.add("T1!!!!");
        assert_eq!(codec.decrypt(&bad_b64), Err(TokenError::Encoding));
    }

    #[test]
    fn test_expiry_boundary() {
        let claims = TokenClaims {
            tag: TokenTag::Registered,
            user_type: 1,
            user_id: 1,
            expire_time: 1000,
        };
        assert!(!claims.is_expired_at(999));
        assert!(!claims.is_expired_at(1000));
        assert!(claims.is_expired_at(1001));
    }

    #[test]
    fn test_key_and_iv_validation() {
        let checksum = ChecksumCodec::new("m", 4, DigestEncoding::Base64);
        assert!(matches!(
            TokenCodec::new(b"short", IV, checksum.clone()),
            Err(ConfigError::InvalidKeyLength(5))
        ));
        assert!(matches!(
            TokenCodec::new(KEY, b"tiny", checksum.clone()),
            Err(ConfigError::InvalidIvLength(4))
        ));
        assert!(TokenCodec::new(&KEY[..16], &IV[..16], checksum.clone()).is_ok());
        assert!(TokenCodec::new(&KEY[..24], IV, checksum).is_ok());
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", codec());
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("cde6ca95"));
    }
}

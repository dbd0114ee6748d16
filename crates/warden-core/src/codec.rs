//! Symmetric message codec shared by every peer in the fleet.
//!
//! AES-256 in CBC mode with PKCS#7 padding, a 256-bit key and a 128-bit IV.
//! Ciphertexts travel as standard base64 text. There is no key exchange:
//! both ends must be configured with the same key and IV, and the built-in
//! defaults exist only so that an unconfigured fleet can still talk.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// IV length in bytes (128 bits).
pub const IV_LEN: usize = 16;

const BLOCK_LEN: usize = 16;

/// Built-in shared key used when none is configured.
pub const DEFAULT_KEY: [u8; KEY_LEN] = *b"warden-shared-fleet-key-32bytes!";

/// Built-in shared IV used when none is configured.
pub const DEFAULT_IV: [u8; IV_LEN] = *b"warden-fleet-iv!";

/// Errors produced by [`MessageCodec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("ciphertext is not valid base64")]
    InvalidEncoding,

    #[error("ciphertext is truncated ({len} bytes is not a whole number of blocks)")]
    Truncated { len: usize },

    #[error("padding mismatch (wrong key/IV or corrupted ciphertext)")]
    Padding,

    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid {what} length: {got} bytes (expected {expected})")]
    InvalidKeyLength {
        what: &'static str,
        got: usize,
        expected: usize,
    },
}

/// Stateless encrypt/decrypt of message payloads.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageCodec {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl MessageCodec {
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Builds a codec from base64-encoded key and IV.
    pub fn from_base64(key: &str, iv: &str) -> Result<Self, CodecError> {
        let key = decode_fixed::<KEY_LEN>(key, "key")?;
        let iv = decode_fixed::<IV_LEN>(iv, "iv")?;
        Ok(Self::new(key, iv))
    }

    /// Builds a codec from optional base64 overrides.
    ///
    /// Whichever of key or IV is absent keeps its built-in value.
    pub fn with_overrides(key: Option<&str>, iv: Option<&str>) -> Result<Self, CodecError> {
        let key = match key {
            Some(key) => decode_fixed::<KEY_LEN>(key, "key")?,
            None => DEFAULT_KEY,
        };
        let iv = match iv {
            Some(iv) => decode_fixed::<IV_LEN>(iv, "iv")?,
            None => DEFAULT_IV,
        };
        Ok(Self::new(key, iv))
    }

    /// Returns true if this codec uses the built-in key and IV.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.key == DEFAULT_KEY && self.iv == DEFAULT_IV
    }

    /// Encrypts `plaintext` and returns base64 ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        STANDARD.encode(ciphertext)
    }

    /// Decrypts base64 ciphertext produced by [`MessageCodec::encrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CodecError> {
        let bytes = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| CodecError::InvalidEncoding)?;

        if bytes.is_empty() || bytes.len() % BLOCK_LEN != 0 {
            return Err(CodecError::Truncated { len: bytes.len() });
        }

        let plaintext = Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&bytes)
            .map_err(|_| CodecError::Padding)?;

        String::from_utf8(plaintext).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_KEY, DEFAULT_IV)
    }
}

// Key material stays out of logs.
impl std::fmt::Debug for MessageCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCodec")
            .field("default_key", &self.is_default())
            .finish_non_exhaustive()
    }
}

fn decode_fixed<const N: usize>(encoded: &str, what: &'static str) -> Result<[u8; N], CodecError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| CodecError::InvalidEncoding)?;

    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| CodecError::InvalidKeyLength {
        what,
        got: bytes.len(),
        expected: N,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let codec = MessageCodec::default();
        let ciphertext = codec.encrypt("switch to region eu-west");
        assert_ne!(ciphertext, "switch to region eu-west");
        assert_eq!(codec.decrypt(&ciphertext).unwrap(), "switch to region eu-west");
    }

    #[test]
    fn test_encryption_is_deterministic_with_fixed_iv() {
        let codec = MessageCodec::default();
        assert_eq!(codec.encrypt("ping"), codec.encrypt("ping"));
    }

    #[test]
    fn test_empty_plaintext_pads_to_one_block() {
        let codec = MessageCodec::default();
        let ciphertext = codec.encrypt("");
        let raw = STANDARD.decode(&ciphertext).unwrap();
        assert_eq!(raw.len(), BLOCK_LEN);
        assert_eq!(codec.decrypt(&ciphertext).unwrap(), "");
    }

    #[test]
    fn test_decrypt_rejects_bad_base64() {
        let codec = MessageCodec::default();
        assert_eq!(codec.decrypt("not base64 !!"), Err(CodecError::InvalidEncoding));
    }

    #[test]
    fn test_decrypt_rejects_truncated_input() {
        let codec = MessageCodec::default();
        let ciphertext = codec.encrypt("a message spanning two blocks!!");
        let mut raw = STANDARD.decode(&ciphertext).unwrap();
        raw.truncate(raw.len() - 3);
        let truncated = STANDARD.encode(&raw);

        assert!(matches!(
            codec.decrypt(&truncated),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(codec.decrypt(""), Err(CodecError::Truncated { len: 0 })));
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let sender = MessageCodec::default();
        let receiver = MessageCodec::new([7u8; KEY_LEN], DEFAULT_IV);
        let ciphertext = sender.encrypt("secret");

        // A wrong key almost always breaks the padding; if it happens to
        // unpad, the bytes will not be the original text.
        match receiver.decrypt(&ciphertext) {
            Ok(text) => assert_ne!(text, "secret"),
            Err(e) => assert!(matches!(e, CodecError::Padding | CodecError::InvalidUtf8)),
        }
    }

    #[test]
    fn test_from_base64() {
        let key = STANDARD.encode([1u8; KEY_LEN]);
        let iv = STANDARD.encode([2u8; IV_LEN]);
        let codec = MessageCodec::from_base64(&key, &iv).unwrap();
        assert!(!codec.is_default());
        assert_eq!(codec.decrypt(&codec.encrypt("hi")).unwrap(), "hi");
    }

    #[test]
    fn test_from_base64_rejects_short_key() {
        let key = STANDARD.encode([1u8; 16]);
        let iv = STANDARD.encode([2u8; IV_LEN]);
        assert_eq!(
            MessageCodec::from_base64(&key, &iv),
            Err(CodecError::InvalidKeyLength {
                what: "key",
                got: 16,
                expected: KEY_LEN,
            })
        );
    }

    #[test]
    fn test_with_overrides() {
        assert!(MessageCodec::with_overrides(None, None).unwrap().is_default());

        let key = STANDARD.encode([3u8; KEY_LEN]);
        let codec = MessageCodec::with_overrides(Some(&key), None).unwrap();
        assert_eq!(codec, MessageCodec::new([3u8; KEY_LEN], DEFAULT_IV));

        assert!(MessageCodec::with_overrides(None, Some("AAAA")).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", MessageCodec::default());
        assert!(!rendered.contains("warden-shared"));
        assert!(rendered.contains("default_key: true"));
    }
}

//! AES-256-CBC callback envelope.
//!
//! Plaintext frame layout after decryption and PKCS#7 removal:
//!
//! ```text
//! [0..4)        big-endian u32 body length L
//! [4..20)       16 random bytes (ignored)
//! [20..20+L)    UTF-8 message body
//! [20+L..)      receive id (corp id of the sender)
//! ```
//!
//! The platform pads to a 32-byte boundary, so pad values 1..=32 are valid.

use aes::Aes256;
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CallbackError;

pub const ENCODED_KEY_LEN: usize = 43;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const AES_BLOCK: usize = 16;
const PAD_BLOCK: usize = 32;
const RANDOM_LEN: usize = 16;
const HEADER_LEN: usize = 4 + RANDOM_LEN;

/// Configured keys are 43 base64 chars; the last one may carry non-zero
/// trailing bits, which the strict engine would reject.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

type Decryptor = cbc::Decryptor<Aes256>;
type Encryptor = cbc::Encryptor<Aes256>;

/// Symmetric key derived from the configured `EncodingAESKey`.
///
/// The first 16 bytes double as the CBC IV.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CallbackKey {
    bytes: [u8; KEY_LEN],
}

impl CallbackKey {
    pub fn from_encoding_aes_key(encoded: &str) -> Result<Self, CallbackError> {
        let encoded = encoded.trim();
        if encoded.len() != ENCODED_KEY_LEN {
            return Err(CallbackError::Decryption(format!(
                "encoding AES key must be {ENCODED_KEY_LEN} characters, got {}",
                encoded.len()
            )));
        }

        let mut decoded = KEY_ENGINE
            .decode(format!("{encoded}="))
            .map_err(|_| CallbackError::Decryption("encoding AES key is not valid base64".into()))?;
        if decoded.len() != KEY_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CallbackError::Decryption(format!(
                "encoding AES key decodes to {len} bytes, expected {KEY_LEN}"
            )));
        }

        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    fn iv(&self) -> [u8; IV_LEN] {
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&self.bytes[..IV_LEN]);
        iv
    }
}

impl std::fmt::Debug for CallbackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CallbackKey(<redacted>)")
    }
}

/// A decrypted and parsed plaintext frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub declared_len: u32,
    pub body: String,
    pub receive_id: String,
}

/// Decrypts an envelope and returns the message body with its declared length.
pub fn decrypt_envelope(key: &CallbackKey, encrypted: &str) -> Result<(String, u32), CallbackError> {
    let frame = open_frame(key, encrypted)?;
    Ok((frame.body, frame.declared_len))
}

/// Decrypts an envelope and returns the full frame, including the receive id.
pub fn open_frame(key: &CallbackKey, encrypted: &str) -> Result<Frame, CallbackError> {
    let ciphertext = STANDARD
        .decode(encrypted.trim())
        .map_err(|_| CallbackError::Decryption("payload is not valid base64".into()))?;
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK != 0 {
        return Err(CallbackError::Decryption(format!(
            "ciphertext length {} is not a positive multiple of {AES_BLOCK}",
            ciphertext.len()
        )));
    }

    let mut plaintext = Decryptor::new(&key.bytes.into(), &key.iv().into())
        .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
        .map_err(|_| CallbackError::Decryption("block decryption failed".into()))?;
    strip_pkcs7(&mut plaintext)?;

    let frame = parse_frame(&plaintext);
    plaintext.zeroize();
    frame
}

/// Builds a frame for `body` and encrypts it, returning base64 ciphertext.
pub fn encrypt_envelope(
    key: &CallbackKey,
    receive_id: &str,
    body: &str,
    random: [u8; RANDOM_LEN],
) -> Result<String, CallbackError> {
    let declared = u32::try_from(body.len())
        .map_err(|_| CallbackError::Framing("body longer than u32::MAX bytes".into()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len() + receive_id.len() + PAD_BLOCK);
    frame.extend_from_slice(&declared.to_be_bytes());
    frame.extend_from_slice(&random);
    frame.extend_from_slice(body.as_bytes());
    frame.extend_from_slice(receive_id.as_bytes());

    Ok(STANDARD.encode(seal(key, frame)))
}

/// Fresh random bytes for the frame's padding slot.
pub fn random_padding() -> [u8; RANDOM_LEN] {
    let mut buf = [0u8; RANDOM_LEN];
    rand::rng().fill_bytes(&mut buf);
    buf
}

fn seal(key: &CallbackKey, mut plaintext: Vec<u8>) -> Vec<u8> {
    let pad = PAD_BLOCK - plaintext.len() % PAD_BLOCK;
    // pad is in 1..=32, so it always fits in a byte.
    let pad_byte = u8::try_from(pad).unwrap_or(PAD_BLOCK as u8);
    plaintext.resize(plaintext.len() + pad, pad_byte);
    let sealed = Encryptor::new(&key.bytes.into(), &key.iv().into())
        .encrypt_padded_vec_mut::<NoPadding>(&plaintext);
    plaintext.zeroize();
    sealed
}

fn strip_pkcs7(plaintext: &mut Vec<u8>) -> Result<(), CallbackError> {
    let invalid = || CallbackError::Decryption("invalid PKCS#7 padding".into());

    let pad = usize::from(*plaintext.last().ok_or_else(invalid)?);
    if pad == 0 || pad > PAD_BLOCK || pad > plaintext.len() {
        return Err(invalid());
    }
    let start = plaintext.len() - pad;
    if plaintext[start..].iter().any(|&b| usize::from(b) != pad) {
        return Err(invalid());
    }
    plaintext.truncate(start);
    Ok(())
}

fn parse_frame(plaintext: &[u8]) -> Result<Frame, CallbackError> {
    if plaintext.len() < HEADER_LEN {
        return Err(CallbackError::Framing(format!(
            "frame is {} bytes, shorter than the {HEADER_LEN}-byte header",
            plaintext.len()
        )));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&plaintext[..4]);
    let declared_len = u32::from_be_bytes(len_bytes);

    let end = usize::try_from(declared_len)
        .ok()
        .and_then(|len| HEADER_LEN.checked_add(len))
        .filter(|end| *end <= plaintext.len())
        .ok_or_else(|| {
            CallbackError::Framing(format!(
                "declared body length {declared_len} exceeds the {}-byte frame",
                plaintext.len()
            ))
        })?;

    let body = std::str::from_utf8(&plaintext[HEADER_LEN..end])
        .map_err(|_| CallbackError::Framing("message body is not valid UTF-8".into()))?
        .to_string();
    let receive_id = String::from_utf8_lossy(&plaintext[end..]).into_owned();

    Ok(Frame {
        declared_len,
        body,
        receive_id,
    })
}

use rand::RngCore;
use ring::{digest, hmac};
use zeroize::Zeroize;

pub mod aes_cbc;
pub mod kdf;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 32;

/// HMAC-SHA256 output
pub type Tag = [u8; TAG_LEN];

pub fn get_random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> From<[u8; N]> for Nonce<N> {
    fn from(bytes: [u8; N]) -> Self {
        Self { bytes }
    }
}

impl<const N: usize> AsRef<[u8; N]> for Nonce<N> {
    fn as_ref(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> Nonce<N> {
    pub fn random() -> Self {
        Self::from(get_random_bytes())
    }

    pub fn to_bytes(self) -> [u8; N] {
        self.bytes
    }
}

/// The CBC initialisation vector
pub type Iv = Nonce<IV_LEN>;

/// A 256 bit secret. Used for the master key
/// as well as every per-path key. The bytes are
/// wiped when the key is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    bytes: [u8; KEY_LEN],
}

impl From<[u8; KEY_LEN]> for Key {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }
}

impl AsRef<[u8; KEY_LEN]> for Key {
    fn as_ref(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key").field("bytes", &"[REDACTED]").finish()
    }
}

impl Key {
    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    pub fn random() -> Self {
        Self {
            bytes: get_random_bytes(),
        }
    }
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0; 32];
    out.copy_from_slice(digest::digest(&digest::SHA256, data).as_ref());
    out
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Tag {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let mut ctx = hmac::Context::with_key(&key);
    for part in parts {
        ctx.update(part);
    }
    let mut out = [0; TAG_LEN];
    out.copy_from_slice(ctx.sign().as_ref());
    out
}

/// Constant time check of `tag` against HMAC-SHA256 over `parts`.
pub fn verify_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &Tag) -> bool {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let message = parts.concat();
    hmac::verify(&key, &message, tag).is_ok()
}

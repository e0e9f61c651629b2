//! Password to master key, master key to per-path keys.
//!
//! The master key is an iterated SHA-256 chain:
//! `k0 = SHA256(password || ":" || salt)`, then
//! `k(i+1) = SHA256(k(i) || password)` for a fixed number of rounds.
//! The round count is persisted next to the store, so the same password
//! always derives the same key. Per-path material is HMAC-SHA256 under the
//! master key with a label, which keeps the public physical name and the
//! secret path key apart.
use std::time::{Duration, Instant};

use ring::digest::{self, SHA256};
use tracing::debug;

use super::{hmac_sha256, Key, Tag, KEY_LEN};
use crate::path::VirtualPath;

pub const DEFAULT_KDF_ITERATIONS: u32 = 20_000;

const NAME_LABEL: &[u8] = b"name:";
const KEY_LABEL: &[u8] = b"key:";
const KEY_CHECK_LABEL: &[u8] = b"vaultfs/key-check";

fn chain(password: &str, salt: &str, mut rounds: impl FnMut(u32) -> bool) -> ([u8; KEY_LEN], u32) {
    let mut ctx = digest::Context::new(&SHA256);
    ctx.update(password.as_bytes());
    ctx.update(b":");
    ctx.update(salt.as_bytes());
    let mut state = [0; KEY_LEN];
    state.copy_from_slice(ctx.finish().as_ref());
    let mut done = 0;
    while rounds(done) {
        let mut ctx = digest::Context::new(&SHA256);
        ctx.update(&state);
        ctx.update(password.as_bytes());
        state.copy_from_slice(ctx.finish().as_ref());
        done += 1;
    }
    (state, done)
}

/// The session secret, derived once per [`crate::Store::init`].
#[derive(Debug)]
pub struct MasterKey {
    key: Key,
    iterations: u32,
}

impl MasterKey {
    pub fn derive(password: &str, salt: &str, iterations: u32) -> Self {
        let start = Instant::now();
        let (bytes, iterations) = chain(password, salt, |done| done < iterations);
        debug!(
            "Derived master key with {iterations} rounds in {:?}",
            start.elapsed()
        );
        Self {
            key: Key::from(bytes),
            iterations,
        }
    }

    /// Measures how many rounds this machine completes within `budget`.
    /// The result is meant to be persisted and then used with [`Self::derive`].
    pub fn calibrate(budget: Duration) -> u32 {
        let start = Instant::now();
        let (_, rounds) = chain("calibration", "vaultfs", |done| {
            done < u32::MAX && start.elapsed() < budget
        });
        rounds.max(1)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// `HMAC(master, "key:" || canonical path)`, used for encryption and
    /// integrity of everything belonging to `path`.
    pub fn path_key(&self, path: &VirtualPath) -> Key {
        Key::from(hmac_sha256(
            self.key.as_slice(),
            &[KEY_LABEL, path.canonical().as_bytes()],
        ))
    }

    /// `HMAC(master, "name:" || canonical path)`, the raw bytes behind
    /// a node's physical id.
    pub fn name_digest(&self, path: &VirtualPath) -> Tag {
        hmac_sha256(
            self.key.as_slice(),
            &[NAME_LABEL, path.canonical().as_bytes()],
        )
    }

    /// A value stored in plaintext that lets a later session tell a wrong
    /// password from a corrupt store.
    pub fn key_check(&self) -> Tag {
        hmac_sha256(self.key.as_slice(), &[KEY_CHECK_LABEL])
    }

    pub fn verify_key_check(&self, check: &Tag) -> bool {
        super::verify_hmac_sha256(self.key.as_slice(), &[KEY_CHECK_LABEL], check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[test]
    fn test_derivation_reproducible() {
        let a = MasterKey::derive("password123", "secure", 100);
        let b = MasterKey::derive("password123", "secure", 100);
        assert_eq!(a.key_check(), b.key_check());
        assert_eq!(a.iterations(), 100);
        assert!(b.verify_key_check(&a.key_check()));
    }

    #[test]
    fn test_derivation_depends_on_inputs() {
        let base = MasterKey::derive("pw", "secure", 50).key_check();
        assert_ne!(base, MasterKey::derive("pw2", "secure", 50).key_check());
        assert_ne!(base, MasterKey::derive("pw", "other", 50).key_check());
        assert_ne!(base, MasterKey::derive("pw", "secure", 51).key_check());
    }

    #[test]
    fn test_zero_rounds_is_single_hash() {
        let (bytes, done) = chain("pw", "salt", |_| false);
        assert_eq!(done, 0);
        assert_eq!(bytes, crate::crypto::sha256(b"pw:salt"));
    }

    #[test]
    fn test_path_key_stable_and_domain_separated() {
        let master = MasterKey::derive("pw", "secure", 10);
        let p = path("/a/b");
        assert_eq!(master.path_key(&p), master.path_key(&p));
        assert_ne!(master.path_key(&p), master.path_key(&path("/a/c")));
        assert_ne!(master.path_key(&p).as_ref(), &master.name_digest(&p));
    }

    #[test]
    fn test_calibrate_returns_at_least_one() {
        assert!(MasterKey::calibrate(Duration::from_millis(1)) >= 1);
    }
}

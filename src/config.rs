use std::time::Duration;

use packed_struct::prelude::*;

use crate::crypto::aes_cbc::AES_BLOCK_SIZE;
use crate::crypto::kdf::{MasterKey, DEFAULT_KDF_ITERATIONS};
use crate::error::{ErrorKind, Result, StoreError};

/// How many hash rounds the master key derivation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfIterations {
    Fixed(u32),
    /// Measure once how many rounds fit into the budget on this device.
    /// The measured count is persisted with the store.
    Calibrated(Duration),
}

impl Default for KdfIterations {
    fn default() -> Self {
        Self::Fixed(DEFAULT_KDF_ITERATIONS)
    }
}

/// Parameters used when a store is created. An existing store keeps the
/// values it was created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Plaintext bytes per chunk, a multiple of 16
    pub chunk_size: usize,
    /// Chunks covered by one parity record
    pub parity_group: usize,
    pub kdf: KdfIterations,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: Geometry::DEFAULT_CHUNK_SIZE,
            parity_group: Geometry::DEFAULT_PARITY_GROUP,
            kdf: KdfIterations::default(),
        }
    }
}

impl StoreConfig {
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf = KdfIterations::Fixed(iterations);
        self
    }

    pub fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.chunk_size, self.parity_group)
            .map_err(|msg| StoreError::new(ErrorKind::BadArgs, msg))
    }

    pub fn validate(&self) -> Result<()> {
        self.geometry()?;
        if self.kdf == KdfIterations::Fixed(0) {
            return Err(StoreError::new(
                ErrorKind::BadArgs,
                "kdf iteration count must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Chunking parameters of an open store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    chunk_size: usize,
    parity_group: usize,
}

impl Geometry {
    pub const DEFAULT_CHUNK_SIZE: usize = 4096;
    pub const DEFAULT_PARITY_GROUP: usize = 4;

    fn new(chunk_size: usize, parity_group: usize) -> std::result::Result<Self, String> {
        if chunk_size == 0 || chunk_size % AES_BLOCK_SIZE != 0 || u32::try_from(chunk_size).is_err() {
            return Err(format!(
                "invalid chunk size {chunk_size}: must be a non-zero multiple of {AES_BLOCK_SIZE}"
            ));
        }
        if parity_group < 2 || u32::try_from(parity_group).is_err() {
            return Err(format!(
                "invalid parity group size {parity_group}: must be at least 2"
            ));
        }
        Ok(Self {
            chunk_size,
            parity_group,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn parity_group(&self) -> usize {
        self.parity_group
    }

    /// Number of chunks holding `size` logical bytes.
    pub fn chunks_for(&self, size: u64) -> u64 {
        size.div_ceil(self.chunk_size as u64)
    }

    pub fn group_of(&self, chunk: u32) -> u32 {
        chunk / self.parity_group as u32
    }

    /// Number of parity groups covering `chunk_count` chunks.
    pub fn groups_for(&self, chunk_count: u32) -> u32 {
        chunk_count.div_ceil(self.parity_group as u32)
    }

    /// Chunk indices belonging to `group`, clamped to `chunk_count`.
    pub fn group_members(&self, group: u32, chunk_count: u32) -> std::ops::Range<u32> {
        let start = group * self.parity_group as u32;
        start..(start + self.parity_group as u32).min(chunk_count)
    }
}

/// Stored in plaintext as `<root>/store.params`. Holds everything needed
/// to re-derive the same master key and read the chunk layout back.
#[derive(PackedStruct, Debug, Clone, PartialEq, Eq)]
#[packed_struct(endian = "msb")]
pub struct StoreParams {
    /// Always "EFSP"
    pub magic: u32,
    /// Always 1
    pub version: u8,
    pub reserved: [u8; 3],
    pub kdf_iterations: u32,
    pub chunk_size: u32,
    pub parity_group: u32,
    /// `HMAC(master key, "vaultfs/key-check")`
    pub key_check: [u8; 32],
}

impl StoreParams {
    pub const SIZE: usize = 52;
    pub const MAGIC: u32 = 0x4546_5350;
    pub const VERSION: u8 = 1;
    pub const FILE_NAME: &'static str = "store.params";

    pub fn new(geometry: Geometry, master: &MasterKey) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            reserved: [0; 3],
            kdf_iterations: master.iterations(),
            chunk_size: geometry.chunk_size as u32,
            parity_group: geometry.parity_group as u32,
            key_check: master.key_check(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.pack()
            .map(|bytes| bytes.to_vec())
            .map_err(|e| StoreError::new(ErrorKind::InternalError, format!("packing store parameters: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let corrupt = |what: String| StoreError::new(ErrorKind::IntegrityError, what);
        if bytes.len() != Self::SIZE {
            return Err(corrupt(format!(
                "store parameters are {} bytes, expected {}",
                bytes.len(),
                Self::SIZE
            )));
        }
        let params = Self::unpack_from_slice(bytes)
            .map_err(|e| corrupt(format!("unpacking store parameters: {e}")))?;
        if params.magic != Self::MAGIC {
            return Err(corrupt("bad store parameter magic".to_owned()));
        }
        if params.version != Self::VERSION {
            return Err(StoreError::new(
                ErrorKind::Unsupported,
                format!("store parameter version {}", params.version),
            ));
        }
        if params.kdf_iterations == 0 {
            return Err(corrupt("store parameters record zero kdf iterations".to_owned()));
        }
        params.geometry()?;
        Ok(params)
    }

    pub fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.chunk_size as usize, self.parity_group as usize)
            .map_err(|msg| StoreError::new(ErrorKind::IntegrityError, msg))
    }
}

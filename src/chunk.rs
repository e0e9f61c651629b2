//! The chunked payload of a file.
//!
//! The `.data` record is a sequence of chunk records,
//! `iv[16] || len u32 BE || cipher[len]`, record `i` holding logical bytes
//! `[i * chunk_size, (i + 1) * chunk_size)`. Every chunk plaintext is exactly
//! `chunk_size` bytes (the last one zero padded), so the ciphertexts carry
//! no padding and every record has the same size.
//!
//! Which IV and tag each chunk must have is recorded in the file's
//! [`ChunkTable`], which lives in the sealed metadata blob. A record that
//! is missing, short, malformed or fails its tag counts as lost and is
//! rebuilt from its parity group.
use tracing::{trace, warn};

use crate::config::Geometry;
use crate::crypto::aes_cbc::CbcContext;
use crate::crypto::{get_random_bytes, hmac_sha256, verify_hmac_sha256, Iv, Key, Tag, IV_LEN, TAG_LEN};
use crate::error::{medium_error, ErrorKind, Result, StoreError};
use crate::medium::Medium;
use crate::parity::{read_parity, recover_chunk};
use crate::path::NodeFiles;

/// `iv || len` in front of every ciphertext
pub const RECORD_HEADER_LEN: usize = IV_LEN + 4;

const IV_LABEL: &[u8] = b"iv:";
const CHUNK_LABEL: &[u8] = b"chunk:";

fn corrupt(what: impl Into<String>) -> StoreError {
    StoreError::new(ErrorKind::IntegrityError, what)
}

/// What a chunk is expected to look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMeta {
    pub iv: [u8; IV_LEN],
    pub tag: Tag,
}

/// Authenticated summary of a file's contents:
/// `logical_size u64 || count u32 || repeat { iv[16], tag[32] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkTable {
    pub logical_size: u64,
    pub chunks: Vec<ChunkMeta>,
}

impl ChunkTable {
    const ENTRY_LEN: usize = IV_LEN + TAG_LEN;

    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.chunks.len() * Self::ENTRY_LEN);
        out.extend_from_slice(&self.logical_size.to_be_bytes());
        out.extend_from_slice(&self.chunk_count().to_be_bytes());
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.iv);
            out.extend_from_slice(&chunk.tag);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 12 {
            return Err(corrupt("truncated chunk table"));
        }
        let (head, body) = bytes.split_at(12);
        let mut size = [0; 8];
        size.copy_from_slice(&head[..8]);
        let mut count = [0; 4];
        count.copy_from_slice(&head[8..]);
        let count = u32::from_be_bytes(count) as usize;
        if body.len() / Self::ENTRY_LEN != count || body.len() % Self::ENTRY_LEN != 0 {
            return Err(corrupt(format!(
                "chunk table claims {count} chunks in {} bytes",
                body.len()
            )));
        }
        let chunks = body
            .chunks_exact(Self::ENTRY_LEN)
            .map(|entry| {
                let mut meta = ChunkMeta {
                    iv: [0; IV_LEN],
                    tag: [0; TAG_LEN],
                };
                meta.iv.copy_from_slice(&entry[..IV_LEN]);
                meta.tag.copy_from_slice(&entry[IV_LEN..]);
                meta
            })
            .collect();
        Ok(Self {
            logical_size: u64::from_be_bytes(size),
            chunks,
        })
    }

    /// Checks the table against the chunking parameters and the values the
    /// unauthenticated node header claims.
    pub fn validate(&self, geometry: &Geometry, header_size: u64, header_chunks: u32) -> Result<()> {
        if self.logical_size != header_size || self.chunk_count() != header_chunks {
            return Err(corrupt(format!(
                "node header claims {header_size} bytes in {header_chunks} chunks, \
                 chunk table has {} bytes in {} chunks",
                self.logical_size,
                self.chunk_count()
            )));
        }
        if geometry.chunks_for(self.logical_size) != self.chunks.len() as u64 {
            return Err(corrupt(format!(
                "{} chunks cannot hold {} bytes",
                self.chunks.len(),
                self.logical_size
            )));
        }
        Ok(())
    }
}

/// One decoded data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub iv: [u8; IV_LEN],
    pub cipher: Vec<u8>,
}

impl ChunkRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RECORD_HEADER_LEN + self.cipher.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&(self.cipher.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.cipher);
        out
    }

    /// Decodes a record that must carry exactly `chunk_size` cipher bytes.
    pub fn decode(bytes: &[u8], chunk_size: usize) -> Option<Self> {
        if bytes.len() != RECORD_HEADER_LEN + chunk_size {
            return None;
        }
        let (head, cipher) = bytes.split_at(RECORD_HEADER_LEN);
        let len = u32::from_be_bytes([head[IV_LEN], head[IV_LEN + 1], head[IV_LEN + 2], head[IV_LEN + 3]]);
        if len as usize != cipher.len() {
            return None;
        }
        let mut iv = [0; IV_LEN];
        iv.copy_from_slice(&head[..IV_LEN]);
        Some(Self {
            iv,
            cipher: cipher.to_vec(),
        })
    }

    pub fn offset(index: u32, chunk_size: usize) -> u64 {
        index as u64 * (RECORD_HEADER_LEN + chunk_size) as u64
    }
}

/// Per-node chunk encryption under the node's path key.
pub struct ChunkCipher<'a> {
    key: &'a Key,
    cbc: CbcContext,
    chunk_size: usize,
}

impl<'a> ChunkCipher<'a> {
    pub fn new(key: &'a Key, chunk_size: usize) -> Self {
        Self {
            key,
            cbc: CbcContext::new(key),
            chunk_size,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// IV for chunk `index`, mixed from a fresh nonce, the index and the
    /// path key.
    fn chunk_iv(&self, index: u32) -> Iv {
        let nonce: [u8; 16] = get_random_bytes();
        let mac = hmac_sha256(
            self.key.as_slice(),
            &[IV_LABEL, &nonce[..], &index.to_be_bytes()[..]],
        );
        let mut iv = [0; IV_LEN];
        iv.copy_from_slice(&mac[..IV_LEN]);
        Iv::from(iv)
    }

    fn chunk_tag_parts<'b>(index: &'b [u8; 4], iv: &'b [u8; IV_LEN], cipher: &'b [u8]) -> [&'b [u8]; 4] {
        [CHUNK_LABEL, &index[..], &iv[..], cipher]
    }

    /// Encrypts up to `chunk_size` bytes of plaintext, zero padding the rest.
    pub fn seal(&self, index: u32, plaintext: &[u8]) -> Result<(ChunkRecord, ChunkMeta)> {
        if plaintext.len() > self.chunk_size {
            return Err(StoreError::new(
                ErrorKind::InternalError,
                format!("chunk {index} holds {} bytes", plaintext.len()),
            ));
        }
        let mut cipher = vec![0; self.chunk_size];
        cipher[..plaintext.len()].copy_from_slice(plaintext);
        let iv = self.chunk_iv(index);
        self.cbc
            .encrypt_blocks(&mut cipher, &iv)
            .map_err(|e| StoreError::new(ErrorKind::CryptoError, format!("chunk {index}: {e}")))?;
        let iv = iv.to_bytes();
        let index_bytes = index.to_be_bytes();
        let tag = hmac_sha256(
            self.key.as_slice(),
            &Self::chunk_tag_parts(&index_bytes, &iv, &cipher),
        );
        Ok((ChunkRecord { iv, cipher }, ChunkMeta { iv, tag }))
    }

    pub fn verify(&self, index: u32, meta: &ChunkMeta, cipher: &[u8]) -> bool {
        cipher.len() == self.chunk_size
            && verify_hmac_sha256(
                self.key.as_slice(),
                &Self::chunk_tag_parts(&index.to_be_bytes(), &meta.iv, cipher),
                &meta.tag,
            )
    }

    /// Decrypts an already verified ciphertext.
    pub fn open(&self, index: u32, meta: &ChunkMeta, cipher: &[u8]) -> Result<Vec<u8>> {
        let mut plain = cipher.to_vec();
        self.cbc
            .decrypt_blocks(&mut plain, &Iv::from(meta.iv))
            .map_err(|e| StoreError::new(ErrorKind::CryptoError, format!("chunk {index}: {e}")))?;
        Ok(plain)
    }
}

pub fn append_record<M: Medium>(medium: &mut M, files: &NodeFiles, record: &ChunkRecord) -> Result<()> {
    let name = files.data();
    medium
        .append(&name, &record.encode())
        .map_err(|e| medium_error(ErrorKind::WriteError, format!("appending to {name}"), e))
}

/// Overwrites record `index` in place, or appends it if it is the next one.
pub fn write_record<M: Medium>(
    medium: &mut M,
    files: &NodeFiles,
    index: u32,
    record: &ChunkRecord,
) -> Result<()> {
    let name = files.data();
    let offset = ChunkRecord::offset(index, record.cipher.len());
    trace!("Writing chunk {index} of {name} at {offset}");
    medium
        .write_at(&name, offset, &record.encode())
        .map_err(|e| medium_error(ErrorKind::WriteError, format!("writing {name}"), e))
}

/// Returns the record at `index`, or `None` when it cannot be read back
/// in its expected shape.
pub fn read_record<M: Medium>(medium: &M, files: &NodeFiles, index: u32, chunk_size: usize) -> Option<ChunkRecord> {
    let name = files.data();
    let mut buf = vec![0; RECORD_HEADER_LEN + chunk_size];
    match medium.read_at(&name, ChunkRecord::offset(index, chunk_size), &mut buf) {
        Ok(n) if n == buf.len() => ChunkRecord::decode(&buf, chunk_size),
        Ok(n) => {
            trace!("Chunk {index} of {name} is short ({n} bytes)");
            None
        }
        Err(_) => None,
    }
}

/// Reads the chunks of one file, falling back to parity when a record is lost.
pub struct ChunkReader<'a, M: Medium> {
    medium: &'a M,
    files: &'a NodeFiles,
    cipher: &'a ChunkCipher<'a>,
    table: &'a ChunkTable,
    geometry: Geometry,
}

impl<'a, M: Medium> ChunkReader<'a, M> {
    pub fn new(
        medium: &'a M,
        files: &'a NodeFiles,
        cipher: &'a ChunkCipher<'a>,
        table: &'a ChunkTable,
        geometry: Geometry,
    ) -> Self {
        Self {
            medium,
            files,
            cipher,
            table,
            geometry,
        }
    }

    fn meta(&self, index: u32) -> Result<&'a ChunkMeta> {
        self.table.chunks.get(index as usize).ok_or_else(|| {
            StoreError::new(
                ErrorKind::InternalError,
                format!("chunk {index} is past the end of the file"),
            )
        })
    }

    /// The stored ciphertext of `index`, if it is present and authentic.
    fn intact_cipher(&self, index: u32) -> Option<Vec<u8>> {
        let meta = self.table.chunks.get(index as usize)?;
        let record = read_record(self.medium, self.files, index, self.geometry.chunk_size())?;
        self.cipher
            .verify(index, meta, &record.cipher)
            .then_some(record.cipher)
    }

    /// Ciphertext of `index`, rebuilt from its parity group if needed.
    pub fn cipher(&self, index: u32) -> Result<Vec<u8>> {
        self.checked_cipher(index).map(|(cipher, _)| cipher)
    }

    /// Like [`cipher`](Self::cipher), and also tells whether the stored
    /// record was damaged and had to be rebuilt.
    pub fn checked_cipher(&self, index: u32) -> Result<(Vec<u8>, bool)> {
        let meta = self.meta(index)?;
        if let Some(cipher) = self.intact_cipher(index) {
            return Ok((cipher, false));
        }
        let group = self.geometry.group_of(index);
        warn!(
            "Chunk {index} of {} is damaged, recovering from parity group {group}",
            self.files.data()
        );
        let parity = read_parity(self.medium, self.files, group, self.geometry.chunk_size())
            .ok_or_else(|| {
                StoreError::new(
                    ErrorKind::ReadError,
                    format!("chunk {index} is unreadable and parity group {group} is missing"),
                )
            })?;
        let mut others = Vec::with_capacity(self.geometry.parity_group() - 1);
        for sibling in self.geometry.group_members(group, self.table.chunk_count()) {
            if sibling == index {
                continue;
            }
            let cipher = self.intact_cipher(sibling).ok_or_else(|| {
                StoreError::new(
                    ErrorKind::ReadError,
                    format!("chunks {index} and {sibling} of parity group {group} are both unreadable"),
                )
            })?;
            others.push(cipher);
        }
        let recovered = recover_chunk(&parity, &others);
        if !self.cipher.verify(index, meta, &recovered) {
            return Err(corrupt(format!(
                "chunk {index} rebuilt from parity group {group} fails its tag"
            )));
        }
        Ok((recovered, true))
    }

    /// Decrypted chunk `index`, still carrying its zero padding.
    pub fn plaintext(&self, index: u32) -> Result<Vec<u8>> {
        let cipher = self.cipher(index)?;
        self.cipher.open(index, self.meta(index)?, &cipher)
    }
}

//! Node metadata records.
//!
//! A `.node` record is a fixed 72 byte big-endian header followed by a
//! length-prefixed blob that is AES-256-CBC encrypted under the node's path
//! key. The header's tag is `HMAC(path key, iv || blob)` and is checked
//! before the blob is ever decrypted.
use packed_struct::prelude::*;
use tracing::{trace, warn};

use crate::crypto::aes_cbc::CbcContext;
use crate::crypto::{hmac_sha256, verify_hmac_sha256, Iv, Key, IV_LEN, TAG_LEN};
use crate::error::{medium_error, ErrorKind, Result, StoreError};
use crate::medium::Medium;
use crate::path::NodeFiles;

#[derive(PrimitiveEnum_u8, Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeKind {
    File = 0,
    Dir = 1,
}

#[derive(PackedStruct, Debug, Clone, PartialEq, Eq)]
#[packed_struct(endian = "msb")]
pub struct NodeHeader {
    /// "EFCS"
    pub magic: u32,
    /// Always 1
    pub version: u8,
    #[packed_field(element_size_bytes = "1", ty = "enum")]
    pub kind: NodeKind,
    pub reserved: u16,
    /// Logical file size in bytes, 0 for directories
    pub logical_size: u64,
    pub chunk_count: u32,
    /// Rounds of the key derivation this node was written under
    pub kdf_iterations: u32,
    /// IV of the encrypted blob
    pub iv: [u8; 16],
    /// `HMAC(path key, iv || encrypted blob)`
    pub tag: [u8; 32],
}

impl NodeHeader {
    pub const SIZE: usize = 72;
    pub const MAGIC: u32 = 0x4546_4353;
    pub const VERSION: u8 = 1;
}

/// Length of the blob length prefix that follows the header
const BLOB_LEN_SIZE: usize = 4;

fn corrupt(what: impl Into<String>) -> StoreError {
    StoreError::new(ErrorKind::IntegrityError, what)
}

/// A decoded `.node` record. The blob is still encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub header: NodeHeader,
    pub blob: Vec<u8>,
}

impl NodeRecord {
    /// Encrypts `plaintext` under `key` with a fresh IV and tags the result.
    pub fn seal(
        kind: NodeKind,
        logical_size: u64,
        chunk_count: u32,
        kdf_iterations: u32,
        key: &Key,
        plaintext: &[u8],
    ) -> Self {
        let iv = Iv::random();
        let blob = CbcContext::new(key).encrypt_padded(plaintext, &iv);
        let tag = hmac_sha256(key.as_slice(), &[iv.as_ref().as_slice(), blob.as_slice()]);
        Self {
            header: NodeHeader {
                magic: NodeHeader::MAGIC,
                version: NodeHeader::VERSION,
                kind,
                reserved: 0,
                logical_size,
                chunk_count,
                kdf_iterations,
                iv: iv.to_bytes(),
                tag,
            },
            blob,
        }
    }

    /// Verifies the tag, then decrypts the blob. Never returns
    /// plaintext from an unauthenticated blob.
    pub fn open(&self, key: &Key) -> Result<Vec<u8>> {
        let iv = &self.header.iv;
        if !verify_hmac_sha256(key.as_slice(), &[iv.as_slice(), self.blob.as_slice()], &self.header.tag) {
            return Err(corrupt("metadata tag mismatch"));
        }
        CbcContext::new(key)
            .decrypt_padded(&self.blob, &Iv::from(*iv))
            .map_err(|e| StoreError::new(ErrorKind::CryptoError, format!("metadata blob: {e}")))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = self.header.pack().map_err(|e| {
            StoreError::new(ErrorKind::InternalError, format!("packing node header: {e}"))
        })?;
        let blob_len = u32::try_from(self.blob.len())
            .map_err(|_| StoreError::new(ErrorKind::BadArgs, "metadata blob too large"))?;
        let mut out = Vec::with_capacity(NodeHeader::SIZE + BLOB_LEN_SIZE + self.blob.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&blob_len.to_be_bytes());
        out.extend_from_slice(&self.blob);
        Ok(out)
    }

    /// Bounds checked decode: every length is compared against what is
    /// actually left in `bytes` before it is used.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NodeHeader::SIZE + BLOB_LEN_SIZE {
            return Err(corrupt(format!(
                "truncated node header: {} bytes",
                bytes.len()
            )));
        }
        let (header_bytes, rest) = bytes.split_at(NodeHeader::SIZE);
        let magic = u32::from_be_bytes([header_bytes[0], header_bytes[1], header_bytes[2], header_bytes[3]]);
        if magic != NodeHeader::MAGIC {
            return Err(corrupt("bad node magic"));
        }
        if header_bytes[4] != NodeHeader::VERSION {
            return Err(StoreError::new(
                ErrorKind::Unsupported,
                format!("node version {}", header_bytes[4]),
            ));
        }
        let header = NodeHeader::unpack_from_slice(header_bytes)
            .map_err(|e| corrupt(format!("unpacking node header: {e}")))?;
        let (len_bytes, blob) = rest.split_at(BLOB_LEN_SIZE);
        let blob_len =
            u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        if blob_len != blob.len() {
            return Err(corrupt(format!(
                "node blob length {blob_len} does not match the {} bytes present",
                blob.len()
            )));
        }
        Ok(Self {
            header,
            blob: blob.to_vec(),
        })
    }
}

/// Returns `None` if the node has no metadata record.
pub fn read_node<M: Medium>(medium: &M, files: &NodeFiles) -> Result<Option<NodeRecord>> {
    let name = files.node();
    if !medium.exists(&name) {
        return Ok(None);
    }
    let bytes = medium
        .read(&name)
        .map_err(|e| medium_error(ErrorKind::ReadError, format!("reading {name}"), e))?;
    trace!("Read node record {name} ({} bytes)", bytes.len());
    NodeRecord::decode(&bytes).map(Some)
}

/// Writes the record next to the old one, removes the old one and
/// renames the new one into place. A crash leaves either the old record
/// or an orphaned `.node.tmp`, never a partial `.node`.
pub fn write_node<M: Medium>(medium: &mut M, files: &NodeFiles, record: &NodeRecord) -> Result<()> {
    let bytes = record.encode()?;
    let name = files.node();
    let tmp = files.node_tmp();
    medium
        .write(&tmp, &bytes)
        .map_err(|e| medium_error(ErrorKind::WriteError, format!("writing {tmp}"), e))?;
    if medium.exists(&name) {
        medium
            .remove(&name)
            .map_err(|e| medium_error(ErrorKind::WriteError, format!("replacing {name}"), e))?;
    }
    medium
        .rename(&tmp, &name)
        .map_err(|e| medium_error(ErrorKind::WriteError, format!("renaming {tmp}"), e))?;
    trace!("Wrote node record {name} ({} bytes)", bytes.len());
    Ok(())
}

pub fn remove_node<M: Medium>(medium: &mut M, files: &NodeFiles) -> Result<()> {
    let name = files.node();
    medium
        .remove(&name)
        .map_err(|e| medium_error(ErrorKind::DeleteError, format!("removing {name}"), e))
}

/// Finishes or discards metadata writes interrupted by a crash.
/// The temp record is flushed before the old record is removed, so a
/// well formed `.node.tmp` without its `.node` is renamed into place.
/// Any other `.node.tmp` is dropped.
pub fn recover_pending_writes<M: Medium>(medium: &mut M, root: &str) -> Result<usize> {
    let names = medium
        .list(root)
        .map_err(|e| medium_error(ErrorKind::StorageError, format!("listing {root}"), e))?;
    let mut recovered = 0;
    for tmp_name in names.iter().filter(|n| n.ends_with(NodeFiles::TMP_SUFFIX)) {
        let stem = &tmp_name[..tmp_name.len() - NodeFiles::TMP_SUFFIX.len()];
        let tmp = format!("{root}/{tmp_name}");
        let node = format!("{root}/{stem}{}", NodeFiles::NODE_SUFFIX);
        let complete = medium
            .read(&tmp)
            .map(|bytes| NodeRecord::decode(&bytes).is_ok())
            .unwrap_or(false);
        if medium.exists(&node) || !complete {
            warn!("Dropping stale metadata write {tmp}");
            medium
                .remove(&tmp)
                .map_err(|e| medium_error(ErrorKind::DeleteError, format!("removing {tmp}"), e))?;
        } else {
            warn!("Completing interrupted metadata write {tmp}");
            medium
                .rename(&tmp, &node)
                .map_err(|e| medium_error(ErrorKind::WriteError, format!("renaming {tmp}"), e))?;
            recovered += 1;
        }
    }
    Ok(recovered)
}

const _: () = assert!(NodeHeader::SIZE == 4 + 1 + 1 + 2 + 8 + 4 + 4 + IV_LEN + TAG_LEN);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::MasterKey;
    use crate::medium::MemoryMedium;
    use crate::path::{PhysicalId, VirtualPath};

    fn sealed(key: &Key) -> NodeRecord {
        NodeRecord::seal(NodeKind::Dir, 0, 0, 10, key, b"children")
    }

    #[test]
    fn test_encode_decode_layout() {
        let key = Key::random();
        let record = NodeRecord::seal(NodeKind::File, 10_000, 3, 10, &key, b"table");
        let bytes = record.encode().unwrap();
        assert_eq!(&bytes[..4], b"EFCS");
        assert_eq!(bytes[4], 1);
        assert_eq!(bytes[5], 0);
        assert_eq!(&bytes[8..16], &10_000u64.to_be_bytes());
        assert_eq!(&bytes[16..20], &3u32.to_be_bytes());
        assert_eq!(&bytes[20..24], &10u32.to_be_bytes());
        assert_eq!(&bytes[24..40], &record.header.iv);
        assert_eq!(&bytes[40..72], &record.header.tag);
        assert_eq!(&bytes[72..76], &(record.blob.len() as u32).to_be_bytes());
        assert_eq!(NodeRecord::decode(&bytes).unwrap(), record);
        assert_eq!(record.open(&key).unwrap(), b"table");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let record = sealed(&Key::random());
        let bytes = record.encode().unwrap();

        let err = NodeRecord::decode(&bytes[..40]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityError);

        let mut bad_magic = bytes.clone();
        bad_magic[0] ^= 1;
        assert_eq!(NodeRecord::decode(&bad_magic).unwrap_err().kind(), ErrorKind::IntegrityError);

        let mut bad_kind = bytes.clone();
        bad_kind[5] = 7;
        assert_eq!(NodeRecord::decode(&bad_kind).unwrap_err().kind(), ErrorKind::IntegrityError);

        let mut long_len = bytes.clone();
        long_len[72..76].copy_from_slice(&u32::MAX.to_be_bytes());
        assert_eq!(NodeRecord::decode(&long_len).unwrap_err().kind(), ErrorKind::IntegrityError);

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert_eq!(NodeRecord::decode(&trailing).unwrap_err().kind(), ErrorKind::IntegrityError);

        let mut future = bytes;
        future[4] = 2;
        assert_eq!(NodeRecord::decode(&future).unwrap_err().kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_open_detects_tampering() {
        let key = Key::random();
        let record = sealed(&key);
        for bit in 0..record.blob.len() * 8 {
            let mut tampered = record.clone();
            tampered.blob[bit / 8] ^= 1 << (bit % 8);
            assert_eq!(tampered.open(&key).unwrap_err().kind(), ErrorKind::IntegrityError);
        }
        let mut bad_iv = record.clone();
        bad_iv.header.iv[0] ^= 0x80;
        assert_eq!(bad_iv.open(&key).unwrap_err().kind(), ErrorKind::IntegrityError);
        assert_eq!(record.open(&Key::random()).unwrap_err().kind(), ErrorKind::IntegrityError);
    }

    fn files() -> NodeFiles {
        let master = MasterKey::derive("pw", "root", 1);
        NodeFiles::new("root", &PhysicalId::new(&master, &VirtualPath::root()))
    }

    #[test]
    fn test_write_replaces_atomically() {
        let mut medium = MemoryMedium::new();
        medium.create_dir("root").unwrap();
        let files = files();
        let key = Key::random();
        assert_eq!(read_node(&medium, &files).unwrap(), None);

        let first = sealed(&key);
        write_node(&mut medium, &files, &first).unwrap();
        let second = NodeRecord::seal(NodeKind::Dir, 0, 0, 10, &key, b"other");
        write_node(&mut medium, &files, &second).unwrap();

        assert_eq!(read_node(&medium, &files).unwrap(), Some(second));
        assert!(!medium.exists(&files.node_tmp()));
    }

    #[test]
    fn test_recover_pending_writes() {
        let mut medium = MemoryMedium::new();
        medium.create_dir("root").unwrap();
        let files = files();
        let record = sealed(&Key::random());
        let bytes = record.encode().unwrap();

        // crash after the old record was removed: the temp record wins
        medium.write(&files.node_tmp(), &bytes).unwrap();
        assert_eq!(recover_pending_writes(&mut medium, "root").unwrap(), 1);
        assert_eq!(read_node(&medium, &files).unwrap(), Some(record));

        // crash while writing the temp record: the old record wins
        medium.write(&files.node_tmp(), &bytes[..10]).unwrap();
        assert_eq!(recover_pending_writes(&mut medium, "root").unwrap(), 0);
        assert!(!medium.exists(&files.node_tmp()));
        assert!(read_node(&medium, &files).unwrap().is_some());

        // a torn temp record for a brand new node is discarded
        medium.remove(&files.node()).unwrap();
        medium.write(&files.node_tmp(), &bytes[..10]).unwrap();
        assert_eq!(recover_pending_writes(&mut medium, "root").unwrap(), 0);
        assert_eq!(read_node(&medium, &files).unwrap(), None);
    }
}

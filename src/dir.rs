//! Plaintext layout of a directory's children list:
//! `count u32 || repeat { name_len u16, name, is_dir u8, size u64 }`,
//! all big-endian. It only ever exists on the medium inside the
//! directory's sealed metadata blob.
use crate::error::{ErrorKind, Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// The children of one directory, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    entries: Vec<DirEntry>,
}

/// Smallest encoded entry: an empty name
const MIN_ENTRY_SIZE: usize = 2 + 1 + 8;

fn corrupt(what: impl Into<String>) -> StoreError {
    StoreError::new(ErrorKind::IntegrityError, what)
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(corrupt(format!(
                "directory listing truncated: need {n} bytes, {} left",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

impl DirListing {
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<DirEntry> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `entry` or replaces the entry of the same name in place.
    pub fn upsert(&mut self, entry: DirEntry) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Returns whether an entry was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let count = u32::try_from(self.entries.len())
            .map_err(|_| StoreError::new(ErrorKind::BadArgs, "too many directory entries"))?;
        let mut out = Vec::with_capacity(
            4 + self
                .entries
                .iter()
                .map(|e| MIN_ENTRY_SIZE + e.name.len())
                .sum::<usize>(),
        );
        out.extend_from_slice(&count.to_be_bytes());
        for entry in &self.entries {
            let name_len = u16::try_from(entry.name.len()).map_err(|_| {
                StoreError::new(ErrorKind::BadArgs, format!("entry name too long: {}", entry.name))
            })?;
            out.extend_from_slice(&name_len.to_be_bytes());
            out.extend_from_slice(entry.name.as_bytes());
            out.push(u8::from(entry.is_dir));
            out.extend_from_slice(&entry.size.to_be_bytes());
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { buf: bytes };
        let count = u32::from_be_bytes(reader.array()?) as usize;
        if count > reader.buf.len() / MIN_ENTRY_SIZE {
            return Err(corrupt(format!(
                "directory claims {count} entries in {} bytes",
                reader.buf.len()
            )));
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let name_len = u16::from_be_bytes(reader.array()?) as usize;
            let name = std::str::from_utf8(reader.take(name_len)?)
                .map_err(|_| corrupt("directory entry name is not UTF-8"))?
                .to_owned();
            let is_dir = match reader.array::<1>()? {
                [0] => false,
                [1] => true,
                [other] => return Err(corrupt(format!("bad directory flag {other}"))),
            };
            let size = u64::from_be_bytes(reader.array()?);
            entries.push(DirEntry { name, is_dir, size });
        }
        if !reader.buf.is_empty() {
            return Err(corrupt(format!(
                "{} trailing bytes after directory listing",
                reader.buf.len()
            )));
        }
        Ok(Self { entries })
    }
}

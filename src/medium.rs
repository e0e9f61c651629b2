//! The raw storage the store is built on: an SD card
//! style file API with whole-record and positional I/O.
//! Record names are `/` separated and relative to the medium.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::trace;

/// Trait that abstracts out the storage medium.
/// This crate ships a directory backed and an in-memory
/// implementation.
pub trait Medium {
    /// Error type returned from the IO methods
    type IoError: std::error::Error + std::fmt::Debug;
    fn exists(&self, name: &str) -> bool;
    fn create_dir(&mut self, name: &str) -> Result<(), Self::IoError>;
    /// Names (without the directory prefix) of the records in `dir`.
    fn list(&self, dir: &str) -> Result<Vec<String>, Self::IoError>;
    fn read(&self, name: &str) -> Result<Vec<u8>, Self::IoError>;
    /// Reads into `buf` starting at `offset`. Returns the number of bytes
    /// read, which is short when the record ends first.
    fn read_at(&self, name: &str, offset: u64, buf: &mut [u8]) -> Result<usize, Self::IoError>;
    /// Creates or truncates `name` and stores `data` durably.
    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), Self::IoError>;
    /// Overwrites bytes at `offset`, creating or growing the record as needed.
    fn write_at(&mut self, name: &str, offset: u64, data: &[u8]) -> Result<(), Self::IoError>;
    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), Self::IoError>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::IoError>;
    fn remove(&mut self, name: &str) -> Result<(), Self::IoError>;
}

/// A directory on the host filesystem, e.g. the mount point of an SD card.
#[derive(Debug, Clone)]
pub struct DiskMedium {
    base: PathBuf,
}

impl DiskMedium {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }
}

impl Medium for DiskMedium {
    type IoError = io::Error;

    fn exists(&self, name: &str) -> bool {
        self.resolve(name).exists()
    }

    fn create_dir(&mut self, name: &str) -> io::Result<()> {
        fs::create_dir_all(self.resolve(name))
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(dir))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(name))
    }

    fn read_at(&self, name: &str, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = File::open(self.resolve(name))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn write(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        trace!("Writing {} bytes to {name}", data.len());
        let mut file = File::create(self.resolve(name))?;
        file.write_all(data)?;
        file.sync_data()
    }

    fn write_at(&mut self, name: &str, offset: u64, data: &[u8]) -> io::Result<()> {
        trace!("Writing {} bytes to {name} at {offset}", data.len());
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.resolve(name))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()
    }

    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.resolve(name))?;
        file.write_all(data)?;
        file.flush()
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.resolve(from), self.resolve(to))
    }

    fn remove(&mut self, name: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(name))
    }
}

/// Keeps every record in memory. Handy for tests that need to
/// damage records or look at the raw layout.
#[derive(Debug, Default, Clone)]
pub struct MemoryMedium {
    records: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

fn not_found(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no record {name}"))
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str) -> Option<&[u8]> {
        self.records.get(name).map(Vec::as_slice)
    }

    pub fn record_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        self.records.get_mut(name)
    }
}

impl Medium for MemoryMedium {
    type IoError = io::Error;

    fn exists(&self, name: &str) -> bool {
        self.records.contains_key(name) || self.dirs.contains(name)
    }

    fn create_dir(&mut self, name: &str) -> io::Result<()> {
        self.dirs.insert(name.to_owned());
        Ok(())
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        if !self.dirs.contains(dir) {
            return Err(not_found(dir));
        }
        let prefix = format!("{dir}/");
        Ok(self
            .records
            .keys()
            .filter_map(|name| name.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_owned)
            .collect())
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.records.get(name).cloned().ok_or_else(|| not_found(name))
    }

    fn read_at(&self, name: &str, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let record = self.records.get(name).ok_or_else(|| not_found(name))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(record.len());
        let n = buf.len().min(record.len() - start);
        buf[..n].copy_from_slice(&record[start..start + n]);
        Ok(n)
    }

    fn write(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        self.records.insert(name.to_owned(), data.to_vec());
        Ok(())
    }

    fn write_at(&mut self, name: &str, offset: u64, data: &[u8]) -> io::Result<()> {
        let offset = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let record = self.records.entry(name.to_owned()).or_default();
        if record.len() < offset + data.len() {
            record.resize(offset + data.len(), 0);
        }
        record[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        self.records
            .entry(name.to_owned())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        let record = self.records.remove(from).ok_or_else(|| not_found(from))?;
        self.records.insert(to.to_owned(), record);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> io::Result<()> {
        self.records
            .remove(name)
            .map(drop)
            .ok_or_else(|| not_found(name))
    }
}

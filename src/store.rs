//! The public API.
//!
//! A [`Store`] owns its medium and, once [`Store::init`] has run, the
//! session: root name, master key and chunk geometry. Every call runs under
//! one engine-wide lock for its whole read-modify-write sequence.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::chunk::{append_record, write_record, ChunkCipher, ChunkReader, ChunkRecord, ChunkTable};
use crate::config::{Geometry, KdfIterations, StoreConfig, StoreParams};
use crate::crypto::kdf::MasterKey;
use crate::crypto::Key;
use crate::dir::{DirEntry, DirListing};
use crate::error::{medium_error, ErrorKind, Result, StoreError};
use crate::medium::Medium;
use crate::node::{read_node, recover_pending_writes, remove_node, write_node, NodeKind, NodeRecord};
use crate::parity::{compute_xor_parity, remove_parity, write_parity};
use crate::path::{validate_segment, NodeFiles, PhysicalId, VirtualPath};

/// What [`Store::info`] reports about an existing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    pub exists: bool,
    pub is_dir: bool,
    /// Logical file size, 0 for directories
    pub size: u64,
}

/// The decrypted content of a node, authenticated as the kind its header
/// names.
enum NodeBody {
    Dir(DirListing),
    File(ChunkTable),
}

struct Session {
    root: String,
    master: MasterKey,
    geometry: Geometry,
}

struct Inner<M> {
    medium: M,
    session: Option<Session>,
}

pub struct Store<M: Medium> {
    config: StoreConfig,
    inner: Mutex<Inner<M>>,
}

fn not_found(path: &VirtualPath) -> StoreError {
    StoreError::new(ErrorKind::NotFound, format!("{path} does not exist"))
}

fn is_dir(path: &VirtualPath) -> StoreError {
    StoreError::new(ErrorKind::IsDir, format!("{path} is a directory"))
}

fn not_dir(path: &VirtualPath) -> StoreError {
    StoreError::new(ErrorKind::NotDir, format!("{path} is not a directory"))
}

/// Parent directory and final segment of a non-root path.
fn split(path: &VirtualPath) -> Result<(VirtualPath, String)> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name.to_owned())),
        _ => Err(StoreError::new(
            ErrorKind::InternalError,
            format!("{path} has no parent"),
        )),
    }
}

impl<M: Medium> Store<M> {
    /// A store that still has to be [`init`](Self::init)ialised. `config`
    /// only applies when `init` creates a new store.
    pub fn new(medium: M, config: StoreConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                medium,
                session: None,
            }),
        }
    }

    /// [`Store::new`] followed by [`Store::init`].
    pub fn open(medium: M, config: StoreConfig, root: &str, password: &str) -> Result<Self> {
        let store = Self::new(medium, config);
        store.init(root, password)?;
        Ok(store)
    }

    /// Gives the medium back, ending the session.
    pub fn into_medium(self) -> Result<M> {
        self.inner
            .into_inner()
            .map(|inner| inner.medium)
            .map_err(|_| StoreError::new(ErrorKind::InternalError, "store lock poisoned"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<M>>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::new(ErrorKind::InternalError, "store lock poisoned"))
    }

    fn with_engine<T>(&self, op: impl FnOnce(&mut Engine<'_, M>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let Inner { medium, session } = &mut *guard;
        let session = session
            .as_ref()
            .ok_or_else(|| StoreError::new(ErrorKind::NotInit, "call init first"))?;
        op(&mut Engine { medium, session })
    }

    /// Opens the store named `root` on the medium, creating it if needed.
    ///
    /// The master key is derived from `password` with `root` as salt. An
    /// existing store is opened with the parameters it was created with; a
    /// password that does not match them fails with
    /// [`ErrorKind::CryptoError`]. Interrupted metadata writes from an
    /// earlier session are completed or discarded first.
    pub fn init(&self, root: &str, password: &str) -> Result<()> {
        validate_segment(root)?;
        if password.is_empty() {
            return Err(StoreError::new(ErrorKind::BadArgs, "password cannot be empty"));
        }
        self.config.validate()?;
        let mut guard = self.lock()?;
        if guard.session.is_some() {
            return Err(StoreError::new(ErrorKind::BadArgs, "store is already initialised"));
        }
        let session = open_session(&mut guard.medium, &self.config, root, password)?;
        Engine {
            medium: &mut guard.medium,
            session: &session,
        }
        .ensure_root()?;
        debug!("Initialised store {root}");
        guard.session = Some(session);
        Ok(())
    }

    /// Whether a node is recorded for `path`.
    pub fn exists(&self, path: &VirtualPath) -> Result<bool> {
        self.with_engine(|engine| Ok(engine.medium.exists(&engine.files(path).node())))
    }

    /// Fails with [`ErrorKind::NotFound`] if nothing is stored at `path`.
    pub fn info(&self, path: &VirtualPath) -> Result<Info> {
        self.with_engine(|engine| engine.info(path))
    }

    /// The name the node for `path` has on the medium.
    pub fn physical_id(&self, path: &VirtualPath) -> Result<PhysicalId> {
        self.with_engine(|engine| Ok(PhysicalId::new(&engine.session.master, path)))
    }

    pub fn create_dir(&self, path: &VirtualPath) -> Result<()> {
        self.with_engine(|engine| engine.create_dir(path))
    }

    pub fn read_dir(&self, path: &VirtualPath) -> Result<Vec<DirEntry>> {
        self.with_engine(|engine| Ok(engine.dir_listing(path)?.into_entries()))
    }

    /// Removes an empty directory. Fails with [`ErrorKind::Exists`] while
    /// it still has children.
    pub fn delete_dir(&self, path: &VirtualPath) -> Result<()> {
        self.with_engine(|engine| engine.delete_dir(path))
    }

    /// Replaces the whole content of the file at `path`, creating it if needed.
    pub fn write_file(&self, path: &VirtualPath, data: &[u8]) -> Result<()> {
        self.with_engine(|engine| engine.write_file(path, data))
    }

    pub fn read_file(&self, path: &VirtualPath) -> Result<Vec<u8>> {
        self.with_engine(|engine| {
            let table = engine.file_table(path)?;
            engine.read_range(path, &table, 0, table.logical_size)
        })
    }

    pub fn delete_file(&self, path: &VirtualPath) -> Result<()> {
        self.with_engine(|engine| engine.delete_file(path))
    }

    /// Writes `data` at `offset`, creating the file if needed. Writing past
    /// the end fills the gap with zeros. Only the chunks the write touches
    /// and their parity groups are rewritten.
    pub fn write_file_part(&self, path: &VirtualPath, offset: u64, data: &[u8]) -> Result<()> {
        self.with_engine(|engine| engine.write_file_part(path, offset, data))
    }

    /// Reads up to `length` bytes from `offset`. Fewer bytes come back when
    /// the file ends first; an offset past the end is
    /// [`ErrorKind::BadArgs`].
    pub fn read_file_part(&self, path: &VirtualPath, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.with_engine(|engine| {
            let table = engine.file_table(path)?;
            if offset > table.logical_size {
                return Err(StoreError::new(
                    ErrorKind::BadArgs,
                    format!(
                        "offset {offset} is past the end of {path} ({} bytes)",
                        table.logical_size
                    ),
                ));
            }
            let end = offset.saturating_add(length as u64).min(table.logical_size);
            engine.read_range(path, &table, offset, end)
        })
    }

    pub fn append_file(&self, path: &VirtualPath, data: &[u8]) -> Result<()> {
        self.with_engine(|engine| {
            let size = match engine.load_body(path)? {
                None => 0,
                Some(NodeBody::Dir(_)) => return Err(is_dir(path)),
                Some(NodeBody::File(table)) => table.logical_size,
            };
            engine.write_file_part(path, size, data)
        })
    }

    /// Every node below `path` in pre-order, paired with its entry in its
    /// parent directory.
    pub fn walk(&self, path: &VirtualPath) -> Result<Vec<(VirtualPath, DirEntry)>> {
        self.with_engine(|engine| {
            let mut out = Vec::new();
            engine.walk(path, &mut out)?;
            Ok(out)
        })
    }
}

fn open_session<M: Medium>(
    medium: &mut M,
    config: &StoreConfig,
    root: &str,
    password: &str,
) -> Result<Session> {
    if !medium.exists(root) {
        medium
            .create_dir(root)
            .map_err(|e| medium_error(ErrorKind::StorageError, format!("creating {root}"), e))?;
    }
    let recovered = recover_pending_writes(medium, root)?;
    if recovered > 0 {
        debug!("Completed {recovered} interrupted metadata writes in {root}");
    }
    let params_name = format!("{root}/{}", StoreParams::FILE_NAME);
    if medium.exists(&params_name) {
        let bytes = medium
            .read(&params_name)
            .map_err(|e| medium_error(ErrorKind::ReadError, format!("reading {params_name}"), e))?;
        let params = StoreParams::decode(&bytes)?;
        let master = MasterKey::derive(password, root, params.kdf_iterations);
        if !master.verify_key_check(&params.key_check) {
            return Err(StoreError::new(
                ErrorKind::CryptoError,
                format!("wrong password for store {root}"),
            ));
        }
        Ok(Session {
            root: root.to_owned(),
            master,
            geometry: params.geometry()?,
        })
    } else {
        let geometry = config.geometry()?;
        let iterations = match config.kdf {
            KdfIterations::Fixed(iterations) => iterations,
            KdfIterations::Calibrated(budget) => MasterKey::calibrate(budget),
        };
        let master = MasterKey::derive(password, root, iterations);
        let params = StoreParams::new(geometry, &master);
        medium
            .write(&params_name, &params.encode()?)
            .map_err(|e| medium_error(ErrorKind::WriteError, format!("writing {params_name}"), e))?;
        debug!(
            "Created store {root}: {} byte chunks, parity every {} chunks, {iterations} kdf rounds",
            geometry.chunk_size(),
            geometry.parity_group()
        );
        Ok(Session {
            root: root.to_owned(),
            master,
            geometry,
        })
    }
}

/// The medium and session of an initialised store, borrowed for one call.
struct Engine<'a, M: Medium> {
    medium: &'a mut M,
    session: &'a Session,
}

impl<'a, M: Medium> Engine<'a, M> {
    fn files(&self, path: &VirtualPath) -> NodeFiles {
        NodeFiles::new(&self.session.root, &PhysicalId::new(&self.session.master, path))
    }

    fn key(&self, path: &VirtualPath) -> Key {
        self.session.master.path_key(path)
    }

    fn ensure_root(&mut self) -> Result<()> {
        let root = VirtualPath::root();
        if self.load(&root)?.is_none() {
            debug!("Creating root directory of {}", self.session.root);
            self.save_dir(&root, &DirListing::default())?;
        }
        Ok(())
    }

    fn load(&self, path: &VirtualPath) -> Result<Option<NodeRecord>> {
        let Some(record) = read_node(&*self.medium, &self.files(path))? else {
            return Ok(None);
        };
        let iterations = self.session.master.iterations();
        if record.header.kdf_iterations != iterations {
            return Err(StoreError::new(
                ErrorKind::CryptoError,
                format!(
                    "{path} was written under {} kdf rounds, this store uses {iterations}",
                    record.header.kdf_iterations
                ),
            ));
        }
        Ok(Some(record))
    }

    fn open_dir(&self, path: &VirtualPath, record: &NodeRecord) -> Result<DirListing> {
        let listing = DirListing::decode(&record.open(&self.key(path))?)?;
        if record.header.logical_size != 0 || record.header.chunk_count != 0 {
            return Err(StoreError::new(
                ErrorKind::IntegrityError,
                format!("directory header of {path} claims file contents"),
            ));
        }
        Ok(listing)
    }

    /// Loads `path` and decodes its blob as the kind the header names. The
    /// header itself is not covered by the tag, so a blob that does not
    /// decode as that kind is an integrity error.
    fn load_body(&self, path: &VirtualPath) -> Result<Option<NodeBody>> {
        let Some(record) = self.load(path)? else {
            return Ok(None);
        };
        let body = match record.header.kind {
            NodeKind::Dir => NodeBody::Dir(self.open_dir(path, &record)?),
            NodeKind::File => NodeBody::File(self.chunk_table(path, &record)?),
        };
        Ok(Some(body))
    }

    fn dir_listing(&self, path: &VirtualPath) -> Result<DirListing> {
        match self.load_body(path)? {
            None => Err(not_found(path)),
            Some(NodeBody::File(_)) => Err(not_dir(path)),
            Some(NodeBody::Dir(listing)) => Ok(listing),
        }
    }

    fn chunk_table(&self, path: &VirtualPath, record: &NodeRecord) -> Result<ChunkTable> {
        let table = ChunkTable::decode(&record.open(&self.key(path))?)?;
        table.validate(
            &self.session.geometry,
            record.header.logical_size,
            record.header.chunk_count,
        )?;
        Ok(table)
    }

    fn file_table(&self, path: &VirtualPath) -> Result<ChunkTable> {
        match self.load_body(path)? {
            None => Err(not_found(path)),
            Some(NodeBody::Dir(_)) => Err(is_dir(path)),
            Some(NodeBody::File(table)) => Ok(table),
        }
    }

    fn save_dir(&mut self, path: &VirtualPath, listing: &DirListing) -> Result<()> {
        let record = NodeRecord::seal(
            NodeKind::Dir,
            0,
            0,
            self.session.master.iterations(),
            &self.key(path),
            &listing.encode()?,
        );
        let files = self.files(path);
        write_node(&mut *self.medium, &files, &record)
    }

    fn save_file(&mut self, path: &VirtualPath, table: &ChunkTable) -> Result<()> {
        let record = NodeRecord::seal(
            NodeKind::File,
            table.logical_size,
            table.chunk_count(),
            self.session.master.iterations(),
            &self.key(path),
            &table.encode(),
        );
        let files = self.files(path);
        write_node(&mut *self.medium, &files, &record)
    }

    fn remove_data_record(&mut self, files: &NodeFiles) -> Result<()> {
        let name = files.data();
        if self.medium.exists(&name) {
            self.medium
                .remove(&name)
                .map_err(|e| medium_error(ErrorKind::DeleteError, format!("removing {name}"), e))?;
        }
        Ok(())
    }

    fn info(&self, path: &VirtualPath) -> Result<Info> {
        let (is_dir, size) = match self.load_body(path)?.ok_or_else(|| not_found(path))? {
            NodeBody::Dir(_) => (true, 0),
            NodeBody::File(table) => (false, table.logical_size),
        };
        Ok(Info {
            exists: true,
            is_dir,
            size,
        })
    }

    fn create_dir(&mut self, path: &VirtualPath) -> Result<()> {
        if path.is_root() || self.medium.exists(&self.files(path).node()) {
            return Err(StoreError::new(ErrorKind::Exists, format!("{path} already exists")));
        }
        let (parent, name) = split(path)?;
        let mut listing = self.dir_listing(&parent)?;
        self.save_dir(path, &DirListing::default())?;
        listing.upsert(DirEntry {
            name,
            is_dir: true,
            size: 0,
        });
        self.save_dir(&parent, &listing)?;
        debug!("Created directory {path}");
        Ok(())
    }

    fn delete_dir(&mut self, path: &VirtualPath) -> Result<()> {
        if path.is_root() {
            return Err(StoreError::new(ErrorKind::BadArgs, "the root directory cannot be deleted"));
        }
        let children = match self.load_body(path)?.ok_or_else(|| not_found(path))? {
            NodeBody::File(_) => return Err(not_dir(path)),
            NodeBody::Dir(children) => children,
        };
        if !children.is_empty() {
            return Err(StoreError::new(
                ErrorKind::Exists,
                format!("{path} still has {} entries", children.entries().len()),
            ));
        }
        let (parent, name) = split(path)?;
        let mut listing = self.dir_listing(&parent)?;
        let files = self.files(path);
        remove_node(&mut *self.medium, &files)?;
        listing.remove(&name);
        self.save_dir(&parent, &listing)?;
        debug!("Deleted directory {path}");
        Ok(())
    }

    fn write_file(&mut self, path: &VirtualPath, data: &[u8]) -> Result<()> {
        if path.is_root() {
            return Err(is_dir(path));
        }
        let (parent, name) = split(path)?;
        let mut listing = self.dir_listing(&parent)?;
        let old_chunks = match self.load_body(path)? {
            None => 0,
            Some(NodeBody::Dir(_)) => return Err(is_dir(path)),
            Some(NodeBody::File(table)) => table.chunk_count(),
        };
        let geometry = self.session.geometry;
        let chunk_size = geometry.chunk_size();
        if u32::try_from(geometry.chunks_for(data.len() as u64)).is_err() {
            return Err(StoreError::new(
                ErrorKind::BadArgs,
                format!("{} bytes do not fit in one file", data.len()),
            ));
        }
        let files = self.files(path);
        let key = self.key(path);
        let cipher = ChunkCipher::new(&key, chunk_size);
        self.remove_data_record(&files)?;

        let mut table = ChunkTable {
            logical_size: data.len() as u64,
            chunks: Vec::with_capacity(data.len().div_ceil(chunk_size)),
        };
        let mut group = Vec::with_capacity(geometry.parity_group());
        for (index, plaintext) in data.chunks(chunk_size).enumerate() {
            let index = index as u32;
            let (record, meta) = cipher.seal(index, plaintext)?;
            append_record(&mut *self.medium, &files, &record)?;
            table.chunks.push(meta);
            group.push(record.cipher);
            if group.len() == geometry.parity_group() {
                let parity = compute_xor_parity(&group, chunk_size);
                write_parity(&mut *self.medium, &files, geometry.group_of(index), &parity)?;
                group.clear();
            }
        }
        if !group.is_empty() {
            let parity = compute_xor_parity(&group, chunk_size);
            let last_group = geometry.groups_for(table.chunk_count()) - 1;
            write_parity(&mut *self.medium, &files, last_group, &parity)?;
        }
        remove_parity(
            &mut *self.medium,
            &files,
            geometry.groups_for(table.chunk_count())..geometry.groups_for(old_chunks),
        )?;

        self.save_file(path, &table)?;
        listing.upsert(DirEntry {
            name,
            is_dir: false,
            size: table.logical_size,
        });
        self.save_dir(&parent, &listing)?;
        debug!("Wrote {path}: {} bytes in {} chunks", table.logical_size, table.chunk_count());
        Ok(())
    }

    /// Plaintext bytes `[start, end)` of the file, reading only the chunks
    /// covering that range.
    fn read_range(&self, path: &VirtualPath, table: &ChunkTable, start: u64, end: u64) -> Result<Vec<u8>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let geometry = self.session.geometry;
        let chunk_size = geometry.chunk_size() as u64;
        let files = self.files(path);
        let key = self.key(path);
        let cipher = ChunkCipher::new(&key, geometry.chunk_size());
        let reader = ChunkReader::new(&*self.medium, &files, &cipher, table, geometry);
        let mut out = Vec::with_capacity((end - start) as usize);
        for index in start / chunk_size..=(end - 1) / chunk_size {
            let plaintext = reader.plaintext(index as u32)?;
            let chunk_start = index * chunk_size;
            let from = start.max(chunk_start) - chunk_start;
            let to = end.min(chunk_start + chunk_size) - chunk_start;
            out.extend_from_slice(&plaintext[from as usize..to as usize]);
        }
        trace!("Read {} bytes of {path} at {start}", out.len());
        Ok(out)
    }

    fn delete_file(&mut self, path: &VirtualPath) -> Result<()> {
        if path.is_root() {
            return Err(is_dir(path));
        }
        let table = self.file_table(path)?;
        let (parent, name) = split(path)?;
        let mut listing = self.dir_listing(&parent)?;
        let files = self.files(path);
        self.remove_data_record(&files)?;
        let groups = self.session.geometry.groups_for(table.chunk_count());
        remove_parity(&mut *self.medium, &files, 0..groups)?;
        remove_node(&mut *self.medium, &files)?;
        listing.remove(&name);
        self.save_dir(&parent, &listing)?;
        debug!("Deleted {path}");
        Ok(())
    }

    fn write_file_part(&mut self, path: &VirtualPath, offset: u64, data: &[u8]) -> Result<()> {
        if path.is_root() {
            return Err(is_dir(path));
        }
        let (parent, name) = split(path)?;
        let mut listing = self.dir_listing(&parent)?;
        let mut table = match self.load_body(path)? {
            None => ChunkTable::default(),
            Some(NodeBody::Dir(_)) => return Err(is_dir(path)),
            Some(NodeBody::File(table)) => table,
        };
        let end = offset.checked_add(data.len() as u64).ok_or_else(|| {
            StoreError::new(ErrorKind::BadArgs, format!("write at {offset} overflows"))
        })?;
        let geometry = self.session.geometry;
        let chunk_size = geometry.chunk_size();
        let chunk_len = chunk_size as u64;
        let new_size = table.logical_size.max(end);
        let new_count = u32::try_from(geometry.chunks_for(new_size)).map_err(|_| {
            StoreError::new(ErrorKind::BadArgs, format!("{new_size} bytes do not fit in one file"))
        })?;
        let old_count = table.chunk_count();

        // New chunks plus the ones `data` overlaps. Bytes past the old end
        // are already zero inside the old last chunk.
        let mut touched: BTreeSet<u32> = (old_count..new_count).collect();
        if !data.is_empty() {
            touched.extend((offset / chunk_len) as u32..=((end - 1) / chunk_len) as u32);
        }
        let groups: BTreeSet<u32> = touched.iter().map(|&index| geometry.group_of(index)).collect();

        let files = self.files(path);
        let key = self.key(path);
        let cipher = ChunkCipher::new(&key, chunk_size);

        // Everything the rewrite depends on is read before the first record
        // changes, so old parity can still repair an untouched sibling.
        let mut plaintexts = BTreeMap::new();
        let mut members = BTreeMap::new();
        let mut repaired = Vec::new();
        {
            let reader = ChunkReader::new(&*self.medium, &files, &cipher, &table, geometry);
            for &index in &touched {
                let plaintext = if index < old_count {
                    reader.plaintext(index)?
                } else {
                    vec![0; chunk_size]
                };
                plaintexts.insert(index, plaintext);
            }
            for &group in &groups {
                for member in geometry.group_members(group, old_count) {
                    if !touched.contains(&member) {
                        let (member_cipher, rebuilt) = reader.checked_cipher(member)?;
                        if rebuilt {
                            repaired.push(member);
                        }
                        members.insert(member, member_cipher);
                    }
                }
            }
        }

        // new parity is computed from the repaired ciphertext
        for member in repaired {
            let record = ChunkRecord {
                iv: table.chunks[member as usize].iv,
                cipher: members[&member].clone(),
            };
            write_record(&mut *self.medium, &files, member, &record)?;
            debug!("Rewrote chunk {member} of {path} from parity");
        }

        for (index, mut plaintext) in plaintexts {
            let chunk_start = index as u64 * chunk_len;
            let from = offset.max(chunk_start);
            let to = end.min(chunk_start + chunk_len);
            if from < to {
                plaintext[(from - chunk_start) as usize..(to - chunk_start) as usize]
                    .copy_from_slice(&data[(from - offset) as usize..(to - offset) as usize]);
            }
            let (record, meta) = cipher.seal(index, &plaintext)?;
            write_record(&mut *self.medium, &files, index, &record)?;
            match table.chunks.get_mut(index as usize) {
                Some(slot) => *slot = meta,
                None => table.chunks.push(meta),
            }
            members.insert(index, record.cipher);
        }

        for group in groups {
            let mut ciphers = Vec::with_capacity(geometry.parity_group());
            for member in geometry.group_members(group, new_count) {
                let member_cipher = members.get(&member).ok_or_else(|| {
                    StoreError::new(
                        ErrorKind::InternalError,
                        format!("chunk {member} of {path} missing from parity group {group}"),
                    )
                })?;
                ciphers.push(member_cipher.as_slice());
            }
            let parity = compute_xor_parity(&ciphers, chunk_size);
            write_parity(&mut *self.medium, &files, group, &parity)?;
        }

        table.logical_size = new_size;
        self.save_file(path, &table)?;
        listing.upsert(DirEntry {
            name,
            is_dir: false,
            size: new_size,
        });
        self.save_dir(&parent, &listing)?;
        debug!(
            "Wrote {} bytes of {path} at {offset}, rewrote {} chunks",
            data.len(),
            touched.len()
        );
        Ok(())
    }

    fn walk(&self, path: &VirtualPath, out: &mut Vec<(VirtualPath, DirEntry)>) -> Result<()> {
        for entry in self.dir_listing(path)?.into_entries() {
            let child = path.join(&entry.name)?;
            let descend = entry.is_dir;
            out.push((child.clone(), entry));
            if descend {
                self.walk(&child, out)?;
            }
        }
        Ok(())
    }
}

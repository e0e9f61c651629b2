use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use vaultfs::chunk::{ChunkRecord, RECORD_HEADER_LEN};
use vaultfs::node::{NodeHeader, NodeRecord};
use vaultfs::path::NodeFiles;
use vaultfs::{DirEntry, DiskMedium, ErrorKind, KvStore, Store, StoreConfig, VirtualPath};

const ROOT: &str = "secure";
const CHUNK: usize = 4096;

fn config() -> StoreConfig {
    StoreConfig::default().with_kdf_iterations(16)
}

fn open(dir: &Path, password: &str) -> vaultfs::Result<Store<DiskMedium>> {
    Store::open(DiskMedium::new(dir), config(), ROOT, password)
}

fn path(s: &str) -> VirtualPath {
    s.parse().unwrap()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 8) as u8)
        .collect()
}

fn on_disk(store: &Store<DiskMedium>, p: &str) -> NodeFiles {
    NodeFiles::new(ROOT, &store.physical_id(&path(p)).unwrap())
}

fn flip_bit(file: &Path, offset: usize, bit: u8) {
    let mut bytes = fs::read(file).unwrap();
    bytes[offset] ^= 1 << bit;
    fs::write(file, bytes).unwrap();
}

fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out: Vec<_> = fs::read_dir(dir.join(ROOT))
        .unwrap()
        .map(|e| {
            let p = e.unwrap().path();
            let bytes = fs::read(&p).unwrap();
            (p, bytes)
        })
        .collect();
    out.sort();
    out
}

#[test]
fn round_trip_across_chunk_boundaries() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    for (i, len) in [0, 1, CHUNK - 1, CHUNK, CHUNK + 1, 10 * CHUNK].into_iter().enumerate() {
        let p = path(&format!("/file{i}"));
        let data = pattern(len, i as u8);
        store.write_file(&p, &data).unwrap();
        assert_eq!(store.read_file(&p).unwrap(), data, "length {len}");
        assert_eq!(store.info(&p).unwrap().size, len as u64);
    }
    drop(store);

    let store = open(tmp.path(), "pw1").unwrap();
    assert_eq!(store.read_file(&path("/file5")).unwrap(), pattern(10 * CHUNK, 5));
}

#[test]
fn deleting_missing_file_has_no_side_effects() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    store.write_file(&path("/kept"), b"kept").unwrap();
    let before = snapshot(tmp.path());
    let err = store.delete_file(&path("/missing")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(snapshot(tmp.path()), before);
}

#[test]
fn directory_must_be_empty_to_delete() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    let dir = path("/a");
    store.create_dir(&dir).unwrap();
    store.write_file(&path("/a/one"), b"1").unwrap();
    store.create_dir(&path("/a/sub")).unwrap();

    assert_eq!(store.delete_dir(&dir).unwrap_err().kind(), ErrorKind::Exists);
    assert_eq!(store.read_dir(&dir).unwrap().len(), 2);

    store.delete_file(&path("/a/one")).unwrap();
    assert_eq!(store.delete_dir(&dir).unwrap_err().kind(), ErrorKind::Exists);
    store.delete_dir(&path("/a/sub")).unwrap();
    store.delete_dir(&dir).unwrap();
    assert_eq!(store.info(&dir).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(!store.exists(&dir).unwrap());
}

#[test]
fn any_flipped_blob_bit_is_an_integrity_error() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    store.create_dir(&path("/a")).unwrap();
    store.write_file(&path("/a/f.txt"), b"hello").unwrap();

    for (target, is_dir) in [("/a", true), ("/a/f.txt", false)] {
        let node = tmp.path().join(on_disk(&store, target).node());
        let blob_start = NodeHeader::SIZE + 4;
        let len = fs::metadata(&node).unwrap().len() as usize;
        for offset in blob_start..len {
            let bit = (offset % 8) as u8;
            flip_bit(&node, offset, bit);
            let err = if is_dir {
                store.read_dir(&path(target)).unwrap_err()
            } else {
                store.read_file(&path(target)).unwrap_err()
            };
            assert_eq!(err.kind(), ErrorKind::IntegrityError, "{target} byte {offset}");
            flip_bit(&node, offset, bit);
        }
    }
    assert_eq!(store.read_file(&path("/a/f.txt")).unwrap(), b"hello");
}

#[test]
fn one_lost_chunk_per_group_is_recovered() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    let file = path("/big");
    let data = pattern(4 * CHUNK, 9);
    store.write_file(&file, &data).unwrap();
    let data_file = tmp.path().join(on_disk(&store, "/big").data());

    let second = ChunkRecord::offset(1, CHUNK) as usize + RECORD_HEADER_LEN + 100;
    flip_bit(&data_file, second, 0);
    assert_eq!(store.read_file(&file).unwrap(), data);
    assert_eq!(store.read_file_part(&file, CHUNK as u64, 10).unwrap(), &data[CHUNK..CHUNK + 10]);

    let fourth = ChunkRecord::offset(3, CHUNK) as usize + RECORD_HEADER_LEN;
    flip_bit(&data_file, fourth, 7);
    assert_eq!(store.read_file(&file).unwrap_err().kind(), ErrorKind::ReadError);
}

#[test]
fn truncated_last_chunk_is_recovered() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    let file = path("/f");
    let data = pattern(2 * CHUNK + 17, 3);
    store.write_file(&file, &data).unwrap();
    let data_file = tmp.path().join(on_disk(&store, "/f").data());
    let len = fs::metadata(&data_file).unwrap().len();
    let f = fs::OpenOptions::new().write(true).open(&data_file).unwrap();
    f.set_len(len - 100).unwrap();
    drop(f);
    assert_eq!(store.read_file(&file).unwrap(), data);
}

#[test]
fn physical_names_reveal_no_paths() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    let names = ["secretdir", "notes.txt", "passwords.kdbx", "zzz"];
    store.create_dir(&path("/secretdir")).unwrap();
    store.write_file(&path("/secretdir/notes.txt"), b"n").unwrap();
    store.write_file(&path("/passwords.kdbx"), &pattern(3 * CHUNK, 1)).unwrap();
    store.write_file(&path("/zzz"), b"z").unwrap();

    for entry in fs::read_dir(tmp.path().join(ROOT)).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        for plain in names {
            assert!(!name.contains(plain), "{name} leaks {plain}");
        }
    }
    let ids: BTreeSet<String> = ["/", "/secretdir", "/secretdir/notes.txt", "/passwords.kdbx", "/zzz"]
        .iter()
        .map(|p| store.physical_id(&path(p)).unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 5);
}

#[test]
fn create_write_list_read_scenario() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    let dir = VirtualPath::from_segments(["a"]).unwrap();
    let file = VirtualPath::from_segments(["a", "f.txt"]).unwrap();
    store.create_dir(&dir).unwrap();
    store.write_file(&file, b"hello").unwrap();
    assert_eq!(
        store.read_dir(&dir).unwrap(),
        [DirEntry {
            name: "f.txt".to_owned(),
            is_dir: false,
            size: 5
        }]
    );
    assert_eq!(store.read_file(&file).unwrap(), b"hello");
}

#[test]
fn logical_size_is_not_rounded() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    store.write_file(&path("/p"), &pattern(10_000, 0)).unwrap();
    let node = tmp.path().join(on_disk(&store, "/p").node());
    let record = NodeRecord::decode(&fs::read(node).unwrap()).unwrap();
    assert_eq!(record.header.chunk_count, 3);
    assert_eq!(record.header.logical_size, 10_000);
}

#[test]
fn wrong_password_is_rejected() {
    let tmp = TempDir::new().unwrap();
    open(tmp.path(), "pw1").unwrap().write_file(&path("/f"), b"x").unwrap();
    assert_eq!(open(tmp.path(), "pw2").err().unwrap().kind(), ErrorKind::CryptoError);
    assert_eq!(open(tmp.path(), "pw1").unwrap().read_file(&path("/f")).unwrap(), b"x");
}

#[test]
fn partial_io_touches_only_covering_chunks() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    let file = path("/log");
    let mut expected = pattern(3 * CHUNK, 4);
    store.write_file(&file, &expected).unwrap();
    let data_file = tmp.path().join(on_disk(&store, "/log").data());
    let before = fs::read(&data_file).unwrap();

    store.write_file_part(&file, CHUNK as u64 + 5, b"patched").unwrap();
    expected[CHUNK + 5..CHUNK + 12].copy_from_slice(b"patched");
    let after = fs::read(&data_file).unwrap();
    let record = RECORD_HEADER_LEN + CHUNK;
    assert_eq!(before[..record], after[..record]);
    assert_ne!(before[record..2 * record], after[record..2 * record]);
    assert_eq!(before[2 * record..], after[2 * record..]);

    assert_eq!(store.read_file_part(&file, CHUNK as u64, 12).unwrap(), &expected[CHUNK..CHUNK + 12]);
    store.append_file(&file, b"appended").unwrap();
    expected.extend_from_slice(b"appended");
    assert_eq!(store.read_file(&file).unwrap(), expected);
}

#[test]
fn concurrent_writers_keep_every_directory_entry() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    store.create_dir(&path("/shared")).unwrap();
    std::thread::scope(|s| {
        for t in 0..4 {
            let store = &store;
            s.spawn(move || {
                for i in 0..5 {
                    let p = path(&format!("/shared/t{t}-{i}"));
                    store.write_file(&p, &pattern(100 + i, t as u8)).unwrap();
                }
            });
        }
    });
    let entries = store.read_dir(&path("/shared")).unwrap();
    assert_eq!(entries.len(), 20);
    for t in 0..4u8 {
        for i in 0..5 {
            let p = path(&format!("/shared/t{t}-{i}"));
            assert_eq!(store.read_file(&p).unwrap(), pattern(100 + i, t));
        }
    }
}

#[test]
fn stale_temp_record_is_dropped_on_init() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    store.write_file(&path("/f"), b"current").unwrap();
    let files = on_disk(&store, "/f");
    drop(store);
    let tmp_record = tmp.path().join(files.node_tmp());
    fs::write(&tmp_record, b"half written").unwrap();

    let store = open(tmp.path(), "pw1").unwrap();
    assert!(!tmp_record.exists());
    assert_eq!(store.read_file(&path("/f")).unwrap(), b"current");
}

#[test]
fn key_value_values_live_in_the_store() {
    let tmp = TempDir::new().unwrap();
    let store = open(tmp.path(), "pw1").unwrap();
    let kv = KvStore::new(&store, "settings").unwrap();
    kv.set("wifi/ssid", b"home").unwrap();
    assert_eq!(kv.get("wifi/ssid").unwrap(), b"home");
    let entries = store.read_dir(&path("/settings/data")).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].name.ends_with(".data"));
    assert!(!entries[0].name.contains("wifi"));
}

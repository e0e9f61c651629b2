pub mod chunk;
pub mod config;
pub mod crypto;
pub mod dir;
pub mod error;
pub mod kv;
pub mod medium;
pub mod node;
pub mod parity;
pub mod path;
pub mod store;

pub use config::{KdfIterations, StoreConfig};
pub use dir::DirEntry;
pub use error::{ErrorKind, Result, StoreError};
pub use kv::KvStore;
pub use medium::{DiskMedium, Medium, MemoryMedium};
pub use path::VirtualPath;
pub use store::{Info, Store};

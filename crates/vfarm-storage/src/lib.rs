//! Object-store layer for render artifacts.
//!
//! Every blob a render produces lives under `renders/<renderId>/`, so
//! unrelated concurrent renders never collide and a restarted coordinator
//! can resume purely from store state. The store's listing is the only
//! coordination primitive in the system.

pub mod error;
pub mod keys;
pub mod memory;
pub mod records;
pub mod s3;
pub mod singleflight;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use s3::{S3Store, StoreConfig};
pub use singleflight::SingleFlight;
pub use store::{content_disposition_header, ObjectInfo, ObjectStore, PutOptions};

// SQLite-backed on-device storage
// Survives restarts, which is all the poller needs to remember what it already showed

pub mod error;
pub mod kv;
pub mod seen;

pub use error::{Result, StoreError};
pub use kv::KvStore;
pub use seen::{SeenSet, SeenStore, DEFAULT_SEEN_CAPACITY, SEEN_IDS_KEY};

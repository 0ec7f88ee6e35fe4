pub mod key;
pub mod store;

pub use key::{compute_key, sha256_hex, to_canonical_json};
pub use store::{CacheKind, CacheOutcome, CacheRecord, CacheStore};

pub mod codec;
pub mod error;
pub mod memory;
pub mod postgres_store;
pub mod redb_store;
pub mod store;

pub use codec::{content_hash, SecretCodec};
pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres_store::PostgresStore;
pub use redb_store::RedbStore;
pub use store::JobStore;

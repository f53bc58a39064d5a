pub mod memory;
pub mod pg_store;
pub mod pool;
pub mod queries;
pub mod store;

pub use memory::MemoryStore;
pub use pg_store::PgStore;
pub use pool::create_pool;
pub use store::{CatalogReader, Store};

pub mod error;
pub mod file_store;
pub mod store;
pub mod writer;

pub use error::PersistenceError;
pub use file_store::FileStore;
pub use store::{MemoryStore, SessionStore};
pub use writer::run_save_writer;

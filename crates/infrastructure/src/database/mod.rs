pub mod manager;
pub mod mapping;
pub mod memory;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use memory::{InMemoryExecutionStore, InMemoryTaskStore};
pub use sqlite::{SqliteExecutionStore, SqliteTaskStore};

pub mod directory;
pub mod inventory;
pub mod memory;
pub mod postgres;

pub use directory::{Directory, DirectoryError, NewUser, PgDirectory, UserRecord};
pub use inventory::{InventoryItem, InventoryRepository, ItemUpdate, NewItem, RepositoryError};
pub use memory::{MemoryDirectory, MemoryTransport};
pub use postgres::PgTransport;

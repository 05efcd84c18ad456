pub mod campus_store;
pub mod memory_store;
pub mod migrations;

pub use campus_store::{CampusStore, OrganizationStatus, QueryRows, SharedCampusStore};
pub use memory_store::{
    MemoryEntry, MemoryProvider, MemoryStore, NewMemoryEntry, RecallQuery, SqliteMemory,
};

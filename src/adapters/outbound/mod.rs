mod database_checker;
mod memory_checker;
mod sqlite_user_repo;

pub use database_checker::DatabaseChecker;
pub use memory_checker::{resident_bytes, MemoryChecker};
pub use sqlite_user_repo::SqliteUserRepository;

pub mod database;
pub mod local;

pub use database::{IndexDatabase, StoredChunk, DATABASE_FILE};
pub use local::{IndexHeader, IndexOpenOutcome, LocalVectorIndex};

pub mod cache;
pub mod dao;
pub mod entity;
pub mod error;
pub mod merge;
pub mod record;

pub use collector_api_derive::Merge;

pub use cache::{DimensionCache, NoCache};
pub use dao::{PersistenceDao, StorageBackend};
pub use entity::Entity;
pub use error::{ErrorKind, StorageError};
pub use merge::Merge;
pub use record::Record;

pub mod cache;
pub mod storage;

pub use cache::{LegacyCaches, RepoKey};
pub use storage::MirrorStorage;

pub mod index;
pub mod repo;

pub use repo::{GraphData, GraphRepository, LinkFilter, MemoryRepository, RepoError, SimilarNodesQuery};

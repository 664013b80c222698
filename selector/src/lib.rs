pub mod arxiv;
pub mod gating;
pub mod scholar;
pub mod selector;
pub mod source;

pub use arxiv::ArxivClient;
pub use gating::{RetrievalStats, ScoredCandidate, TemporalRerank};
pub use scholar::ScholarClient;
pub use selector::{CorpusSelector, SelectionOutcome, SelectorConfig, SelectorError};
pub use source::{BibliographicSource, CandidatePaper, FulltextSource, SourceError};

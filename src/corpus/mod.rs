//! Historical corpus module
//!
//! Loads the per-horizon index, timestamp table and outcome table once at
//! start-up. Nothing here is mutated while serving.

mod artifacts;
mod embedder;
mod loader;

pub use artifacts::{CorpusStore, HorizonCorpus, OutcomeTable};
pub use embedder::HashEmbedder;
pub use loader::{CorpusLoader, DirectoryCorpusLoader, HorizonArtifactFile, SyntheticCorpusLoader};

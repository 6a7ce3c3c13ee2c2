//! Memory records and the pipelines that produce and serve them
//!
//! Records flow from the [`LearningExtractor`] into the raw tier, up the
//! [`SummarizationLadder`] into short, mid and long summaries, and back out
//! through the [`RetrievalEngine`].

pub mod extractor;
pub mod ladder;
pub mod retrieval;
pub mod types;

pub use extractor::{CandidateLearning, ExtractionReport, LearningExtractor};
pub use ladder::{LadderMode, LadderReport, SummarizationLadder, SummaryOutput};
pub use retrieval::{RetrievalEngine, RetrievedContext};
pub use types::{Category, MemoryRecord, Tier};

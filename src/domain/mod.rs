//! Core domain types with no transport dependencies:
//! - Creation requests and batches
//! - Chunking
//! - Downstream reports and classified chunk outcomes
//! - Aggregation into a batch result

pub mod chunk;
pub mod outcome;
pub mod report;
pub mod request;
pub mod result;

pub use chunk::{Chunk, DEFAULT_FANOUT, split};
pub use outcome::{ChunkOutcome, OutcomeKind};
pub use report::{ChunkReport, ResponseShape, UserResult};
pub use request::{Batch, CreationRequest};
pub use result::{BatchResult, OverallStatus, UserTally};

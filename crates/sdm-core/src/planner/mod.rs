//! Chunk planning.
//!
//! Splits `[0, total)` into aligned, roughly equal byte ranges and provides
//! the range math used by workers and the monitor when a range is re-split.

mod chunk;
mod plan;

pub use chunk::{align_down, align_up, Chunk, OPEN_END};
pub use plan::{plan_chunks, ChunkPlan};

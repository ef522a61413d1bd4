//! Chunk plan for a probed resource.

use super::chunk::{align_down, align_up, Chunk};
use crate::config::ChunkBounds;

/// Result of planning: the initial chunks and whether they are fetched with
/// Range requests. Unranged plans hold a single chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    pub ranged: bool,
}

impl ChunkPlan {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Builds the initial chunk plan.
///
/// - Unknown `total` → one open-ended chunk, fetched without a Range header.
/// - No range support → one chunk `[0, total)`.
/// - `total == 0` → no chunks.
/// - Otherwise `max(total / target, 1)` chunks of `ceil(total / count)` bytes,
///   clamped into `[min, max]` and aligned when an aligned size fits those
///   bounds; the last chunk ends exactly at `total`.
pub fn plan_chunks(
    total: Option<u64>,
    accept_ranges: bool,
    bounds: ChunkBounds,
    align: u64,
) -> ChunkPlan {
    let Some(total) = total else {
        return ChunkPlan {
            chunks: vec![Chunk::open_ended(0)],
            ranged: false,
        };
    };
    if total == 0 {
        return ChunkPlan {
            chunks: Vec::new(),
            ranged: accept_ranges,
        };
    }
    if !accept_ranges {
        return ChunkPlan {
            chunks: vec![Chunk::new(0, total)],
            ranged: false,
        };
    }

    let size = chunk_size(total, bounds, align);
    let mut chunks = Vec::with_capacity(total.div_ceil(size) as usize);
    let mut offset = 0u64;
    while offset < total {
        let end = offset.saturating_add(size).min(total);
        chunks.push(Chunk::new(offset, end));
        offset = end;
    }
    ChunkPlan {
        chunks,
        ranged: true,
    }
}

/// Clamped size, moved onto an alignment boundary only when that boundary
/// still lies within `[min, max]`.
fn chunk_size(total: u64, bounds: ChunkBounds, align: u64) -> u64 {
    let min = bounds.min.max(1);
    let max = bounds.max.max(min);
    let count = (total / bounds.target.max(1)).max(1);
    let size = total.div_ceil(count).clamp(min, max);
    let within = |s: u64| s >= min && s <= max;
    let up = align_up(size, align);
    let down = align_down(size, align);
    if within(up) {
        up
    } else if within(down) {
        down
    } else {
        size
    }
}

//! Data-parallel fan-out over the rayon worker pool
//!
//! Matrix-vector rows and attention heads write disjoint output slots, so
//! both fan-outs hand each worker an exclusive `&mut` partition. Units may
//! finish in any order; both helpers join before returning. Small workloads
//! stay on the calling thread since pool dispatch costs more than the work.

use rayon::prelude::*;

/// Below this many slots a serial loop beats pool dispatch
const PARALLEL_SLOT_THRESHOLD: usize = 1024;

/// Below this many chunks a serial loop beats pool dispatch
pub const PARALLEL_CHUNK_THRESHOLD: usize = 4;

/// Run `op(index, &mut slot)` for every slot of `out`, in parallel for
/// large outputs.
///
/// `min_len` caps how finely rayon may split the range, keeping scheduling
/// overhead amortized over a run of adjacent slots.
pub fn for_each_slot<T, F>(out: &mut [T], min_len: usize, op: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync,
{
    if out.len() < PARALLEL_SLOT_THRESHOLD {
        for (i, slot) in out.iter_mut().enumerate() {
            op(i, slot);
        }
        return;
    }
    out.par_iter_mut()
        .with_min_len(min_len.max(1))
        .enumerate()
        .for_each(|(i, slot)| op(i, slot));
}

/// Run `op(index, &mut chunk)` for every `chunk_len`-sized chunk of `out`,
/// in parallel when there are enough chunks.
///
/// # Panics
///
/// Panics when `chunk_len` is zero or does not divide `out.len()`.
pub fn for_each_chunk<T, F>(out: &mut [T], chunk_len: usize, op: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    assert!(chunk_len > 0, "chunk length must be positive");
    assert_eq!(
        out.len() % chunk_len,
        0,
        "output length {} is not a multiple of chunk length {chunk_len}",
        out.len()
    );
    if out.len() / chunk_len < PARALLEL_CHUNK_THRESHOLD {
        for (i, chunk) in out.chunks_mut(chunk_len).enumerate() {
            op(i, chunk);
        }
        return;
    }
    out.par_chunks_mut(chunk_len)
        .enumerate()
        .for_each(|(i, chunk)| op(i, chunk));
}

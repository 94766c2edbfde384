// ============================================================================
// ARBOR ERASURE CODING - Reed-Solomon Payload Coder
// ============================================================================
// PURPOSE: Encode a proposed block's command payload into N shards so every
// replica can be handed exactly one, and recover the payload from any
// k = N - f of them.
//
// PARAMETERS (derived from the cluster size N):
// - recovery (parity) shards m = (N - 1) / 3
// - original (data) shards  k = N - m
//
// SHARD LAYOUT:
// The payload is framed with a 16-byte header before splitting:
//   u64 data_bytes (LE) || u64 slice_bytes (LE) || payload || zero padding
// slice_bytes = ceil((data_bytes + 16) / k); every emitted shard is padded
// to buffer_bytes = ceil(slice_bytes / 64) * 64 (the coder operates on
// 64-byte-aligned buffers). Originals occupy indices [0, k), recoveries
// [k, k + m).
// ============================================================================

mod coder;

pub use coder::{init, ErasureCoder, ErasureError};

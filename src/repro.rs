//! Reproducible global sums via 128-bit fixed-point accumulation.
//!
//! Floating-point addition does not reassociate, so a naive distributed sum
//! depends on the rank count and reduction tree. Here every value is scaled
//! by a globally agreed unit, rounded to an `i128`, and the integer partial
//! sums are combined bit-exactly with [`Communicator::add_int128`]. The
//! result is identical for any partitioning of the same values.

use crate::comm::{Communicator, ReduceOp};
use crate::error::Result;

/// Scale `value` into fixed-point units. All ranks must use the same `unit`.
#[inline]
pub fn int128_from_double(value: f64, unit: f64) -> i128 {
    (value / unit).round() as i128
}

/// Convert a fixed-point accumulator back to floating point.
#[inline]
pub fn int128_to_double(x: i128, unit: f64) -> f64 {
    (x as f64) * unit
}

/// Deterministic global sum of `values` over all ranks.
///
/// The unit is derived from the global maximum magnitude, so each term keeps
/// 52 bits of precision relative to the largest one. Collective over `comm`.
pub fn repro_sum<C: Communicator>(comm: &C, values: &[f64]) -> Result<f64> {
    let local_max = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let global_max = comm.allreduce(local_max, ReduceOp::Max)?;
    if global_max == 0.0 {
        return Ok(0.0);
    }
    let unit = global_max / (1u64 << 52) as f64;
    let local: i128 = values.iter().map(|&v| int128_from_double(v, unit)).sum();
    let total = comm.add_int128(local)?;
    Ok(int128_to_double(total, unit))
}

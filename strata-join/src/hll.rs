//! HyperLogLog distinct-tuple estimation used to size one-to-many tables.
//!
//! One sketch per worker thread over its slice of rows, unified by register
//! max afterwards; the estimate only sizes the table, so the usual HLL error
//! bounds are acceptable.

use rayon::prelude::*;
use strata_result::Result;

use crate::columns::GenericKeyHandler;
use crate::probe::{build_probe_key, hash_composite_key};

/// Register-index bits; 2^11 registers.
pub const HLL_PRECISION_BITS: u32 = 11;

const NUM_REGISTERS: usize = 1 << HLL_PRECISION_BITS;

/// One HyperLogLog sketch with byte-wide registers.
#[derive(Clone)]
pub struct HllSketch {
    registers: Vec<u8>,
}

impl Default for HllSketch {
    fn default() -> Self {
        Self::new()
    }
}

impl HllSketch {
    pub fn new() -> Self {
        Self {
            registers: vec![0; NUM_REGISTERS],
        }
    }

    /// Size of one sketch buffer, padded for alignment.
    pub fn padded_size_bytes() -> usize {
        NUM_REGISTERS.next_multiple_of(64)
    }

    pub fn update(&mut self, hash: u64) {
        let index = (hash >> (64 - HLL_PRECISION_BITS)) as usize;
        let rest = hash << HLL_PRECISION_BITS;
        let max_rank = (64 - HLL_PRECISION_BITS + 1) as u8;
        let rank = ((rest.leading_zeros() + 1) as u8).min(max_rank);
        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
    }

    /// Merge another sketch into this one by register max.
    pub fn unify(&mut self, other: &HllSketch) {
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
    }

    /// Bias-corrected cardinality estimate with the small-range correction.
    pub fn estimate(&self) -> usize {
        let m = NUM_REGISTERS as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-(r as i32)))
            .sum();
        let raw = alpha * m * m / sum;
        if raw <= 2.5 * m {
            let zeros = self.registers.iter().filter(|&&r| r == 0).count();
            if zeros > 0 {
                return (m * (m / zeros as f64).ln()).round() as usize;
            }
        }
        raw.round() as usize
    }
}

/// Estimate the number of distinct composite keys the handler would emit,
/// one sketch per worker thread over its slice of rows.
pub fn approximate_distinct_tuples(
    key_handler: &GenericKeyHandler<'_>,
    num_elems: usize,
) -> Result<usize> {
    let key_component_count = key_handler.key_component_count();
    let sketch = (0..num_elems)
        .into_par_iter()
        .try_fold(
            || (HllSketch::new(), vec![0i64; key_component_count]),
            |(mut sketch, mut components), row| {
                if key_handler.key_for_row(row, &mut components)? {
                    let key = build_probe_key(&components, 8);
                    sketch.update(hash_composite_key(&key));
                }
                Ok::<_, strata_result::Error>((sketch, components))
            },
        )
        .map(|r| r.map(|(sketch, _)| sketch))
        .try_reduce(HllSketch::new, |mut a, b| {
            a.unify(&b);
            Ok(a)
        })?;
    Ok(sketch.estimate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{JoinColumn, JoinColumnTypeInfo};

    #[test]
    fn estimate_tracks_distinct_count() {
        let mut sketch = HllSketch::new();
        for i in 0..10_000u64 {
            sketch.update(hash_composite_key(&i.to_le_bytes()));
        }
        let estimate = sketch.estimate() as f64;
        assert!((8_000.0..12_000.0).contains(&estimate), "estimate {estimate}");
    }

    #[test]
    fn unify_is_register_max() {
        let mut a = HllSketch::new();
        let mut b = HllSketch::new();
        for i in 0..500u64 {
            a.update(hash_composite_key(&i.to_le_bytes()));
        }
        for i in 250..750u64 {
            b.update(hash_composite_key(&i.to_le_bytes()));
        }
        a.unify(&b);
        let estimate = a.estimate() as f64;
        assert!((600.0..900.0).contains(&estimate), "estimate {estimate}");
    }

    #[test]
    fn distinct_tuples_counts_duplicates_once() {
        let values: Vec<i32> = (0..4096).map(|i| i % 100).collect();
        let columns = [JoinColumn::from_i32_values(&values)];
        let types = [JoinColumnTypeInfo {
            elem_size: 4,
            null_val: i32::MIN as i64,
            uses_bw_eq: false,
        }];
        let handler = GenericKeyHandler::new(&columns, &types, &[], &[]);
        let estimate = approximate_distinct_tuples(&handler, values.len()).unwrap();
        assert!((80..130).contains(&estimate), "estimate {estimate}");
    }

    #[test]
    fn empty_input_estimates_zero() {
        let sketch = HllSketch::new();
        assert_eq!(sketch.estimate(), 0);
    }
}

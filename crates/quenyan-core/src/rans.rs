//! Table-based rANS entropy coder.
//!
//! Symbols are coded against a frequency table normalised to `2^P` slots
//! with precision `P` in `8..=16` (default 12). Encoding walks the symbol
//! stream from the tail, emitting renormalisation bytes as the state
//! shrinks, and appends the final 32-bit state little-endian. Decoding
//! therefore needs the 4-byte state suffix plus the declared symbol count.
//!
//! # Invariants
//!
//! - Every frequency is at least 1, so every alphabet symbol is decodable.
//! - Frequencies sum to exactly `2^P`; tables that do not normalise are
//!   rejected rather than patched silently.
//! - The coder state stays below `2^32` between symbols; renormalisation
//!   keeps it at or above `2^24` during decode.

use crate::errors::{PackageError, Result};

/// Default table precision in bits.
pub const DEFAULT_PRECISION_BITS: u8 = 12;

/// Decoder renormalisation threshold.
const NORMALIZATION: u64 = 1 << 24;

/// Initial coder state.
const INITIAL_STATE: u64 = 1 << 31;

/// Pre-computed tables for one frequency distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RansTable {
    /// Table precision in bits
    pub precision_bits: u8,
    /// Normalised symbol frequencies summing to `2^precision_bits`
    pub frequencies: Vec<u32>,
    cumulative: Vec<u32>,
    lookup: Vec<u32>,
}

impl RansTable {
    /// Total number of table slots (`2^precision_bits`).
    #[must_use]
    pub fn total(&self) -> u32 {
        1 << self.precision_bits
    }

    fn mask(&self) -> u64 {
        u64::from(self.total()) - 1
    }
}

/// Table-based rANS compressor and decompressor.
#[derive(Debug, Clone, Copy)]
pub struct RansCodec {
    precision_bits: u8,
}

impl RansCodec {
    /// Construct a codec with the given table precision.
    ///
    /// # Errors
    ///
    /// `PackageError::EntropyCorrupt` when `precision_bits` is outside
    /// `8..=16`.
    pub fn new(precision_bits: u8) -> Result<Self> {
        if !(8..=16).contains(&precision_bits) {
            return Err(PackageError::entropy(format!(
                "precision_bits must be between 8 and 16, got {precision_bits}"
            )));
        }
        Ok(Self { precision_bits })
    }

    /// Codec at the default precision.
    #[must_use]
    pub fn with_default_precision() -> Self {
        Self { precision_bits: DEFAULT_PRECISION_BITS }
    }

    /// Table precision in bits.
    #[must_use]
    pub fn precision_bits(&self) -> u8 {
        self.precision_bits
    }

    /// Build a table from observed symbols with add-one smoothing.
    ///
    /// # Errors
    ///
    /// `PackageError::EntropyCorrupt` when a symbol falls outside the
    /// alphabet or the counts cannot be normalised onto the table.
    pub fn build_table(&self, symbols: &[u32], alphabet_size: usize) -> Result<RansTable> {
        if alphabet_size == 0 {
            return Err(PackageError::entropy("alphabet size must be positive"));
        }
        let mut counts = vec![1u64; alphabet_size];
        for &symbol in symbols {
            let slot = counts.get_mut(symbol as usize).ok_or_else(|| {
                PackageError::entropy(format!(
                    "symbol {symbol} exceeds alphabet size {alphabet_size}"
                ))
            })?;
            *slot += 1;
        }
        let scaled = self.scale_counts(&counts)?;
        self.table_from_frequencies(&scaled)
    }

    /// Build a table from an explicit frequency list, renormalising when
    /// the total does not already match the table size.
    ///
    /// # Errors
    ///
    /// `PackageError::EntropyCorrupt` when the list is empty, wider than
    /// the table, or fails to normalise.
    pub fn table_from_frequencies(&self, frequencies: &[u32]) -> Result<RansTable> {
        if frequencies.is_empty() {
            return Err(PackageError::entropy("frequency table is empty"));
        }
        let target = 1u64 << self.precision_bits;
        if frequencies.len() as u64 > target {
            return Err(PackageError::entropy(format!(
                "alphabet of {} symbols does not fit a {}-bit table",
                frequencies.len(),
                self.precision_bits
            )));
        }
        let total: u64 = frequencies.iter().map(|&f| u64::from(f)).sum();
        let frequencies: Vec<u32> = if total == target {
            frequencies.to_vec()
        } else {
            let raw: Vec<u64> = frequencies.iter().map(|&f| u64::from(f)).collect();
            let mut normalized: Vec<u64> =
                raw.iter().map(|&freq| (freq * target / total.max(1)).max(1)).collect();
            redistribute(&mut normalized, &raw, target)?;
            normalized.into_iter().map(|freq| freq as u32).collect()
        };
        let check: u64 = frequencies.iter().map(|&f| u64::from(f)).sum();
        if check != target {
            return Err(PackageError::entropy("frequency table does not normalise"));
        }
        Ok(build_tables(self.precision_bits, frequencies))
    }

    /// Encode `symbols` against `table`, returning the byte stream with
    /// its 4-byte state suffix.
    ///
    /// # Errors
    ///
    /// `PackageError::EntropyCorrupt` when a symbol falls outside the
    /// table alphabet.
    pub fn encode(&self, symbols: &[u32], table: &RansTable) -> Result<Vec<u8>> {
        let precision = u32::from(table.precision_bits);
        let mut state = INITIAL_STATE;
        let mut output = Vec::new();
        for &symbol in symbols.iter().rev() {
            let freq = u64::from(*table.frequencies.get(symbol as usize).ok_or_else(|| {
                PackageError::entropy(format!("symbol {symbol} outside table alphabet"))
            })?);
            let cum = u64::from(table.cumulative[symbol as usize]);
            while state >= freq << (32 - precision) {
                output.push((state & 0xFF) as u8);
                state >>= 8;
            }
            state = ((state / freq) << precision) + (state % freq) + cum;
        }
        output.extend_from_slice(&(state as u32).to_le_bytes());
        Ok(output)
    }

    /// Decode `symbol_count` symbols from `data` against `table`.
    ///
    /// # Errors
    ///
    /// `PackageError::EntropyCorrupt` on a truncated stream or when the
    /// renormalisation bytes run out early.
    pub fn decode(&self, data: &[u8], table: &RansTable, symbol_count: usize) -> Result<Vec<u32>> {
        if data.len() < 4 {
            return Err(PackageError::entropy("encoded stream too short"));
        }
        let split = data.len() - 4;
        let mut state = u64::from(u32::from_le_bytes([
            data[split],
            data[split + 1],
            data[split + 2],
            data[split + 3],
        ]));
        let buffer = &data[..split];
        let mut index = buffer.len();
        let mask = table.mask();
        let precision = u32::from(table.precision_bits);
        let mut symbols = Vec::with_capacity(symbol_count);
        for _ in 0..symbol_count {
            let x = state & mask;
            let symbol = table.lookup[x as usize];
            symbols.push(symbol);
            let freq = u64::from(table.frequencies[symbol as usize]);
            let cum = u64::from(table.cumulative[symbol as usize]);
            state = freq * (state >> precision) + (x - cum);
            while state < NORMALIZATION {
                if index == 0 {
                    return Err(PackageError::entropy("ran out of renormalisation bytes"));
                }
                index -= 1;
                state = (state << 8) | u64::from(buffer[index]);
            }
        }
        Ok(symbols)
    }

    /// Scale raw counts onto `2^precision_bits` slots.
    fn scale_counts(&self, counts: &[u64]) -> Result<Vec<u32>> {
        let target = 1u64 << self.precision_bits;
        let total: u64 = counts.iter().sum();
        let mut scaled: Vec<u64> =
            counts.iter().map(|&count| (count * target / total).max(1)).collect();
        redistribute(&mut scaled, counts, target)?;
        Ok(scaled.into_iter().map(|freq| freq as u32).collect())
    }
}

/// Correct rounding drift so `scaled` sums to exactly `target`.
///
/// Leftover mass goes to the most-frequent symbols first; excess mass is
/// removed from the least-frequent, never dropping any slot below 1. The
/// pass cycles until the target is hit, so heavily skewed distributions
/// converge too; a full cycle with no progress means the table cannot be
/// normalised at all.
fn redistribute(scaled: &mut [u64], counts: &[u64], target: u64) -> Result<()> {
    let mut diff = target as i64 - scaled.iter().sum::<u64>() as i64;
    if diff != 0 && !scaled.is_empty() {
        let mut order: Vec<usize> = (0..scaled.len()).collect();
        if diff > 0 {
            order.sort_by_key(|&idx| std::cmp::Reverse(counts[idx]));
        } else {
            order.sort_by_key(|&idx| counts[idx]);
        }
        let mut index = 0usize;
        let mut stalled = 0usize;
        while diff != 0 {
            let position = order[index % order.len()];
            if diff > 0 {
                scaled[position] += 1;
                diff -= 1;
                stalled = 0;
            } else if scaled[position] > 1 {
                scaled[position] -= 1;
                diff += 1;
                stalled = 0;
            } else {
                stalled += 1;
                if stalled > order.len() {
                    break;
                }
            }
            index += 1;
        }
    }
    let sum: u64 = scaled.iter().sum();
    if sum != target {
        return Err(PackageError::entropy("frequency normalisation failed"));
    }
    Ok(())
}

fn build_tables(precision_bits: u8, frequencies: Vec<u32>) -> RansTable {
    let mut cumulative = Vec::with_capacity(frequencies.len());
    let mut lookup = vec![0u32; 1 << precision_bits];
    let mut total = 0u32;
    for (index, &freq) in frequencies.iter().enumerate() {
        cumulative.push(total);
        for slot in lookup.iter_mut().skip(total as usize).take(freq as usize) {
            *slot = index as u32;
        }
        total += freq;
    }
    RansTable { precision_bits, frequencies, cumulative, lookup }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn precision_bounds() {
        assert!(RansCodec::new(7).is_err());
        assert!(RansCodec::new(17).is_err());
        assert!(RansCodec::new(8).is_ok());
        assert!(RansCodec::new(16).is_ok());
    }

    #[test]
    fn table_frequencies_sum_to_table_size() {
        let codec = RansCodec::with_default_precision();
        let table = codec.build_table(&[0, 1, 1, 2, 1, 0], 4).unwrap();
        let total: u64 = table.frequencies.iter().map(|&f| u64::from(f)).sum();
        assert_eq!(total, 1 << 12);
        assert!(table.frequencies.iter().all(|&f| f >= 1));
    }

    #[test]
    fn empty_stream_is_four_state_bytes() {
        let codec = RansCodec::with_default_precision();
        let table = codec.build_table(&[], 4).unwrap();
        let encoded = codec.encode(&[], &table).unwrap();
        assert_eq!(encoded.len(), 4);
        assert_eq!(codec.decode(&encoded, &table, 0).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn skewed_stream_round_trip() {
        let codec = RansCodec::with_default_precision();
        let mut symbols = vec![0u32; 500];
        symbols.extend(std::iter::repeat_n(1u32, 30));
        symbols.extend([2, 3, 2, 3, 3]);
        let table = codec.build_table(&symbols, 5).unwrap();
        let encoded = codec.encode(&symbols, &table).unwrap();
        let decoded = codec.decode(&encoded, &table, symbols.len()).unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn heavily_skewed_wide_alphabet_round_trip() {
        // One dominant symbol over a 256-wide alphabet forces the
        // redistribution pass to cycle more than once.
        let codec = RansCodec::with_default_precision();
        let mut symbols = vec![97u32; 50_000];
        symbols.extend([0, 255, 128]);
        let table = codec.build_table(&symbols, 256).unwrap();
        let total: u64 = table.frequencies.iter().map(|&f| u64::from(f)).sum();
        assert_eq!(total, 1 << 12);

        let encoded = codec.encode(&symbols, &table).unwrap();
        assert_eq!(codec.decode(&encoded, &table, symbols.len()).unwrap(), symbols);
    }

    #[test]
    fn symbol_outside_alphabet_is_rejected() {
        let codec = RansCodec::with_default_precision();
        assert!(codec.build_table(&[0, 5], 4).is_err());
        let table = codec.build_table(&[0, 1], 2).unwrap();
        assert!(codec.encode(&[3], &table).is_err());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let codec = RansCodec::with_default_precision();
        let table = codec.build_table(&[0, 1, 2], 3).unwrap();
        let encoded = codec.encode(&[0, 1, 2, 0, 1], &table).unwrap();
        assert!(codec.decode(&encoded[..2], &table, 5).is_err());
    }

    #[test]
    fn unnormalised_model_frequencies_are_rescaled() {
        let codec = RansCodec::with_default_precision();
        // Raw counts, nothing like 2^12 total.
        let table = codec.table_from_frequencies(&[10, 3, 1]).unwrap();
        let total: u64 = table.frequencies.iter().map(|&f| u64::from(f)).sum();
        assert_eq!(total, 1 << 12);

        let symbols = vec![0, 0, 1, 2, 0, 1];
        let encoded = codec.encode(&symbols, &table).unwrap();
        assert_eq!(codec.decode(&encoded, &table, symbols.len()).unwrap(), symbols);
    }

    #[test]
    fn alphabet_wider_than_table_is_rejected() {
        let codec = RansCodec::new(8).unwrap();
        let frequencies = vec![1u32; 257];
        assert!(codec.table_from_frequencies(&frequencies).is_err());
    }

    proptest! {
        #[test]
        fn round_trip(
            symbols in prop::collection::vec(0u32..16, 0..512),
            precision in 8u8..=14,
        ) {
            let codec = RansCodec::new(precision).unwrap();
            let table = codec.build_table(&symbols, 16).unwrap();
            let encoded = codec.encode(&symbols, &table).unwrap();
            let decoded = codec.decode(&encoded, &table, symbols.len()).unwrap();
            prop_assert_eq!(decoded, symbols);
        }

        #[test]
        fn byte_alphabet_round_trip(data in prop::collection::vec(any::<u8>(), 0..1024)) {
            let symbols: Vec<u32> = data.iter().map(|&b| u32::from(b)).collect();
            let codec = RansCodec::with_default_precision();
            let table = codec.build_table(&symbols, 256).unwrap();
            let encoded = codec.encode(&symbols, &table).unwrap();
            let decoded = codec.decode(&encoded, &table, symbols.len()).unwrap();
            prop_assert_eq!(decoded, symbols);
        }
    }
}

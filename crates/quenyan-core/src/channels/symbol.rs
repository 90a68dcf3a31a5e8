//! Per-channel symbol coding with distribution-aware priors.
//!
//! Each payload channel compresses its symbols with rANS against a
//! frequency table seeded from a prior matched to the channel's expected
//! distribution (Zipf for identifier ranks, geometric for counts,
//! Bernoulli for flags). In `static-adaptive` mode the table is stored as
//! a `delta` against the prior baseline; the decoder rebuilds the
//! baseline with the same arithmetic, so both sides must normalise
//! weights identically down to tie-breaking order.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::errors::{PackageError, Result};
use crate::rans::{DEFAULT_PRECISION_BITS, RansCodec};

/// Mode marker for channels that store a delta against a prior baseline.
pub const STATIC_ADAPTIVE_MODE: &str = "static-adaptive";

/// Parametric prior over a channel's symbol distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PriorModel {
    /// Rank-frequency prior for table-indexed symbols
    Zipf {
        /// Zipf exponent
        exponent: f64,
    },
    /// Decaying prior for small non-negative integers
    Geometric {
        /// Decay rate in `(0, 1)`
        alpha: f64,
    },
    /// Explicit weights for tiny alphabets
    Bernoulli {
        /// Per-symbol weights; the last weight extends to larger alphabets
        weights: Vec<f64>,
    },
}

fn default_precision() -> u8 {
    DEFAULT_PRECISION_BITS
}

fn default_model_type() -> String {
    "adaptive".to_owned()
}

/// Serialised frequency model for one channel stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelModel {
    /// rANS table precision
    #[serde(default = "default_precision")]
    pub precision_bits: u8,
    /// Normalised frequencies; empty for empty streams
    #[serde(default)]
    pub frequencies: Vec<u32>,
    /// Model family marker
    #[serde(default = "default_model_type")]
    pub model_type: String,
    /// Optional mode marker (`static-adaptive`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Prior the baseline is derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_model: Option<PriorModel>,
    /// Adaptive frequencies minus the prior baseline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Vec<i64>>,
}

/// One coded channel stream: model plus base64 rANS bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStream {
    /// Number of symbols coded
    pub symbol_count: u64,
    /// Alphabet size the model covers
    pub alphabet_size: u64,
    /// Frequency model
    pub model: ChannelModel,
    /// Base64-encoded rANS stream
    pub data: String,
}

/// Uniform weights, or the prior sliced/extended to the alphabet with the
/// final weight repeated and everything clamped above zero.
fn initial_weights(alphabet_size: usize, prior: Option<&[f64]>) -> Vec<f64> {
    let Some(prior) = prior else {
        return vec![1.0; alphabet_size];
    };
    let mut weights: Vec<f64> = prior.iter().copied().take(alphabet_size).collect();
    if weights.len() < alphabet_size {
        let tail = weights.last().copied().unwrap_or(1.0);
        weights.resize(alphabet_size, tail);
    }
    weights.into_iter().map(|weight| weight.max(1e-6)).collect()
}

fn zipf_prior(alphabet_size: usize, exponent: f64) -> Vec<f64> {
    (0..alphabet_size).map(|index| 1.0 / ((index + 1) as f64).powf(exponent)).collect()
}

fn geometric_prior(alphabet_size: usize, alpha: f64) -> Vec<f64> {
    let base = 1.0 - alpha;
    (0..alphabet_size).map(|index| base * alpha.powf(index as f64)).collect()
}

/// Concrete prior weights for an alphabet.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` when a Bernoulli prior has no
/// weights.
pub fn resolve_prior_weights(
    alphabet_size: usize,
    prior_model: Option<&PriorModel>,
) -> Result<Vec<f64>> {
    match prior_model {
        None => Ok(initial_weights(alphabet_size, None)),
        Some(PriorModel::Zipf { exponent }) => Ok(zipf_prior(alphabet_size, *exponent)),
        Some(PriorModel::Geometric { alpha }) => Ok(geometric_prior(alphabet_size, *alpha)),
        Some(PriorModel::Bernoulli { weights }) => {
            if weights.is_empty() {
                return Err(PackageError::channel("bernoulli priors require explicit weights"));
            }
            Ok(initial_weights(alphabet_size, Some(weights)))
        },
    }
}

/// Scale float weights onto `2^precision_bits` integer slots.
///
/// The correction pass cycles over indices ordered by weight (descending
/// when adding mass, ascending when removing) with stable tie-breaking,
/// because the decoder re-runs this exact computation to rebuild
/// static-adaptive baselines.
pub fn normalise_weights(weights: &[f64], precision_bits: u8) -> Result<Vec<u32>> {
    let target = 1u64 << precision_bits;
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(PackageError::channel("weights must sum to a positive value"));
    }
    let mut scaled: Vec<u64> =
        weights.iter().map(|weight| ((weight / total * target as f64) as u64).max(1)).collect();
    let mut diff = target as i64 - scaled.iter().sum::<u64>() as i64;
    if diff != 0 && !weights.is_empty() {
        let mut order: Vec<usize> = (0..weights.len()).collect();
        if diff > 0 {
            order.sort_by(|&a, &b| {
                weights[b].partial_cmp(&weights[a]).unwrap_or(std::cmp::Ordering::Equal)
            });
        } else {
            order.sort_by(|&a, &b| {
                weights[a].partial_cmp(&weights[b]).unwrap_or(std::cmp::Ordering::Equal)
            });
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
        return Err(PackageError::channel("frequency normalisation failed to reach target total"));
    }
    Ok(scaled.into_iter().map(|freq| freq as u32).collect())
}

fn channel_precision(alphabet_size: usize) -> u8 {
    let required = if alphabet_size <= 1 {
        0
    } else {
        (usize::BITS - (alphabet_size - 1).leading_zeros()) as u8
    };
    if alphabet_size > (1 << DEFAULT_PRECISION_BITS) {
        required.max(DEFAULT_PRECISION_BITS)
    } else {
        DEFAULT_PRECISION_BITS
    }
}

/// An empty channel stream carrying only model shape.
#[must_use]
pub fn empty_channel(
    model_type: &str,
    alphabet_size: u64,
    prior_model: Option<PriorModel>,
    static_adaptive: bool,
) -> ChannelStream {
    let precision_bits = channel_precision(alphabet_size as usize);
    ChannelStream {
        symbol_count: 0,
        alphabet_size,
        model: ChannelModel {
            precision_bits,
            frequencies: Vec::new(),
            model_type: model_type.to_owned(),
            mode: static_adaptive.then(|| STATIC_ADAPTIVE_MODE.to_owned()),
            prior_model,
            delta: None,
        },
        data: String::new(),
    }
}

/// Encode a symbol stream against a prior-seeded adaptive model.
///
/// With `static_adaptive` set, the model additionally records the
/// adaptive table as a delta against the prior baseline.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` when a symbol exceeds the
/// alphabet, or `PackageError::EntropyCorrupt` when the table cannot be
/// built.
pub fn encode_symbol_channel(
    symbols: &[u32],
    alphabet_size: Option<usize>,
    model_type: &str,
    prior_model: Option<PriorModel>,
    static_adaptive: bool,
) -> Result<ChannelStream> {
    if symbols.is_empty() {
        return Ok(empty_channel(
            model_type,
            alphabet_size.unwrap_or(0) as u64,
            prior_model,
            static_adaptive,
        ));
    }
    let max_symbol = symbols.iter().copied().max().unwrap_or(0) as usize;
    let effective_alphabet = alphabet_size.unwrap_or(max_symbol + 1);
    let precision_bits = channel_precision(effective_alphabet);

    let prior_weights = resolve_prior_weights(effective_alphabet, prior_model.as_ref())?;
    let mut weights = initial_weights(effective_alphabet, Some(&prior_weights));
    for &symbol in symbols {
        let slot = weights.get_mut(symbol as usize).ok_or_else(|| {
            PackageError::channel(format!("symbol {symbol} exceeds alphabet size for channel"))
        })?;
        *slot += 1.0;
    }
    let frequencies = normalise_weights(&weights, precision_bits)?;

    let delta = if static_adaptive {
        let baseline = normalise_weights(
            &initial_weights(effective_alphabet, Some(&prior_weights)),
            precision_bits,
        )?;
        if baseline.len() != frequencies.len() {
            return Err(PackageError::channel(
                "static-adaptive baseline must align with adaptive model",
            ));
        }
        Some(
            frequencies
                .iter()
                .zip(baseline.iter())
                .map(|(&freq, &base)| i64::from(freq) - i64::from(base))
                .collect(),
        )
    } else {
        None
    };

    let codec = RansCodec::new(precision_bits)?;
    let table = codec.table_from_frequencies(&frequencies)?;
    let compressed = codec.encode(symbols, &table)?;

    Ok(ChannelStream {
        symbol_count: symbols.len() as u64,
        alphabet_size: effective_alphabet as u64,
        model: ChannelModel {
            precision_bits,
            frequencies,
            model_type: model_type.to_owned(),
            mode: static_adaptive.then(|| STATIC_ADAPTIVE_MODE.to_owned()),
            prior_model,
            delta,
        },
        data: BASE64.encode(compressed),
    })
}

/// Decode a channel stream back into its symbols.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` when the model is inconsistent,
/// or `PackageError::EntropyCorrupt` when the rANS stream is damaged.
pub fn decode_symbol_channel(stream: &ChannelStream) -> Result<Vec<u32>> {
    if stream.symbol_count == 0 {
        return Ok(Vec::new());
    }
    let model = &stream.model;
    let precision_bits = model.precision_bits;
    let frequencies: Vec<u32> = if model.mode.as_deref() == Some(STATIC_ADAPTIVE_MODE) {
        let mut alphabet_size = stream.alphabet_size as usize;
        if alphabet_size == 0 {
            alphabet_size = model.delta.as_ref().map_or(0, Vec::len);
        }
        if alphabet_size == 0 {
            alphabet_size = model.frequencies.len();
        }
        if alphabet_size == 0 {
            return Err(PackageError::channel(
                "static-adaptive channels require a positive alphabet size",
            ));
        }
        let prior_weights = resolve_prior_weights(alphabet_size, model.prior_model.as_ref())?;
        let baseline = normalise_weights(
            &initial_weights(alphabet_size, Some(&prior_weights)),
            precision_bits,
        )?;
        let frequencies = match model.delta.as_ref().filter(|delta| !delta.is_empty()) {
            Some(delta) => {
                if delta.len() != baseline.len() {
                    return Err(PackageError::channel(
                        "static-adaptive delta must match baseline length",
                    ));
                }
                let mut rebuilt = Vec::with_capacity(baseline.len());
                for (&base, &offset) in baseline.iter().zip(delta.iter()) {
                    let freq = i64::from(base) + offset;
                    if freq <= 0 {
                        return Err(PackageError::channel(
                            "static-adaptive frequencies must be positive",
                        ));
                    }
                    rebuilt.push(freq as u32);
                }
                rebuilt
            },
            None => baseline,
        };
        let total: u64 = frequencies.iter().map(|&f| u64::from(f)).sum();
        if total != 1u64 << precision_bits {
            return Err(PackageError::channel(
                "static-adaptive frequencies must sum to the model table size",
            ));
        }
        frequencies
    } else {
        if model.frequencies.is_empty() {
            return Err(PackageError::channel("channel model missing frequencies"));
        }
        model.frequencies.clone()
    };

    let compressed = BASE64
        .decode(stream.data.as_bytes())
        .map_err(|_| PackageError::channel("channel data is not valid base64"))?;
    let codec = RansCodec::new(precision_bits)?;
    let table = codec.table_from_frequencies(&frequencies)?;
    codec.decode(&compressed, &table, stream.symbol_count as usize)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn normalise_weights_hits_exact_target() {
        let weights = zipf_prior(10, 1.0);
        let frequencies = normalise_weights(&weights, 12).unwrap();
        let total: u64 = frequencies.iter().map(|&f| u64::from(f)).sum();
        assert_eq!(total, 1 << 12);
        assert!(frequencies.iter().all(|&f| f >= 1));
        // Zipf is monotone decreasing, the table should be too.
        assert!(frequencies.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn normalise_weights_is_deterministic() {
        let weights = geometric_prior(7, 0.4);
        assert_eq!(
            normalise_weights(&weights, 12).unwrap(),
            normalise_weights(&weights, 12).unwrap()
        );
    }

    #[test]
    fn bernoulli_prior_extends_tail_weight() {
        let prior = PriorModel::Bernoulli { weights: vec![0.9, 0.1] };
        let weights = resolve_prior_weights(4, Some(&prior)).unwrap();
        assert_eq!(weights, vec![0.9, 0.1, 0.1, 0.1]);
    }

    #[test]
    fn plain_channel_round_trip() {
        let symbols = vec![0u32, 1, 0, 2, 0, 0, 1];
        let stream =
            encode_symbol_channel(&symbols, None, "adaptive", None, false).unwrap();
        assert_eq!(stream.symbol_count, 7);
        assert_eq!(stream.alphabet_size, 3);
        assert!(stream.model.delta.is_none());
        assert_eq!(decode_symbol_channel(&stream).unwrap(), symbols);
    }

    #[test]
    fn static_adaptive_round_trip_records_delta() {
        let symbols = vec![0u32, 0, 0, 1, 2, 1, 0];
        let stream = encode_symbol_channel(
            &symbols,
            None,
            "zipf",
            Some(PriorModel::Zipf { exponent: 1.0 }),
            true,
        )
        .unwrap();
        assert_eq!(stream.model.mode.as_deref(), Some(STATIC_ADAPTIVE_MODE));
        let delta = stream.model.delta.as_ref().unwrap();
        assert_eq!(delta.iter().sum::<i64>(), 0);
        assert_eq!(decode_symbol_channel(&stream).unwrap(), symbols);
    }

    #[test]
    fn empty_channel_round_trips_to_nothing() {
        let stream = empty_channel("adaptive", 0, None, false);
        assert_eq!(decode_symbol_channel(&stream).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn corrupt_delta_is_rejected() {
        let symbols = vec![0u32, 1, 1];
        let mut stream = encode_symbol_channel(
            &symbols,
            None,
            "zipf",
            Some(PriorModel::Zipf { exponent: 1.0 }),
            true,
        )
        .unwrap();
        if let Some(delta) = stream.model.delta.as_mut() {
            delta[0] += 1;
        }
        assert!(decode_symbol_channel(&stream).is_err());
    }

    #[test]
    fn symbol_outside_alphabet_is_rejected() {
        let result = encode_symbol_channel(&[5], Some(3), "adaptive", None, false);
        assert!(matches!(result, Err(PackageError::PayloadChannelCorrupt { .. })));
    }

    #[test]
    fn channel_json_round_trip() {
        let symbols = vec![1u32, 0, 1, 1];
        let stream = encode_symbol_channel(
            &symbols,
            Some(2),
            "geometric-count",
            Some(PriorModel::Geometric { alpha: 0.45 }),
            true,
        )
        .unwrap();
        let json = serde_json::to_string(&stream).unwrap();
        let parsed: ChannelStream = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, stream);
        assert_eq!(decode_symbol_channel(&parsed).unwrap(), symbols);
    }

    proptest! {
        #[test]
        fn round_trip_with_priors(
            symbols in prop::collection::vec(0u32..12, 0..200),
            use_zipf in any::<bool>(),
            static_adaptive in any::<bool>(),
        ) {
            let prior = use_zipf
                .then_some(PriorModel::Zipf { exponent: 1.0 });
            let stream = encode_symbol_channel(
                &symbols,
                Some(12),
                "adaptive",
                prior,
                static_adaptive,
            ).unwrap();
            prop_assert_eq!(decode_symbol_channel(&stream).unwrap(), symbols);
        }
    }
}

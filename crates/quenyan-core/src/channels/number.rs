//! Log-magnitude coding for the signed integer channel.
//!
//! A number stream is split into three prior-matched sub-streams plus a
//! raw residual bitstream:
//!
//! - `zero` flags (Bernoulli 0.72/0.28) mark zero values;
//! - for the non-zero values, `sign` flags (Bernoulli 0.9/0.1) and
//!   magnitude `bucket`s (`floor(log2(|v|))`, geometric 0.4);
//! - residuals `|v| - 2^bucket` are packed contiguously at `bucket` bits
//!   each, most significant bit first.
//!
//! When channel entries are available, numbers are first split by role
//! (`literal_int`, `index`, `offset`, `count`, `number`) and each role
//! gets its own log-magnitude encoding; the stored role index makes the
//! decode independent of entry availability.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::channels::symbol::{
    ChannelStream, PriorModel, decode_symbol_channel, empty_channel, encode_symbol_channel,
};
use crate::channels::ChannelEntry;
use crate::errors::{PackageError, Result};

/// Literal tag for the log-magnitude encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogMagnitudeTag {
    /// `log_magnitude_v1`
    #[serde(rename = "log_magnitude_v1")]
    V1,
}

/// Literal tag for the role-bucket encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleBucketsTag {
    /// `role_buckets_v1`
    #[serde(rename = "role_buckets_v1")]
    V1,
}

/// Packed residual bitstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidualStream {
    /// Base64 of the packed bits
    pub data: String,
    /// Number of significant bits
    pub bit_length: u64,
}

/// The three coded sub-streams of a log-magnitude channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMagnitudeStreams {
    /// Zero mask
    pub zero: ChannelStream,
    /// Sign flags for non-zero values
    pub sign: ChannelStream,
    /// Magnitude buckets for non-zero values
    pub bucket: ChannelStream,
}

/// One log-magnitude coded number stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMagnitudeChannel {
    /// Encoder tag
    pub encoder: LogMagnitudeTag,
    /// Total values coded, zeros included
    pub symbol_count: u64,
    /// Sub-streams
    pub streams: LogMagnitudeStreams,
    /// Residual bits
    pub residuals: ResidualStream,
    /// Largest bucket observed
    pub max_bucket: u32,
}

/// Role-partitioned number channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleBucketsChannel {
    /// Encoder tag
    pub encoder: RoleBucketsTag,
    /// Total values coded
    pub symbol_count: u64,
    /// Per-role log-magnitude streams
    pub roles: BTreeMap<String, LogMagnitudeChannel>,
    /// Role of each value, in grammar order
    pub role_index: Vec<String>,
}

/// Any wire representation the number channel may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberEncoding {
    /// Role-partitioned streams
    RoleBuckets(RoleBucketsChannel),
    /// Single log-magnitude stream
    LogMagnitude(LogMagnitudeChannel),
    /// Plain symbol channel emitted by very old encoders
    Plain(ChannelStream),
}

impl NumberEncoding {
    /// Total values carried by the channel.
    #[must_use]
    pub fn symbol_count(&self) -> u64 {
        match self {
            Self::RoleBuckets(channel) => channel.symbol_count,
            Self::LogMagnitude(channel) => channel.symbol_count,
            Self::Plain(stream) => stream.symbol_count,
        }
    }
}

fn pack_residuals(residuals: &[u64], buckets: &[u32]) -> (String, u64) {
    let bit_length: u64 = buckets.iter().map(|&b| u64::from(b)).sum();
    if bit_length == 0 {
        return (String::new(), 0);
    }
    let byte_length = bit_length.div_ceil(8) as usize;
    let mut out = vec![0u8; byte_length];
    // The packed integer is right-aligned: pad bits sit at the front.
    let mut pos = byte_length as u64 * 8 - bit_length;
    for (&residual, &bucket) in residuals.iter().zip(buckets.iter()) {
        for bit in (0..bucket).rev() {
            if residual >> bit & 1 == 1 {
                out[(pos / 8) as usize] |= 0x80 >> (pos % 8);
            }
            pos += 1;
        }
    }
    (BASE64.encode(out), bit_length)
}

fn unpack_residuals(data: &str, bit_length: u64, buckets: &[u32]) -> Result<Vec<u64>> {
    if bit_length == 0 || buckets.is_empty() {
        return Ok(Vec::new());
    }
    let raw = BASE64
        .decode(data.as_bytes())
        .map_err(|_| PackageError::channel("residual stream is not valid base64"))?;
    let available = raw.len() as u64 * 8;
    if available < bit_length {
        return Err(PackageError::channel("residual stream shorter than declared bit length"));
    }
    let mut pos = available - bit_length;
    let mut residuals = Vec::with_capacity(buckets.len());
    for &bucket in buckets {
        let mut value = 0u64;
        for _ in 0..bucket {
            if pos >= available {
                return Err(PackageError::channel("residual stream exhausted early"));
            }
            let bit = raw[(pos / 8) as usize] >> (7 - pos % 8) & 1;
            value = (value << 1) | u64::from(bit);
            pos += 1;
        }
        residuals.push(value);
    }
    Ok(residuals)
}

/// Encode a number stream with the log-magnitude scheme.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` when a sub-stream fails to code.
pub fn encode_number_stream(numbers: &[i64]) -> Result<LogMagnitudeChannel> {
    if numbers.is_empty() {
        return Ok(LogMagnitudeChannel {
            encoder: LogMagnitudeTag::V1,
            symbol_count: 0,
            streams: LogMagnitudeStreams {
                zero: empty_channel("adaptive", 0, None, false),
                sign: empty_channel("adaptive", 0, None, false),
                bucket: empty_channel("adaptive", 0, None, false),
            },
            residuals: ResidualStream { data: String::new(), bit_length: 0 },
            max_bucket: 0,
        });
    }
    let zero_flags: Vec<u32> = numbers.iter().map(|&v| u32::from(v == 0)).collect();
    let non_zero: Vec<i64> = numbers.iter().copied().filter(|&v| v != 0).collect();
    let magnitudes: Vec<u64> = non_zero.iter().map(|&v| v.unsigned_abs()).collect();
    let signs: Vec<u32> = non_zero.iter().map(|&v| u32::from(v < 0)).collect();
    let buckets: Vec<u32> = magnitudes.iter().map(|&m| m.ilog2()).collect();
    let residuals: Vec<u64> =
        magnitudes.iter().zip(buckets.iter()).map(|(&m, &b)| m - (1u64 << b)).collect();
    let max_bucket = buckets.iter().copied().max().unwrap_or(0);

    let zero = encode_symbol_channel(
        &zero_flags,
        Some(2),
        "zero-mask",
        Some(PriorModel::Bernoulli { weights: vec![0.72, 0.28] }),
        true,
    )?;
    let sign = encode_symbol_channel(
        &signs,
        Some(2),
        "sign",
        Some(PriorModel::Bernoulli { weights: vec![0.9, 0.1] }),
        true,
    )?;
    let bucket = encode_symbol_channel(
        &buckets,
        Some(max_bucket as usize + 1),
        "log-bucket",
        Some(PriorModel::Geometric { alpha: 0.4 }),
        true,
    )?;
    let (data, bit_length) = pack_residuals(&residuals, &buckets);

    Ok(LogMagnitudeChannel {
        encoder: LogMagnitudeTag::V1,
        symbol_count: numbers.len() as u64,
        streams: LogMagnitudeStreams { zero, sign, bucket },
        residuals: ResidualStream { data, bit_length },
        max_bucket,
    })
}

/// Decode a log-magnitude stream back into numbers.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` when sub-stream lengths drift
/// from the declared symbol count.
pub fn decode_number_stream(channel: &LogMagnitudeChannel) -> Result<Vec<i64>> {
    let symbol_count = channel.symbol_count as usize;
    if symbol_count == 0 {
        return Ok(Vec::new());
    }
    let zero_flags = decode_symbol_channel(&channel.streams.zero)?;
    if zero_flags.len() != symbol_count {
        return Err(PackageError::channel("zero-mask length does not match symbol count"));
    }
    let non_zero_count = zero_flags.iter().filter(|&&flag| flag == 0).count();
    let (signs, buckets) = if non_zero_count > 0 {
        (
            decode_symbol_channel(&channel.streams.sign)?,
            decode_symbol_channel(&channel.streams.bucket)?,
        )
    } else {
        (Vec::new(), Vec::new())
    };
    if non_zero_count > 0 && (signs.len() != non_zero_count || buckets.len() != non_zero_count) {
        return Err(PackageError::channel("non-zero payload streams have inconsistent lengths"));
    }
    let residuals =
        unpack_residuals(&channel.residuals.data, channel.residuals.bit_length, &buckets)?;
    if !residuals.is_empty() && residuals.len() != buckets.len() {
        return Err(PackageError::channel("residual stream length mismatch"));
    }

    let mut numbers = Vec::with_capacity(symbol_count);
    let mut cursor = 0usize;
    for &flag in &zero_flags {
        if flag == 1 {
            numbers.push(0);
            continue;
        }
        let bucket = buckets[cursor];
        let sign = signs[cursor];
        let residual = residuals.get(cursor).copied().unwrap_or(0);
        let magnitude = i128::from(1u64 << bucket) + i128::from(residual);
        let value = if sign == 1 { -magnitude } else { magnitude };
        numbers.push(i64::try_from(value).map_err(|_| {
            PackageError::channel("decoded magnitude does not fit a signed 64-bit value")
        })?);
        cursor += 1;
    }
    Ok(numbers)
}

fn numeric_role(entry: &ChannelEntry) -> &'static str {
    if let Some(kind) = &entry.kind {
        let kind = kind.to_lowercase();
        if kind.contains("int") || kind.contains("number") {
            return "literal_int";
        }
    }
    if entry.payload_type.contains("index") {
        return "index";
    }
    if entry.payload_type.contains("offset") {
        return "offset";
    }
    if entry.payload_type.contains("count") {
        return "count";
    }
    "number"
}

/// Encode the number channel, splitting by role when the entry list for
/// this channel is available and consistent.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` when a sub-stream fails to code.
pub fn encode_number_channel(
    numbers: &[i64],
    channel_entries: &[&ChannelEntry],
) -> Result<NumberEncoding> {
    if channel_entries.is_empty() || channel_entries.len() != numbers.len() {
        return Ok(NumberEncoding::LogMagnitude(encode_number_stream(numbers)?));
    }
    let roles: Vec<&'static str> = channel_entries.iter().map(|entry| numeric_role(entry)).collect();
    let mut role_streams: BTreeMap<&'static str, Vec<i64>> = BTreeMap::new();
    for (&value, &role) in numbers.iter().zip(roles.iter()) {
        role_streams.entry(role).or_default().push(value);
    }
    let mut encoded = BTreeMap::new();
    for (role, values) in role_streams {
        encoded.insert(role.to_owned(), encode_number_stream(&values)?);
    }
    Ok(NumberEncoding::RoleBuckets(RoleBucketsChannel {
        encoder: RoleBucketsTag::V1,
        symbol_count: numbers.len() as u64,
        roles: encoded,
        role_index: roles.into_iter().map(str::to_owned).collect(),
    }))
}

fn decode_number_roles(channel: &RoleBucketsChannel) -> Result<Vec<i64>> {
    let symbol_count = channel.symbol_count as usize;
    if symbol_count > 0 && channel.role_index.len() != symbol_count {
        return Err(PackageError::channel("role index length does not match symbol count"));
    }
    let mut decoded: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    for (role, stream) in &channel.roles {
        decoded.insert(role.as_str(), decode_number_stream(stream)?);
    }
    let mut positions: BTreeMap<&str, usize> = BTreeMap::new();
    let mut numbers = Vec::with_capacity(symbol_count);
    for role in &channel.role_index {
        let stream = decoded
            .get(role.as_str())
            .ok_or_else(|| PackageError::channel(format!("role stream missing for {role:?}")))?;
        let position = positions.entry(role.as_str()).or_insert(0);
        let value = stream
            .get(*position)
            .copied()
            .ok_or_else(|| PackageError::channel("role stream exhausted early"))?;
        *position += 1;
        numbers.push(value);
    }
    if symbol_count > 0 && numbers.len() != symbol_count {
        return Err(PackageError::channel("decoded role buckets do not match symbol count"));
    }
    Ok(numbers)
}

/// Decode any number channel representation.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` on stream drift.
pub fn decode_number_channel(encoding: &NumberEncoding) -> Result<Vec<i64>> {
    match encoding {
        NumberEncoding::RoleBuckets(channel) => decode_number_roles(channel),
        NumberEncoding::LogMagnitude(channel) => decode_number_stream(channel),
        NumberEncoding::Plain(stream) => {
            Ok(decode_symbol_channel(stream)?.into_iter().map(i64::from).collect())
        },
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::channels::Channel;

    fn entry(payload_type: &str, kind: Option<&str>) -> ChannelEntry {
        ChannelEntry {
            payload_type: payload_type.to_owned(),
            channel: Channel::Number,
            kind: kind.map(str::to_owned),
            token_index: None,
        }
    }

    #[test]
    fn residual_bit_packing_round_trip() {
        let buckets = vec![0, 3, 1, 5];
        let residuals = vec![0, 0b101, 0b1, 0b10011];
        let (data, bits) = pack_residuals(&residuals, &buckets);
        assert_eq!(bits, 9);
        assert_eq!(unpack_residuals(&data, bits, &buckets).unwrap(), residuals);
    }

    #[test]
    fn stream_round_trip_mixed_values() {
        let numbers = vec![0, 1, -1, 5, -17, 0, 1024, -4096, 7, 0];
        let channel = encode_number_stream(&numbers).unwrap();
        assert_eq!(channel.symbol_count, 10);
        assert_eq!(decode_number_stream(&channel).unwrap(), numbers);
    }

    #[test]
    fn all_zero_stream_skips_sub_streams() {
        let numbers = vec![0, 0, 0];
        let channel = encode_number_stream(&numbers).unwrap();
        assert_eq!(channel.streams.sign.symbol_count, 0);
        assert_eq!(channel.residuals.bit_length, 0);
        assert_eq!(decode_number_stream(&channel).unwrap(), numbers);
    }

    #[test]
    fn extreme_values_round_trip() {
        let numbers = vec![i64::MAX, i64::MIN + 1, -2, 2, 1, -1];
        let channel = encode_number_stream(&numbers).unwrap();
        assert_eq!(decode_number_stream(&channel).unwrap(), numbers);
    }

    #[test]
    fn roles_derive_from_kind_and_type() {
        assert_eq!(numeric_role(&entry("literal", Some("int"))), "literal_int");
        assert_eq!(numeric_role(&entry("array_index", None)), "index");
        assert_eq!(numeric_role(&entry("byte_offset", None)), "offset");
        assert_eq!(numeric_role(&entry("call_arg_count", None)), "count");
        assert_eq!(numeric_role(&entry("other", None)), "number");
    }

    #[test]
    fn role_buckets_round_trip() {
        let numbers = vec![3, -7, 12, 0, 99];
        let entries = vec![
            entry("literal", Some("int")),
            entry("array_index", None),
            entry("literal", Some("int")),
            entry("byte_offset", None),
            entry("misc", None),
        ];
        let refs: Vec<&ChannelEntry> = entries.iter().collect();
        let encoding = encode_number_channel(&numbers, &refs).unwrap();
        assert!(matches!(encoding, NumberEncoding::RoleBuckets(_)));
        assert_eq!(decode_number_channel(&encoding).unwrap(), numbers);
    }

    #[test]
    fn missing_entries_fall_back_to_single_stream() {
        let numbers = vec![1, 2, 3];
        let encoding = encode_number_channel(&numbers, &[]).unwrap();
        assert!(matches!(encoding, NumberEncoding::LogMagnitude(_)));
        assert_eq!(decode_number_channel(&encoding).unwrap(), numbers);
    }

    #[test]
    fn tampered_role_index_is_rejected() {
        let numbers = vec![3, 4];
        let entries = vec![entry("literal", Some("int")), entry("misc", None)];
        let refs: Vec<&ChannelEntry> = entries.iter().collect();
        let NumberEncoding::RoleBuckets(mut channel) =
            encode_number_channel(&numbers, &refs).unwrap()
        else {
            unreachable!("entries present, role buckets expected");
        };
        channel.role_index.push("number".to_owned());
        channel.symbol_count += 1;
        let result = decode_number_channel(&NumberEncoding::RoleBuckets(channel));
        assert!(matches!(result, Err(PackageError::PayloadChannelCorrupt { .. })));
    }

    #[test]
    fn json_round_trip_distinguishes_encoders() {
        let numbers = vec![5, -5];
        let stream = encode_number_stream(&numbers).unwrap();
        let json = serde_json::to_string(&NumberEncoding::LogMagnitude(stream)).unwrap();
        let parsed: NumberEncoding = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, NumberEncoding::LogMagnitude(_)));
        assert_eq!(decode_number_channel(&parsed).unwrap(), numbers);
    }

    proptest! {
        #[test]
        fn arbitrary_numbers_round_trip(numbers in prop::collection::vec(any::<i64>(), 0..128)) {
            let channel = encode_number_stream(&numbers).unwrap();
            prop_assert_eq!(decode_number_stream(&channel).unwrap(), numbers);
        }
    }
}

//! Typed payload channels aligned with the morphemic grammar.
//!
//! Payload values are split into six channels keyed by a one-letter tag:
//! identifier index (`I`), string index (`S`), signed integer (`N`),
//! non-negative count (`C`), boolean flag (`F`), and structured (`R`).
//! The `entries` list records `(payload_type, channel, kind,
//! token_index)` in grammar order and is the authoritative interleaving:
//! replaying it and consuming one element per channel reproduces the
//! original payload sequence exactly.

pub mod conditioned;
pub mod number;
pub mod symbol;

use serde::{Deserialize, Serialize};

use crate::errors::{PackageError, Result};
use crate::string_table::StringTable;
use crate::value::Value;
use conditioned::{
    ChannelEncoding, decode_context_conditioned, decode_slot_conditioned,
    encode_context_conditioned, encode_slot_conditioned,
};
use number::{NumberEncoding, decode_number_channel, encode_number_channel};
use symbol::{
    ChannelStream, PriorModel, decode_symbol_channel, empty_channel, encode_symbol_channel,
};

/// Channel tag identifying which stream a payload value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Identifier index channel
    #[serde(rename = "I")]
    Identifier,
    /// String index channel
    #[serde(rename = "S")]
    String,
    /// Signed integer channel
    #[serde(rename = "N")]
    Number,
    /// Non-negative count channel
    #[serde(rename = "C")]
    Count,
    /// Boolean flag channel
    #[serde(rename = "F")]
    Flag,
    /// Structured value channel
    #[serde(rename = "R")]
    Structured,
}

/// One grammar-ordered payload slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Payload type name
    #[serde(rename = "type")]
    pub payload_type: String,
    /// Channel the value was routed to
    pub channel: Channel,
    /// Literal kind, when the payload carried one
    #[serde(default)]
    pub kind: Option<String>,
    /// Index of the grammar token this payload follows
    #[serde(default)]
    pub token_index: Option<u32>,
}

/// A payload emitted alongside the morphemic token stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Payload type name
    #[serde(rename = "type")]
    pub payload_type: String,
    /// Payload value
    pub value: Value,
}

impl Payload {
    /// Construct a payload.
    #[must_use]
    pub fn new(payload_type: impl Into<String>, value: Value) -> Self {
        Self { payload_type: payload_type.into(), value }
    }
}

/// A structured-channel payload with string references applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredPayload {
    /// Payload type name
    #[serde(rename = "type")]
    pub payload_type: String,
    /// Value tree with strings replaced by table references
    pub value: Value,
}

/// Wire form of the structured channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StructuredChannel {
    /// Structured payloads in grammar order
    #[serde(default)]
    pub payloads: Vec<StructuredPayload>,
}

const IDENTIFIER_TYPES: [&str; 5] = [
    "function_name",
    "call_keyword_name",
    "attribute_name",
    "identifier_name",
    "parameter_name",
];

const COUNT_TYPES: [&str; 7] = [
    "module_body_length",
    "assign_target_count",
    "call_arg_count",
    "call_keyword_count",
    "function_arg_count",
    "function_body_length",
    "identifier_ctx",
];

const FLAG_TYPES: [&str; 2] = ["function_async", "return_has_value"];

/// Channelised payload streams plus the grammar-ordered entry list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PayloadChannels {
    /// Grammar-ordered entries; the authoritative interleaving
    pub entries: Vec<ChannelEntry>,
    /// Identifier table indices
    pub identifiers: Vec<u32>,
    /// String table indices
    pub strings: Vec<u32>,
    /// Signed integers
    pub numbers: Vec<i64>,
    /// Non-negative counts
    pub counts: Vec<u32>,
    /// Boolean flags as 0/1
    pub flags: Vec<u32>,
    /// Structured payloads with string references applied
    pub structured: Vec<StructuredPayload>,
    /// Grammar token keys, for context conditioning
    pub token_keys: Option<Vec<String>>,
}

fn count_from(value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| PackageError::channel(format!("count payload {value} out of range")))
}

impl PayloadChannels {
    /// Construct channels holding only an entry list, as encoder
    /// front-ends produce at the codec boundary.
    #[must_use]
    pub fn from_entries(entries: Vec<ChannelEntry>) -> Self {
        Self { entries, ..Self::default() }
    }

    /// Classify `payloads` into channel entries without building streams.
    #[must_use]
    pub fn classify_entries(payloads: &[Payload]) -> Vec<ChannelEntry> {
        payloads
            .iter()
            .map(|payload| {
                let (channel, kind) = classify_payload(payload);
                ChannelEntry {
                    payload_type: payload.payload_type.clone(),
                    channel,
                    kind,
                    token_index: None,
                }
            })
            .collect()
    }

    /// Build full channel streams from `payloads` against `string_table`.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when a string is missing from the table,
    /// or `PackageError::PayloadChannelCorrupt` when a count payload is
    /// out of range.
    pub fn build(payloads: &[Payload], string_table: &StringTable) -> Result<Self> {
        let mut channels = Self::default();
        for payload in payloads {
            let (channel, kind) = classify_payload(payload);
            let value = literal_value(payload).unwrap_or(&payload.value);
            match channel {
                Channel::Identifier => {
                    let text = value.as_str().ok_or_else(|| {
                        PackageError::channel(format!(
                            "identifier payload {:?} must be a string",
                            payload.payload_type
                        ))
                    })?;
                    channels.identifiers.push(string_table.index_for(text)?);
                },
                Channel::String => {
                    let text = value.as_str().ok_or_else(|| {
                        PackageError::channel(format!(
                            "string payload {:?} must be a string",
                            payload.payload_type
                        ))
                    })?;
                    channels.strings.push(string_table.index_for(text)?);
                },
                Channel::Number => {
                    let number = value.as_int().ok_or_else(|| {
                        PackageError::channel(format!(
                            "number payload {:?} must be an integer",
                            payload.payload_type
                        ))
                    })?;
                    channels.numbers.push(number);
                },
                Channel::Count => {
                    let count = match value {
                        Value::Int(number) => count_from(*number)?,
                        Value::Bool(flag) => u32::from(*flag),
                        _ => {
                            return Err(PackageError::channel(format!(
                                "count payload {:?} must be an integer",
                                payload.payload_type
                            )));
                        },
                    };
                    channels.counts.push(count);
                },
                Channel::Flag => {
                    let flag = match value {
                        Value::Bool(flag) => u32::from(*flag),
                        Value::Int(number) => u32::from(*number != 0),
                        _ => {
                            return Err(PackageError::channel(format!(
                                "flag payload {:?} must be a boolean",
                                payload.payload_type
                            )));
                        },
                    };
                    channels.flags.push(flag);
                },
                Channel::Structured => {
                    channels.structured.push(StructuredPayload {
                        payload_type: payload.payload_type.clone(),
                        value: string_table.encode_value(&payload.value)?,
                    });
                },
            }
            channels.entries.push(ChannelEntry {
                payload_type: payload.payload_type.clone(),
                channel,
                kind,
                token_index: None,
            });
        }
        Ok(channels)
    }

    /// Copy token indices from `source` entries when the lists line up.
    pub fn apply_token_indices(&mut self, source: &[ChannelEntry]) {
        if source.len() != self.entries.len() {
            return;
        }
        for (target, origin) in self.entries.iter_mut().zip(source.iter()) {
            target.token_index = origin.token_index;
        }
    }

    /// Entries belonging to `channel`, in grammar order.
    #[must_use]
    pub fn entries_for(&self, channel: Channel) -> Vec<&ChannelEntry> {
        self.entries.iter().filter(|entry| entry.channel == channel).collect()
    }

    /// Encode the identifier channel: token-context conditioning when
    /// token keys are available, slot conditioning otherwise, plain as
    /// the last resort.
    pub fn encode_identifier_channel(&self) -> Result<ChannelEncoding> {
        if let Some(conditioned) = encode_context_conditioned(
            &self.identifiers,
            &self.entries,
            Channel::Identifier,
            encode_identifier_stream,
            self.token_keys.as_deref(),
        )? {
            return Ok(ChannelEncoding::TokenContext(conditioned));
        }
        if let Some(conditioned) = encode_slot_conditioned(
            &self.identifiers,
            &self.entries,
            Channel::Identifier,
            encode_identifier_stream,
        )? {
            return Ok(ChannelEncoding::SlotConditioned(conditioned));
        }
        Ok(ChannelEncoding::Plain(encode_identifier_stream(&self.identifiers)?))
    }

    /// Encode the string channel, slot-conditioned when possible.
    pub fn encode_string_channel(&self) -> Result<ChannelEncoding> {
        if let Some(conditioned) = encode_slot_conditioned(
            &self.strings,
            &self.entries,
            Channel::String,
            encode_identifier_stream,
        )? {
            return Ok(ChannelEncoding::SlotConditioned(conditioned));
        }
        Ok(ChannelEncoding::Plain(encode_identifier_stream(&self.strings)?))
    }

    /// Encode the count channel, slot-conditioned when possible.
    pub fn encode_count_channel(&self) -> Result<ChannelEncoding> {
        if let Some(conditioned) = encode_slot_conditioned(
            &self.counts,
            &self.entries,
            Channel::Count,
            encode_count_stream,
        )? {
            return Ok(ChannelEncoding::SlotConditioned(conditioned));
        }
        Ok(ChannelEncoding::Plain(encode_count_stream(&self.counts)?))
    }

    /// Encode the flag channel.
    pub fn encode_flag_channel(&self) -> Result<ChannelStream> {
        if self.flags.is_empty() {
            return Ok(empty_channel("bernoulian", 0, None, false));
        }
        encode_symbol_channel(
            &self.flags,
            Some(2),
            "bernoulian",
            Some(PriorModel::Bernoulli { weights: vec![0.5, 0.5] }),
            false,
        )
    }

    /// Encode the number channel, splitting by role when entries are
    /// available.
    pub fn encode_number_channel(&self) -> Result<NumberEncoding> {
        encode_number_channel(&self.numbers, &self.entries_for(Channel::Number))
    }

    /// Wire form of the structured channel.
    #[must_use]
    pub fn structured_channel(&self) -> StructuredChannel {
        StructuredChannel { payloads: self.structured.clone() }
    }

    /// Reconstruct the grammar-ordered payload list.
    ///
    /// # Errors
    ///
    /// `PackageError::PayloadChannelCorrupt` when a channel runs out of
    /// values before the entry list does.
    pub fn to_payloads(&self, string_table: &StringTable) -> Result<Vec<Payload>> {
        let mut cursor = ChannelCursor::default();
        let mut payloads = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let value = match entry.channel {
                Channel::Identifier => {
                    let index = take(&self.identifiers, &mut cursor.identifier, "identifier")?;
                    Value::Str(string_table.string_for_index(index)?.to_owned())
                },
                Channel::String => {
                    let index = take(&self.strings, &mut cursor.string, "string")?;
                    Value::Str(string_table.string_for_index(index)?.to_owned())
                },
                Channel::Number => Value::Int(take(&self.numbers, &mut cursor.number, "number")?),
                Channel::Count => {
                    Value::Int(i64::from(take(&self.counts, &mut cursor.count, "count")?))
                },
                Channel::Flag => Value::Bool(take(&self.flags, &mut cursor.flag, "flag")? == 1),
                Channel::Structured => {
                    let structured = cursor.take_structured(&self.structured)?;
                    string_table.decode_value(&structured.value)?
                },
            };
            let value = match &entry.kind {
                Some(kind) => Value::map([
                    ("kind", Value::Str(kind.clone())),
                    ("value", value),
                ]),
                None => value,
            };
            payloads.push(Payload::new(entry.payload_type.clone(), value));
        }
        Ok(payloads)
    }
}

/// Explicit index-per-channel cursor replacing iterator juggling: each
/// entry consumed advances exactly one channel position.
#[derive(Debug, Default)]
struct ChannelCursor {
    identifier: usize,
    string: usize,
    number: usize,
    count: usize,
    flag: usize,
    structured: usize,
}

fn take<T: Copy>(values: &[T], position: &mut usize, label: &'static str) -> Result<T> {
    let value = values
        .get(*position)
        .copied()
        .ok_or_else(|| PackageError::channel(format!("{label} channel exhausted early")))?;
    *position += 1;
    Ok(value)
}

impl ChannelCursor {
    fn take_structured<'a>(
        &mut self,
        values: &'a [StructuredPayload],
    ) -> Result<&'a StructuredPayload> {
        let value = values
            .get(self.structured)
            .ok_or_else(|| PackageError::channel("structured channel exhausted early"))?;
        self.structured += 1;
        Ok(value)
    }
}

fn classify_payload(payload: &Payload) -> (Channel, Option<String>) {
    let name = payload.payload_type.as_str();
    if IDENTIFIER_TYPES.contains(&name) && payload.value.as_str().is_some() {
        return (Channel::Identifier, None);
    }
    if COUNT_TYPES.contains(&name)
        && matches!(payload.value, Value::Int(_) | Value::Bool(_))
    {
        return (Channel::Count, None);
    }
    if FLAG_TYPES.contains(&name) && matches!(payload.value, Value::Int(_) | Value::Bool(_)) {
        return (Channel::Flag, None);
    }
    if name == "literal" {
        if let Value::Map(map) = &payload.value {
            let kind = map.get("kind").and_then(Value::as_str).map(str::to_owned);
            match map.get("value") {
                Some(Value::Str(_)) => return (Channel::String, kind),
                Some(Value::Bool(_)) => return (Channel::Flag, kind),
                Some(Value::Int(_)) => return (Channel::Number, kind),
                _ => {},
            }
        }
    }
    match &payload.value {
        Value::Str(_) => (Channel::String, None),
        Value::Bool(_) => (Channel::Flag, None),
        Value::Int(number) if *number >= 0 => (Channel::Count, None),
        Value::Int(_) => (Channel::Number, None),
        _ => (Channel::Structured, None),
    }
}

/// The `{kind, value}` inner value of a literal payload, if present.
fn literal_value(payload: &Payload) -> Option<&Value> {
    if payload.payload_type != "literal" {
        return None;
    }
    let Value::Map(map) = &payload.value else {
        return None;
    };
    let value = map.get("value")?;
    matches!(value, Value::Str(_) | Value::Bool(_) | Value::Int(_)).then_some(value)
}

fn encode_identifier_stream(symbols: &[u32]) -> Result<ChannelStream> {
    if symbols.is_empty() {
        return Ok(empty_channel("adaptive", 0, None, false));
    }
    encode_symbol_channel(symbols, None, "zipf", Some(PriorModel::Zipf { exponent: 1.0 }), true)
}

fn encode_count_stream(symbols: &[u32]) -> Result<ChannelStream> {
    if symbols.is_empty() {
        return Ok(empty_channel("adaptive", 0, None, false));
    }
    encode_symbol_channel(
        symbols,
        None,
        "geometric-count",
        Some(PriorModel::Geometric { alpha: 0.45 }),
        true,
    )
}

/// Decode an index-valued channel (identifier or string).
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` on stream drift, including a
/// token-context channel arriving without token keys.
pub fn decode_index_channel(
    encoding: Option<&ChannelEncoding>,
    entries: &[ChannelEntry],
    channel: Channel,
    token_keys: Option<&[String]>,
) -> Result<Vec<u32>> {
    let Some(encoding) = encoding else {
        return Ok(Vec::new());
    };
    match encoding {
        ChannelEncoding::TokenContext(conditioned) => {
            let token_keys = token_keys.ok_or_else(|| {
                PackageError::channel("token-context channel requires token keys")
            })?;
            decode_context_conditioned(
                conditioned,
                entries,
                channel,
                decode_symbol_channel,
                token_keys,
            )
        },
        ChannelEncoding::SlotConditioned(conditioned) => {
            decode_slot_conditioned(conditioned, entries, channel, decode_symbol_channel)
        },
        ChannelEncoding::Plain(stream) => decode_symbol_channel(stream),
    }
}

/// Decode the flag channel.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` on a damaged stream.
pub fn decode_flag_channel(stream: Option<&ChannelStream>) -> Result<Vec<u32>> {
    match stream {
        Some(stream) => decode_symbol_channel(stream),
        None => Ok(Vec::new()),
    }
}

/// Decode the number channel.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` on stream drift.
pub fn decode_numbers(encoding: Option<&NumberEncoding>) -> Result<Vec<i64>> {
    match encoding {
        Some(encoding) => decode_number_channel(encoding),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payloads() -> Vec<Payload> {
        vec![
            Payload::new("function_name", Value::from("main")),
            Payload::new("call_arg_count", Value::Int(2)),
            Payload::new("function_async", Value::Bool(false)),
            Payload::new(
                "literal",
                Value::map([("kind", Value::from("int")), ("value", Value::Int(-42))]),
            ),
            Payload::new(
                "literal",
                Value::map([("kind", Value::from("str")), ("value", Value::from("hello"))]),
            ),
            Payload::new("docstring", Value::from("main entry point")),
            Payload::new(
                "decorator",
                Value::map([("name", Value::from("cached")), ("args", Value::List(vec![]))]),
            ),
        ]
    }

    fn table_for(payloads: &[Payload]) -> StringTable {
        let values: Vec<Value> = payloads.iter().map(|p| p.value.clone()).collect();
        StringTable::build(values.iter())
    }

    #[test]
    fn classification_routes_each_channel() {
        let payloads = sample_payloads();
        let entries = PayloadChannels::classify_entries(&payloads);
        let channels: Vec<Channel> = entries.iter().map(|e| e.channel).collect();
        assert_eq!(channels, vec![
            Channel::Identifier,
            Channel::Count,
            Channel::Flag,
            Channel::Number,
            Channel::String,
            Channel::String,
            Channel::Structured,
        ]);
        assert_eq!(entries[3].kind.as_deref(), Some("int"));
        assert_eq!(entries[4].kind.as_deref(), Some("str"));
    }

    #[test]
    fn build_then_to_payloads_round_trips() {
        let payloads = sample_payloads();
        let table = table_for(&payloads);
        let channels = PayloadChannels::build(&payloads, &table).unwrap();
        assert_eq!(channels.identifiers.len(), 1);
        assert_eq!(channels.numbers, vec![-42]);
        assert_eq!(channels.flags, vec![0]);
        assert_eq!(channels.structured.len(), 1);

        let rebuilt = channels.to_payloads(&table).unwrap();
        assert_eq!(rebuilt, payloads);
    }

    #[test]
    fn negative_standalone_integers_use_the_number_channel() {
        let payloads = vec![Payload::new("delta", Value::Int(-3))];
        let entries = PayloadChannels::classify_entries(&payloads);
        assert_eq!(entries[0].channel, Channel::Number);
    }

    #[test]
    fn entry_consumption_is_strictly_linear() {
        let payloads = sample_payloads();
        let table = table_for(&payloads);
        let mut channels = PayloadChannels::build(&payloads, &table).unwrap();
        // Drop one count value; replaying entries must notice.
        channels.counts.clear();
        let result = channels.to_payloads(&table);
        assert!(matches!(result, Err(PackageError::PayloadChannelCorrupt { .. })));
    }

    #[test]
    fn channel_encodings_round_trip_through_entries() {
        let payloads = sample_payloads();
        let table = table_for(&payloads);
        let channels = PayloadChannels::build(&payloads, &table).unwrap();

        let identifier = channels.encode_identifier_channel().unwrap();
        let decoded = decode_index_channel(
            Some(&identifier),
            &channels.entries,
            Channel::Identifier,
            None,
        )
        .unwrap();
        assert_eq!(decoded, channels.identifiers);

        let strings = channels.encode_string_channel().unwrap();
        let decoded =
            decode_index_channel(Some(&strings), &channels.entries, Channel::String, None)
                .unwrap();
        assert_eq!(decoded, channels.strings);

        let counts = channels.encode_count_channel().unwrap();
        let decoded =
            decode_index_channel(Some(&counts), &channels.entries, Channel::Count, None).unwrap();
        assert_eq!(decoded, channels.counts);

        let flags = channels.encode_flag_channel().unwrap();
        assert_eq!(decode_flag_channel(Some(&flags)).unwrap(), channels.flags);

        let numbers = channels.encode_number_channel().unwrap();
        assert_eq!(decode_numbers(Some(&numbers)).unwrap(), channels.numbers);
    }

    #[test]
    fn identifier_channel_uses_context_when_token_keys_exist() {
        let payloads = vec![
            Payload::new("identifier_name", Value::from("x")),
            Payload::new("identifier_name", Value::from("y")),
        ];
        let table = table_for(&payloads);
        let mut channels = PayloadChannels::build(&payloads, &table).unwrap();
        channels.entries[0].token_index = Some(0);
        channels.entries[1].token_index = Some(1);
        channels.token_keys = Some(vec!["op:assign".to_owned(), "flow:return".to_owned()]);

        let encoding = channels.encode_identifier_channel().unwrap();
        assert!(matches!(encoding, ChannelEncoding::TokenContext(_)));
        let decoded = decode_index_channel(
            Some(&encoding),
            &channels.entries,
            Channel::Identifier,
            channels.token_keys.as_deref(),
        )
        .unwrap();
        assert_eq!(decoded, channels.identifiers);
    }

    #[test]
    fn missing_channels_decode_to_empty() {
        assert_eq!(decode_index_channel(None, &[], Channel::String, None).unwrap(), Vec::<u32>::new());
        assert_eq!(decode_flag_channel(None).unwrap(), Vec::<u32>::new());
        assert_eq!(decode_numbers(None).unwrap(), Vec::<i64>::new());
    }
}

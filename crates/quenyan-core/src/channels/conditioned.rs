//! Slot- and context-conditioned channel encodings.
//!
//! Conditioning splits a channel's symbols into groups with tighter
//! distributions before entropy coding. Slot conditioning partitions by
//! the `(payload_type, kind)` of each entry; context conditioning (used
//! by the identifier channel) partitions by the grammar token key
//! immediately preceding each value. Decoding re-interleaves the groups
//! deterministically by replaying the entry list, so any drift between
//! entries and streams is detected rather than silently reordered.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::channels::symbol::ChannelStream;
use crate::channels::{Channel, ChannelEntry};
use crate::errors::{PackageError, Result};

/// Token-key families that provide identifier context.
const CONTEXT_PREFIXES: [&str; 4] = ["op:", "construct:", "flow:", "structure:"];

/// Literal tag for slot-conditioned channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotModeTag {
    /// `slot-conditioned`
    #[serde(rename = "slot-conditioned")]
    SlotConditioned,
}

/// Literal tag for token-context channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextModeTag {
    /// `token-context`
    #[serde(rename = "token-context")]
    TokenContext,
}

/// One slot group and its coded stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotStream {
    /// Payload type of the slot
    #[serde(rename = "type")]
    pub slot_type: String,
    /// Payload kind of the slot, if any
    pub kind: Option<String>,
    /// Coded symbols for this slot
    pub stream: ChannelStream,
}

/// Channel partitioned by `(payload_type, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConditionedChannel {
    /// Mode marker
    pub mode: SlotModeTag,
    /// Total symbols across all slots
    pub symbol_count: u64,
    /// Slot groups in first-appearance order
    pub slots: Vec<SlotStream>,
}

/// One context group and its coded stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStream {
    /// Grammar token key, or `None` for the default bucket
    pub context: Option<String>,
    /// Coded symbols for this context
    pub stream: ChannelStream,
}

/// Channel partitioned by preceding grammar token key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenContextChannel {
    /// Mode marker
    pub mode: ContextModeTag,
    /// Total symbols across all contexts
    pub symbol_count: u64,
    /// Context groups in first-appearance order
    pub contexts: Vec<ContextStream>,
}

/// Any wire representation an index-valued channel may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelEncoding {
    /// Slot-conditioned groups
    SlotConditioned(SlotConditionedChannel),
    /// Token-context groups
    TokenContext(TokenContextChannel),
    /// Single stream
    Plain(ChannelStream),
}

impl ChannelEncoding {
    /// Total symbols carried by the channel.
    #[must_use]
    pub fn symbol_count(&self) -> u64 {
        match self {
            Self::SlotConditioned(channel) => channel.symbol_count,
            Self::TokenContext(channel) => channel.symbol_count,
            Self::Plain(stream) => stream.symbol_count,
        }
    }
}

/// Resolve the context key for an entry, when token keys are available.
fn context_key(entry: &ChannelEntry, token_keys: &[String]) -> Option<String> {
    let index = entry.token_index?;
    let key = token_keys.get(index as usize)?;
    CONTEXT_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
        .then(|| key.clone())
}

fn zip_channel_symbols<'a, K, F>(
    symbols: &[u32],
    entries: &'a [ChannelEntry],
    channel: Channel,
    mut key_of: F,
) -> Result<Vec<(K, Vec<u32>)>>
where
    K: PartialEq,
    F: FnMut(&'a ChannelEntry) -> K,
{
    let mut grouped: Vec<(K, Vec<u32>)> = Vec::new();
    let mut cursor = 0usize;
    for entry in entries {
        if entry.channel != channel {
            continue;
        }
        let symbol = *symbols.get(cursor).ok_or_else(|| {
            PackageError::channel("payload channel has fewer symbols than grammar slots")
        })?;
        cursor += 1;
        let key = key_of(entry);
        match grouped.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, bucket)) => bucket.push(symbol),
            None => grouped.push((key, vec![symbol])),
        }
    }
    if cursor != symbols.len() {
        return Err(PackageError::channel("payload channel has more symbols than grammar slots"));
    }
    Ok(grouped)
}

/// Encode a channel slot-conditioned. Returns `None` when the entry list
/// contributes nothing for this channel.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` when the symbol and entry counts
/// disagree or a group fails to code.
pub fn encode_slot_conditioned<F>(
    symbols: &[u32],
    entries: &[ChannelEntry],
    channel: Channel,
    encoder: F,
) -> Result<Option<SlotConditionedChannel>>
where
    F: Fn(&[u32]) -> Result<ChannelStream>,
{
    if entries.is_empty() {
        return Ok(None);
    }
    let grouped = zip_channel_symbols(symbols, entries, channel, |entry| {
        (entry.payload_type.clone(), entry.kind.clone())
    })?;
    if grouped.is_empty() {
        return Ok(None);
    }
    let mut slots = Vec::with_capacity(grouped.len());
    for ((slot_type, kind), slot_symbols) in grouped {
        slots.push(SlotStream { slot_type, kind, stream: encoder(&slot_symbols)? });
    }
    Ok(Some(SlotConditionedChannel {
        mode: SlotModeTag::SlotConditioned,
        symbol_count: symbols.len() as u64,
        slots,
    }))
}

/// Encode a channel conditioned on preceding grammar token keys. Returns
/// `None` when no entry resolves to a context.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` when the symbol and entry counts
/// disagree or a group fails to code.
pub fn encode_context_conditioned<F>(
    symbols: &[u32],
    entries: &[ChannelEntry],
    channel: Channel,
    encoder: F,
    token_keys: Option<&[String]>,
) -> Result<Option<TokenContextChannel>>
where
    F: Fn(&[u32]) -> Result<ChannelStream>,
{
    let Some(token_keys) = token_keys else {
        return Ok(None);
    };
    if entries.is_empty() {
        return Ok(None);
    }
    let grouped =
        zip_channel_symbols(symbols, entries, channel, |entry| context_key(entry, token_keys))?;
    if grouped.is_empty() || (grouped.len() == 1 && grouped[0].0.is_none()) {
        return Ok(None);
    }
    let mut contexts = Vec::with_capacity(grouped.len());
    for (context, context_symbols) in grouped {
        contexts.push(ContextStream { context, stream: encoder(&context_symbols)? });
    }
    Ok(Some(TokenContextChannel {
        mode: ContextModeTag::TokenContext,
        symbol_count: symbols.len() as u64,
        contexts,
    }))
}

/// Re-interleave a slot-conditioned channel by replaying the entry list.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` when a slot stream is missing,
/// exhausted early, or left with surplus symbols.
pub fn decode_slot_conditioned<F>(
    channel_data: &SlotConditionedChannel,
    entries: &[ChannelEntry],
    channel: Channel,
    decoder: F,
) -> Result<Vec<u32>>
where
    F: Fn(&ChannelStream) -> Result<Vec<u32>>,
{
    let mut decoded: Vec<((&str, Option<&str>), VecDeque<u32>)> = Vec::new();
    for slot in &channel_data.slots {
        decoded.push((
            (slot.slot_type.as_str(), slot.kind.as_deref()),
            decoder(&slot.stream)?.into(),
        ));
    }
    let mut symbols = Vec::new();
    for entry in entries {
        if entry.channel != channel {
            continue;
        }
        let key = (entry.payload_type.as_str(), entry.kind.as_deref());
        let stream = decoded
            .iter_mut()
            .find(|(existing, _)| *existing == key)
            .map(|(_, stream)| stream)
            .ok_or_else(|| {
                PackageError::channel(format!("slot-conditioned channel missing stream for {key:?}"))
            })?;
        let symbol = stream.pop_front().ok_or_else(|| {
            PackageError::channel(format!("slot-conditioned stream for {key:?} exhausted early"))
        })?;
        symbols.push(symbol);
    }
    for (key, remaining) in &decoded {
        if !remaining.is_empty() {
            return Err(PackageError::channel(format!(
                "slot-conditioned stream for {key:?} contains surplus symbols"
            )));
        }
    }
    Ok(symbols)
}

/// Re-interleave a token-context channel by replaying the entry list.
///
/// Entries whose key resolves to no stored context fall back to the
/// default (`None`) bucket.
///
/// # Errors
///
/// `PackageError::PayloadChannelCorrupt` when a context stream is
/// missing, exhausted early, or left with surplus symbols.
pub fn decode_context_conditioned<F>(
    channel_data: &TokenContextChannel,
    entries: &[ChannelEntry],
    channel: Channel,
    decoder: F,
    token_keys: &[String],
) -> Result<Vec<u32>>
where
    F: Fn(&ChannelStream) -> Result<Vec<u32>>,
{
    let mut decoded: Vec<(Option<&str>, VecDeque<u32>)> = Vec::new();
    for context in &channel_data.contexts {
        decoded.push((context.context.as_deref(), decoder(&context.stream)?.into()));
    }
    let mut symbols = Vec::new();
    for entry in entries {
        if entry.channel != channel {
            continue;
        }
        let key = context_key(entry, token_keys);
        let has_key = decoded.iter().any(|(existing, _)| *existing == key.as_deref());
        let lookup = if has_key { key.as_deref() } else { None };
        let stream = decoded
            .iter_mut()
            .find(|(existing, _)| *existing == lookup)
            .map(|(_, stream)| stream)
            .ok_or_else(|| {
                PackageError::channel(format!("token-context stream missing for context {key:?}"))
            })?;
        let symbol = stream.pop_front().ok_or_else(|| {
            PackageError::channel(format!("token-context stream for {key:?} exhausted early"))
        })?;
        symbols.push(symbol);
    }
    for (key, remaining) in &decoded {
        if !remaining.is_empty() {
            return Err(PackageError::channel(format!(
                "token-context stream for {key:?} contains surplus symbols"
            )));
        }
    }
    Ok(symbols)
}

//! Frequency-aware string table with prefix compression.
//!
//! Strings collected from payload values are sorted by `(-frequency,
//! value)` so hot strings get small indices, then each entry stores only
//! the suffix beyond its longest common prefix with the previous entry.
//! Prefix lengths count characters, not bytes, so multi-byte values
//! reconstitute exactly. Suffix bytes are grouped by string type and each
//! group is rANS-compressed over the byte alphabet; grouping similar
//! strings keeps the per-group byte distributions tight.

use std::collections::{BTreeMap, HashMap};

use crate::errors::{PackageError, Result};
use crate::model::CompressionModel;
use crate::rans::{DEFAULT_PRECISION_BITS, RansCodec};
use crate::value::{Value, canonical_json};
use crate::varint::{read_varint, write_varint};

/// Sentinel map key marking a string-table reference inside structured
/// payload values.
pub const STRING_REF_KEY: &str = "__strref__";

const STRING_TABLE_VERSION: u64 = 1;

/// String type classification for suffix grouping.
///
/// 0 generic, 1 identifier-like, 2 path/URL, 3 natural language,
/// 4 structured text (JSON/SQL).
#[must_use]
pub fn classify_string(value: &str) -> u8 {
    let text = value.trim();
    if text.is_empty() {
        return 0;
    }
    if text.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return 1;
    }
    if text.contains("://") || text.contains('/') || text.contains('\\') {
        return 2;
    }
    let lowered = text.to_lowercase();
    if lowered.starts_with('{')
        || lowered.starts_with('[')
        || ["select", "insert", "update", "delete", "with"]
            .iter()
            .any(|keyword| lowered.starts_with(keyword))
    {
        return 4;
    }
    if text.chars().any(char::is_whitespace)
        && text.chars().any(|ch| !ch.is_alphanumeric() && !ch.is_whitespace())
    {
        return 3;
    }
    0
}

/// Length bucket: 0 for up to 8 chars, 1 up to 32, 2 up to 128, 3 beyond.
#[must_use]
pub fn length_bucket(value: &str) -> u8 {
    match value.chars().count() {
        0..=8 => 0,
        9..=32 => 1,
        33..=128 => 2,
        _ => 3,
    }
}

fn longest_common_prefix_chars(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

fn char_prefix(value: &str, chars: usize) -> &str {
    match value.char_indices().nth(chars) {
        Some((offset, _)) => &value[..offset],
        None => value,
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::Str(text) => out.push(text),
        Value::List(items) => {
            for item in items {
                collect_strings(item, out);
            }
        },
        Value::Map(map) => {
            for item in map.values() {
                collect_strings(item, out);
            }
        },
        _ => {},
    }
}

/// Prefix-compressed description of a single string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringTableEntry {
    /// Full string value
    pub value: String,
    /// Occurrence count across the payload set
    pub frequency: u64,
    /// Characters shared with the previous entry
    pub prefix_length: u64,
    /// Remainder beyond the shared prefix
    pub suffix: String,
    /// String type classification
    pub type_id: u8,
    /// Length bucket
    pub length_bucket: u8,
}

/// Frequency-sorted, prefix-compressed string table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringTable {
    entries: Vec<StringTableEntry>,
    index: HashMap<String, u32>,
}

impl StringTable {
    fn from_entries(entries: Vec<StringTableEntry>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.value.clone(), idx as u32))
            .collect();
        Self { entries, index }
    }

    /// Build a table from every string reachable in `values`, including
    /// strings nested inside lists and maps.
    pub fn build<'a, I: IntoIterator<Item = &'a Value>>(values: I) -> Self {
        let mut counter: HashMap<&str, u64> = HashMap::new();
        let mut found = Vec::new();
        for value in values {
            found.clear();
            collect_strings(value, &mut found);
            for text in &found {
                *counter.entry(text).or_insert(0) += 1;
            }
        }
        if counter.is_empty() {
            return Self::default();
        }
        let mut ordered: Vec<(&str, u64)> = counter.into_iter().collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        let mut entries = Vec::with_capacity(ordered.len());
        let mut previous = String::new();
        for (value, frequency) in ordered {
            let prefix_length = longest_common_prefix_chars(&previous, value);
            let suffix = value
                .char_indices()
                .nth(prefix_length)
                .map_or("", |(offset, _)| &value[offset..])
                .to_owned();
            entries.push(StringTableEntry {
                value: value.to_owned(),
                frequency,
                prefix_length: prefix_length as u64,
                suffix,
                type_id: classify_string(value),
                length_bucket: length_bucket(value),
            });
            previous = value.to_owned();
        }
        Self::from_entries(entries)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in index order.
    #[must_use]
    pub fn entries(&self) -> &[StringTableEntry] {
        &self.entries
    }

    /// Index of `value`.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when the value is absent.
    pub fn index_for(&self, value: &str) -> Result<u32> {
        self.index.get(value).copied().ok_or_else(|| {
            PackageError::malformed(format!("{value:?} is not present in the string table"))
        })
    }

    /// Value at `index`.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when the index is out of range.
    pub fn string_for_index(&self, index: u32) -> Result<&str> {
        self.entries
            .get(index as usize)
            .map(|entry| entry.value.as_str())
            .ok_or_else(|| {
                PackageError::malformed(format!("string table index {index} out of range"))
            })
    }

    /// Serialise the table into its binary form.
    ///
    /// # Errors
    ///
    /// `PackageError::EntropyCorrupt` when a suffix stream fails to code.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        write_varint(&mut buffer, STRING_TABLE_VERSION);
        write_varint(&mut buffer, self.entries.len() as u64);

        let mut grouped: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        for entry in &self.entries {
            let suffix_bytes = entry.suffix.as_bytes();
            write_varint(&mut buffer, entry.prefix_length);
            write_varint(&mut buffer, suffix_bytes.len() as u64);
            write_varint(&mut buffer, entry.frequency);
            write_varint(&mut buffer, u64::from(entry.type_id));
            write_varint(&mut buffer, u64::from(entry.length_bucket));
            grouped.entry(entry.type_id).or_default().extend_from_slice(suffix_bytes);
        }

        let codec = RansCodec::with_default_precision();
        write_varint(&mut buffer, grouped.len() as u64);
        for (type_id, raw_bytes) in &grouped {
            let symbols: Vec<u32> = raw_bytes.iter().map(|&b| u32::from(b)).collect();
            let table = codec.build_table(&symbols, 256)?;
            let compressed = codec.encode(&symbols, &table)?;
            let model = CompressionModel {
                precision_bits: Some(table.precision_bits),
                frequencies: Some(table.frequencies.clone()),
                ..CompressionModel::default()
            };
            let model_blob = canonical_json(&model)?.into_bytes();

            write_varint(&mut buffer, u64::from(*type_id));
            write_varint(&mut buffer, raw_bytes.len() as u64);
            write_varint(&mut buffer, model_blob.len() as u64);
            buffer.extend_from_slice(&model_blob);
            write_varint(&mut buffer, compressed.len() as u64);
            buffer.extend_from_slice(&compressed);
        }
        Ok(buffer)
    }

    /// Parse a serialised table, falling back to the legacy single-stream
    /// layout when the v1 parse fails.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when neither layout parses.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match Self::from_bytes_v1(data) {
            Ok(table) => Ok(table),
            Err(_) => Self::from_bytes_legacy(data),
        }
    }

    fn from_bytes_v1(data: &[u8]) -> Result<Self> {
        let mut offset = 0;
        let (version, next) = read_varint(data, offset)?;
        offset = next;
        if version != STRING_TABLE_VERSION {
            return Err(PackageError::malformed("unsupported string table version"));
        }
        let (count, next) = read_varint(data, offset)?;
        offset = next;

        let mut metadata = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (prefix, next) = read_varint(data, offset)?;
            let (suffix_len, next) = read_varint(data, next)?;
            let (frequency, next) = read_varint(data, next)?;
            let (type_id, next) = read_varint(data, next)?;
            let (bucket, next) = read_varint(data, next)?;
            offset = next;
            metadata.push((prefix, suffix_len, frequency, type_id as u8, bucket as u8));
        }

        let (type_streams, next) = read_varint(data, offset)?;
        offset = next;
        let mut grouped: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        for _ in 0..type_streams {
            let (type_id, next) = read_varint(data, offset)?;
            let (byte_len, next) = read_varint(data, next)?;
            let (model_len, next) = read_varint(data, next)?;
            offset = next;
            let model_end = offset
                .checked_add(model_len as usize)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| PackageError::malformed("string table model blob truncated"))?;
            let model: CompressionModel = if model_len == 0 {
                CompressionModel {
                    precision_bits: Some(DEFAULT_PRECISION_BITS),
                    frequencies: Some(Vec::new()),
                    ..CompressionModel::default()
                }
            } else {
                serde_json::from_slice(&data[offset..model_end]).map_err(|err| {
                    PackageError::malformed(format!("string table model blob invalid: {err}"))
                })?
            };
            offset = model_end;
            let (compressed_len, next) = read_varint(data, offset)?;
            offset = next;
            let end = offset
                .checked_add(compressed_len as usize)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| PackageError::malformed("string table stream truncated"))?;
            let compressed = &data[offset..end];
            offset = end;

            let bytes = if byte_len == 0 {
                Vec::new()
            } else {
                let frequencies = model.frequencies.as_deref().unwrap_or(&[]);
                let stream_codec = RansCodec::new(model.precision_or_default())?;
                let table = stream_codec.table_from_frequencies(frequencies)?;
                stream_codec
                    .decode(compressed, &table, byte_len as usize)?
                    .into_iter()
                    .map(|symbol| symbol as u8)
                    .collect()
            };
            grouped.insert(type_id as u8, bytes);
        }

        let mut entries = Vec::with_capacity(metadata.len());
        let mut previous = String::new();
        let mut positions: BTreeMap<u8, usize> = BTreeMap::new();
        for (prefix, suffix_len, frequency, type_id, bucket) in metadata {
            let stream = grouped.get(&type_id).map_or(&[] as &[u8], Vec::as_slice);
            let position = positions.get(&type_id).copied().unwrap_or(0);
            let end = position + suffix_len as usize;
            if end > stream.len() {
                return Err(PackageError::malformed("suffix stream truncated for type"));
            }
            let suffix = std::str::from_utf8(&stream[position..end])
                .map_err(|_| PackageError::malformed("string table suffix is not UTF-8"))?
                .to_owned();
            positions.insert(type_id, end);
            let value = format!("{}{}", char_prefix(&previous, prefix as usize), suffix);
            entries.push(StringTableEntry {
                value: value.clone(),
                frequency,
                prefix_length: prefix,
                suffix,
                type_id,
                length_bucket: bucket,
            });
            previous = value;
        }
        Ok(Self::from_entries(entries))
    }

    fn from_bytes_legacy(data: &[u8]) -> Result<Self> {
        let mut offset = 0;
        let (count, next) = read_varint(data, offset)?;
        offset = next;
        let mut entries = Vec::with_capacity(count as usize);
        let mut previous = String::new();
        for _ in 0..count {
            let (prefix, next) = read_varint(data, offset)?;
            let (length, next) = read_varint(data, next)?;
            offset = next;
            let end = offset
                .checked_add(length as usize)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| PackageError::malformed("legacy string table truncated"))?;
            let suffix = std::str::from_utf8(&data[offset..end])
                .map_err(|_| PackageError::malformed("legacy string table suffix is not UTF-8"))?
                .to_owned();
            offset = end;
            let (frequency, next) = read_varint(data, offset)?;
            offset = next;
            let value = format!("{}{}", char_prefix(&previous, prefix as usize), suffix);
            entries.push(StringTableEntry {
                type_id: classify_string(&value),
                length_bucket: length_bucket(&value),
                value: value.clone(),
                frequency,
                prefix_length: prefix,
                suffix,
            });
            previous = value;
        }
        Ok(Self::from_entries(entries))
    }

    /// Replace every string in `value` with a `{__strref__: index}` map.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` when a string is absent from the table.
    pub fn encode_value(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::Str(text) => Value::map([(STRING_REF_KEY, Value::Int(
                i64::from(self.index_for(text)?),
            ))]),
            Value::List(items) => {
                Value::List(items.iter().map(|item| self.encode_value(item)).collect::<Result<_>>()?)
            },
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(key, item)| Ok((key.clone(), self.encode_value(item)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Resolve every `{__strref__: index}` map in `value` back to its
    /// string.
    ///
    /// # Errors
    ///
    /// `PackageError::Malformed` on a non-integer or out-of-range
    /// reference.
    pub fn decode_value(&self, value: &Value) -> Result<Value> {
        if let Value::Map(map) = value {
            if map.len() == 1 {
                if let Some(reference) = map.get(STRING_REF_KEY) {
                    let index = reference.as_int().ok_or_else(|| {
                        PackageError::malformed("string reference index must be an integer")
                    })?;
                    let index = u32::try_from(index).map_err(|_| {
                        PackageError::malformed("string reference index must be non-negative")
                    })?;
                    return Ok(Value::Str(self.string_for_index(index)?.to_owned()));
                }
            }
        }
        Ok(match value {
            Value::List(items) => {
                Value::List(items.iter().map(|item| self.decode_value(item)).collect::<Result<_>>()?)
            },
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(key, item)| Ok((key.clone(), self.decode_value(item)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn table_from(values: &[Value]) -> StringTable {
        StringTable::build(values.iter())
    }

    #[test]
    fn entries_sort_by_frequency_then_value() {
        let values = vec![
            Value::from("beta"),
            Value::from("alpha"),
            Value::from("beta"),
            Value::from("gamma"),
            Value::from("alpha"),
            Value::from("alpha"),
        ];
        let table = table_from(&values);
        let order: Vec<&str> = table.entries().iter().map(|e| e.value.as_str()).collect();
        assert_eq!(order, vec!["alpha", "beta", "gamma"]);
        assert_eq!(table.index_for("beta").unwrap(), 1);
    }

    #[test]
    fn prefix_compression_uses_previous_entry() {
        let values: Vec<Value> =
            ["prefix_a", "prefix_a", "prefix_b"].iter().map(|&s| Value::from(s)).collect();
        let table = table_from(&values);
        let entries = table.entries();
        assert_eq!(entries[0].prefix_length, 0);
        assert_eq!(entries[1].prefix_length, 7);
        assert_eq!(entries[1].suffix, "b");
    }

    #[test]
    fn classification_buckets() {
        assert_eq!(classify_string("snake_case_1"), 1);
        assert_eq!(classify_string("https://example.com/path"), 2);
        assert_eq!(classify_string("a natural sentence, with punctuation."), 3);
        assert_eq!(classify_string(r#"{"json": true}"#), 4);
        assert_eq!(classify_string("SELECT * FROM t"), 4);
        assert_eq!(classify_string(""), 0);
        assert_eq!(classify_string("odd-ball"), 0);
    }

    #[test]
    fn length_buckets() {
        assert_eq!(length_bucket("short"), 0);
        assert_eq!(length_bucket(&"x".repeat(9)), 1);
        assert_eq!(length_bucket(&"x".repeat(33)), 2);
        assert_eq!(length_bucket(&"x".repeat(200)), 3);
    }

    #[test]
    fn strings_inside_nested_values_are_collected() {
        let value = Value::map([
            ("list", Value::List(vec![Value::from("inner"), Value::Int(3)])),
            ("deep", Value::map([("key", Value::from("nested"))])),
        ]);
        let table = StringTable::build([&value]);
        assert!(table.index_for("inner").is_ok());
        assert!(table.index_for("nested").is_ok());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn binary_round_trip() {
        let values: Vec<Value> = [
            "alpha", "alpha", "alphabet", "path/to/file", "some natural text!", "{\"j\":1}",
        ]
        .iter()
        .map(|&s| Value::from(s))
        .collect();
        let table = table_from(&values);
        let bytes = table.to_bytes().unwrap();
        let parsed = StringTable::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn empty_table_round_trip() {
        let table = StringTable::default();
        let bytes = table.to_bytes().unwrap();
        let parsed = StringTable::from_bytes(&bytes).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn multibyte_prefixes_round_trip() {
        let values: Vec<Value> =
            ["héllo", "héllo", "héllos", "日本語", "日本"].iter().map(|&s| Value::from(s)).collect();
        let table = table_from(&values);
        let bytes = table.to_bytes().unwrap();
        let parsed = StringTable::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn legacy_layout_is_accepted() {
        // Hand-rolled legacy stream: count, then (prefix, len, suffix, freq).
        let mut legacy = Vec::new();
        write_varint(&mut legacy, 2);
        write_varint(&mut legacy, 0);
        write_varint(&mut legacy, 5);
        legacy.extend_from_slice(b"alpha");
        write_varint(&mut legacy, 3);
        write_varint(&mut legacy, 5);
        write_varint(&mut legacy, 3);
        legacy.extend_from_slice(b"bet");
        write_varint(&mut legacy, 1);

        let table = StringTable::from_bytes(&legacy).unwrap();
        assert_eq!(table.string_for_index(0).unwrap(), "alpha");
        assert_eq!(table.string_for_index(1).unwrap(), "alphabet");
        assert_eq!(table.entries()[1].type_id, 1);
    }

    #[test]
    fn value_encode_decode_round_trip() {
        let values = vec![Value::from("foo"), Value::from("bar")];
        let table = table_from(&values);
        let nested = Value::map([
            ("name", Value::from("foo")),
            ("items", Value::List(vec![Value::from("bar"), Value::Int(2)])),
        ]);
        let encoded = table.encode_value(&nested).unwrap();
        assert_ne!(encoded, nested);
        assert_eq!(table.decode_value(&encoded).unwrap(), nested);
    }

    #[test]
    fn unknown_string_is_rejected_on_encode() {
        let table = table_from(&[Value::from("known")]);
        assert!(table.encode_value(&Value::from("unknown")).is_err());
    }

    proptest! {
        #[test]
        fn arbitrary_tables_round_trip(
            strings in prop::collection::vec("[a-z]{0,12}", 0..32),
        ) {
            let values: Vec<Value> = strings.iter().map(|s| Value::from(s.as_str())).collect();
            let table = table_from(&values);
            let bytes = table.to_bytes().unwrap();
            let parsed = StringTable::from_bytes(&bytes).unwrap();
            prop_assert_eq!(parsed, table);
        }
    }
}

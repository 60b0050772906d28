//! Key/value data section.
//!
//! Each entry is a `u32` length followed by a NUL-terminated UTF-8 key and
//! the value bytes, padded with zeros to a 4-byte boundary. The padding is
//! not counted in the entry length but is part of the section length.

use byteorder::{ByteOrder, LittleEndian};
use kiln_common::{align, BinaryReader};

use crate::{Error, Result};

/// One key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

impl KeyValue {
    /// Create an entry, rejecting empty keys and keys containing NUL.
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() || key.contains('\0') {
            return Err(Error::InvalidKey(key));
        }
        Ok(Self {
            key,
            value: value.into(),
        })
    }

    /// Length of key, terminator and value (without padding).
    pub fn byte_length(&self) -> usize {
        self.key.len() + 1 + self.value.len()
    }

    /// Value as text, without a trailing NUL if present.
    pub fn value_str(&self) -> Option<&str> {
        let bytes = self.value.strip_suffix(b"\0").unwrap_or(&self.value);
        std::str::from_utf8(bytes).ok()
    }
}

/// Parse a key/value data section.
pub fn parse_key_values(data: &[u8]) -> Result<Vec<KeyValue>> {
    let mut reader = BinaryReader::new(data);
    let mut entries = Vec::new();

    while reader.remaining() >= 4 {
        let length = reader.read_u32()? as usize;
        if length == 0 {
            // Trailing zero padding.
            break;
        }
        let mut entry = BinaryReader::new(reader.read_bytes(length)?);
        let key = entry.read_cstring().map_err(|e| match e {
            kiln_common::Error::MissingNullTerminator => {
                Error::malformed("key/value entry terminator", "NUL after key", "none")
            }
            other => other.into(),
        })?;
        entries.push(KeyValue {
            key: key.to_string(),
            value: entry.read_bytes(entry.remaining())?.to_vec(),
        });

        let pad = align::padding_for(length as u64, 4) as usize;
        reader.advance(pad.min(reader.remaining()));
    }

    Ok(entries)
}

/// Serialize entries sorted by key bytes, each padded to 4 bytes.
pub fn serialize_key_values(entries: &[KeyValue]) -> Vec<u8> {
    let mut sorted: Vec<&KeyValue> = entries.iter().collect();
    sorted.sort_by(|a, b| a.key.as_bytes().cmp(b.key.as_bytes()));

    let mut out = Vec::new();
    for entry in sorted {
        let length = entry.byte_length();
        let mut prefix = [0u8; 4];
        LittleEndian::write_u32(&mut prefix, length as u32);
        out.extend_from_slice(&prefix);
        out.extend_from_slice(entry.key.as_bytes());
        out.push(0);
        out.extend_from_slice(&entry.value);
        out.resize(out.len() + align::padding_for(length as u64, 4) as usize, 0);
    }
    out
}

/// Insert `entry`, replacing any entry with the same key.
pub fn upsert(entries: &mut Vec<KeyValue>, entry: KeyValue) {
    match entries.iter_mut().find(|e| e.key == entry.key) {
        Some(existing) => existing.value = entry.value,
        None => entries.push(entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_sorted_and_padded() {
        let entries = vec![
            KeyValue::new("b", vec![1, 2, 3]).unwrap(),
            KeyValue::new("KTXwriter", b"kiln\0".to_vec()).unwrap(),
        ];
        let bytes = serialize_key_values(&entries);
        assert_eq!(bytes.len() % 4, 0);

        let parsed = parse_key_values(&bytes).unwrap();
        assert_eq!(parsed[0].key, "KTXwriter");
        assert_eq!(parsed[0].value_str(), Some("kiln"));
        assert_eq!(parsed[1].key, "b");
        assert_eq!(parsed[1].value, vec![1, 2, 3]);
    }

    #[test]
    fn test_entry_layout() {
        let bytes = serialize_key_values(&[KeyValue::new("ab", vec![9]).unwrap()]);
        // length 4: "ab", NUL, one value byte; no padding needed.
        assert_eq!(bytes, vec![4, 0, 0, 0, b'a', b'b', 0, 9]);
    }

    #[test]
    fn test_binary_values_may_contain_nul() {
        let entry = KeyValue::new("k", vec![0, 0, 1, 0]).unwrap();
        let parsed = parse_key_values(&serialize_key_values(&[entry.clone()])).unwrap();
        assert_eq!(parsed, vec![entry]);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(KeyValue::new("", vec![]), Err(Error::InvalidKey(_))));
        assert!(matches!(KeyValue::new("a\0b", vec![]), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_missing_terminator() {
        let bytes = [3, 0, 0, 0, b'a', b'b', b'c', 0];
        assert!(matches!(
            parse_key_values(&bytes),
            Err(Error::MalformedContainer { .. })
        ));
    }

    #[test]
    fn test_truncated_entry() {
        let bytes = [16, 0, 0, 0, b'a', 0];
        assert!(parse_key_values(&bytes).is_err());
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let mut entries = vec![KeyValue::new("a", vec![1]).unwrap()];
        upsert(&mut entries, KeyValue::new("a", vec![2]).unwrap());
        upsert(&mut entries, KeyValue::new("b", vec![3]).unwrap());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].value, vec![2]);
    }
}

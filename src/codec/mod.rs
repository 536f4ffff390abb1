// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic, self-describing binary framing for protocol messages.
//!
//! A record is a concatenation of fields sorted by ascending numeric field id. Each field is
//! encoded as:
//!
//! ```text
//! field id : u32 little-endian
//! length   : u32 little-endian
//! value    : `length` bytes
//! ```
//!
//! Value encodings by declared type:
//! - `uint32`: 4 bytes little-endian
//! - `string`: UTF-8 bytes
//! - `bytes`: raw bytes
//! - `date`: UTF-8 of an ISO-8601 UTC string (millisecond precision)
//! - nested record: recursive encoding
//! - curve public key: 32 raw bytes
//!
//! Decoders skip unknown field ids and accept fields in any order, but encoders always emit
//! fields in ascending id order, so `encode(decode(bytes))` yields the canonical form of
//! `bytes` and `decode(encode(record))` round-trips exactly. Every record carries a `version`
//! field at id 0 which defaults to 1 when absent.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

mod record;

pub use record::{
    IdentityRecord, Message, MessageSigned, PreKeyBundle, PreKeyMessage, PreKeyRecord,
    SignedPreKeyRecord,
};

/// Field id of the record version shared by all record types.
const VERSION_FIELD: u32 = 0;

/// The only record version understood by this implementation.
const RECORD_VERSION: u32 = 1;

/// Serializer emitting fields in ascending id order.
pub(crate) struct FieldWriter {
    buf: Vec<u8>,
    last_id: Option<u32>,
}

impl FieldWriter {
    pub fn new() -> Self {
        let mut writer = Self {
            buf: Vec::new(),
            last_id: None,
        };
        writer.uint32(VERSION_FIELD, RECORD_VERSION);
        writer
    }

    pub fn uint32(&mut self, id: u32, value: u32) {
        self.field(id, &value.to_le_bytes());
    }

    pub fn bytes(&mut self, id: u32, value: &[u8]) {
        self.field(id, value);
    }

    pub fn key(&mut self, id: u32, value: &[u8; 32]) {
        self.field(id, value);
    }

    pub fn date(&mut self, id: u32, value: &DateTime<Utc>) {
        // Canonical ISO-8601 form with millisecond precision, e.g. "2026-08-02T09:15:04.201Z".
        let formatted = value.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        self.field(id, formatted.as_bytes());
    }

    pub fn record(&mut self, id: u32, value: &[u8]) {
        self.field(id, value);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn field(&mut self, id: u32, value: &[u8]) {
        debug_assert!(
            self.last_id.is_none_or(|last| id > last),
            "fields must be written in ascending id order"
        );
        self.last_id = Some(id);

        self.buf.extend_from_slice(&id.to_le_bytes());
        let len = u32::try_from(value.len()).expect("field values never exceed u32::MAX bytes");
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value);
    }
}

/// Deserializer over the raw fields of one record.
///
/// Parsing splits the input into fields up front; typed accessors then pull fields out by id.
/// Fields may arrive in any order, duplicates are rejected, unknown ids are ignored by the
/// record decoders.
pub(crate) struct FieldReader<'a> {
    record: &'static str,
    fields: BTreeMap<u32, &'a [u8]>,
}

impl<'a> FieldReader<'a> {
    pub fn parse(record: &'static str, mut bytes: &'a [u8]) -> Result<Self, CodecError> {
        let mut fields = BTreeMap::new();

        while !bytes.is_empty() {
            if bytes.len() < 8 {
                return Err(CodecError::UnexpectedEnd { record });
            }
            let id = u32::from_le_bytes(bytes[0..4].try_into().expect("slice of length 4"));
            let len = u32::from_le_bytes(bytes[4..8].try_into().expect("slice of length 4"));
            bytes = &bytes[8..];

            let len = len as usize;
            if bytes.len() < len {
                return Err(CodecError::UnexpectedEnd { record });
            }
            let (value, rest) = bytes.split_at(len);
            bytes = rest;

            if fields.insert(id, value).is_some() {
                return Err(CodecError::DuplicateField { record, id });
            }
        }

        let reader = Self { record, fields };
        reader.check_version()?;
        Ok(reader)
    }

    fn check_version(&self) -> Result<(), CodecError> {
        let version = match self.fields.get(&VERSION_FIELD) {
            Some(_) => self.uint32(VERSION_FIELD)?,
            None => RECORD_VERSION,
        };
        if version != RECORD_VERSION {
            return Err(CodecError::UnsupportedVersion {
                record: self.record,
                version,
            });
        }
        Ok(())
    }

    pub fn has(&self, id: u32) -> bool {
        self.fields.contains_key(&id)
    }

    fn require(&self, id: u32) -> Result<&'a [u8], CodecError> {
        self.fields.get(&id).copied().ok_or(CodecError::MissingField {
            record: self.record,
            id,
        })
    }

    fn fixed<const N: usize>(&self, id: u32) -> Result<[u8; N], CodecError> {
        let value = self.require(id)?;
        value
            .try_into()
            .map_err(|_| CodecError::InvalidFieldLength {
                record: self.record,
                id,
                expected: N,
                found: value.len(),
            })
    }

    pub fn uint32(&self, id: u32) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.fixed::<4>(id)?))
    }

    pub fn optional_uint32(&self, id: u32) -> Result<Option<u32>, CodecError> {
        match self.has(id) {
            true => Ok(Some(self.uint32(id)?)),
            false => Ok(None),
        }
    }

    pub fn key(&self, id: u32) -> Result<[u8; 32], CodecError> {
        self.fixed::<32>(id)
    }

    pub fn signature(&self, id: u32) -> Result<[u8; 64], CodecError> {
        self.fixed::<64>(id)
    }

    pub fn tag(&self, id: u32) -> Result<[u8; 32], CodecError> {
        self.fixed::<32>(id)
    }

    pub fn bytes(&self, id: u32) -> Result<&'a [u8], CodecError> {
        self.require(id)
    }

    pub fn date(&self, id: u32) -> Result<DateTime<Utc>, CodecError> {
        let value = self.require(id)?;
        let text = std::str::from_utf8(value).map_err(|_| CodecError::InvalidUtf8 {
            record: self.record,
            id,
        })?;
        let parsed =
            DateTime::parse_from_rfc3339(text).map_err(|_| CodecError::InvalidDate {
                record: self.record,
                id,
            })?;
        Ok(parsed.with_timezone(&Utc))
    }

    pub fn record(&self, id: u32) -> Result<&'a [u8], CodecError> {
        self.require(id)
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{record}: record ends mid-field")]
    UnexpectedEnd { record: &'static str },

    #[error("{record}: field {id} repeats")]
    DuplicateField { record: &'static str, id: u32 },

    #[error("{record}: required field {id} is missing")]
    MissingField { record: &'static str, id: u32 },

    #[error("{record}: field {id} has length {found}, expected {expected}")]
    InvalidFieldLength {
        record: &'static str,
        id: u32,
        expected: usize,
        found: usize,
    },

    #[error("{record}: field {id} is not valid utf-8")]
    InvalidUtf8 { record: &'static str, id: u32 },

    #[error("{record}: field {id} is not a valid iso-8601 date")]
    InvalidDate { record: &'static str, id: u32 },

    #[error("{record}: unsupported record version {version}")]
    UnsupportedVersion { record: &'static str, version: u32 },
}

#[cfg(test)]
mod tests {
    use super::{CodecError, FieldReader, FieldWriter};

    fn raw_field(id: u32, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn writer_emits_version_first() {
        let bytes = FieldWriter::new().finish();
        assert_eq!(bytes, raw_field(0, &1u32.to_le_bytes()));
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut writer = FieldWriter::new();
        writer.uint32(1, 7);
        let mut bytes = writer.finish();
        bytes.extend_from_slice(&raw_field(99, b"future extension"));

        let reader = FieldReader::parse("test", &bytes).unwrap();
        assert_eq!(reader.uint32(1).unwrap(), 7);
    }

    #[test]
    fn missing_version_defaults_to_one() {
        let bytes = raw_field(1, &7u32.to_le_bytes());
        let reader = FieldReader::parse("test", &bytes).unwrap();
        assert_eq!(reader.uint32(1).unwrap(), 7);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let bytes = raw_field(0, &2u32.to_le_bytes());
        assert!(matches!(
            FieldReader::parse("test", &bytes),
            Err(CodecError::UnsupportedVersion { version: 2, .. })
        ));
    }

    #[test]
    fn out_of_order_fields_are_accepted() {
        let mut bytes = raw_field(2, b"second");
        bytes.extend_from_slice(&raw_field(1, &7u32.to_le_bytes()));

        let reader = FieldReader::parse("test", &bytes).unwrap();
        assert_eq!(reader.uint32(1).unwrap(), 7);
        assert_eq!(reader.bytes(2).unwrap(), b"second");
    }

    #[test]
    fn truncated_field_is_rejected() {
        let mut writer = FieldWriter::new();
        writer.bytes(1, b"payload");
        let mut bytes = writer.finish();
        bytes.truncate(bytes.len() - 2);

        assert!(matches!(
            FieldReader::parse("test", &bytes),
            Err(CodecError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let mut bytes = raw_field(1, b"one");
        bytes.extend_from_slice(&raw_field(1, b"two"));

        assert!(matches!(
            FieldReader::parse("test", &bytes),
            Err(CodecError::DuplicateField { id: 1, .. })
        ));
    }

    #[test]
    fn wrong_length_uint32_is_rejected() {
        let bytes = raw_field(1, &[1, 2, 3]);
        let reader = FieldReader::parse("test", &bytes).unwrap();
        assert!(matches!(
            reader.uint32(1),
            Err(CodecError::InvalidFieldLength {
                id: 1,
                expected: 4,
                found: 3,
                ..
            })
        ));
    }
}

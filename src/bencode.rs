//! # Bencode Codec
//!
//! Bencode is the serialization format of `.torrent` files and tracker
//! responses. It has four data types:
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` |
//! | Byte string | `<length>:<bytes>` | `4:spam` |
//! | List | `l<items>e` | `l4:spami42ee` |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` |
//!
//! ## Canonical Form
//!
//! Dictionaries are stored in a `BTreeMap`, so keys always come out of the
//! decoder sorted by raw byte value, whatever order the source used. The
//! encoder walks that map, which makes `encode` canonical: this is what the
//! info-hash is computed over.

use crate::error::{Error, Result};

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use thiserror::Error;

use std::collections::BTreeMap;

// Maximum nesting of lists and dictionaries
const MAX_DEPTH: usize = 64;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer
    Integer(i64),
    /// A byte string, not necessarily UTF-8
    Bytes(Vec<u8>),
    /// An ordered list of values
    List(Vec<Value>),
    /// A dictionary keyed by byte strings, sorted by key
    Dict(BTreeMap<Vec<u8>, Value>),
}

/// Malformed bencode input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid bencode at offset {offset}: {reason}")]
pub struct BencodeError {
    /// Byte offset in the input where decoding failed
    pub offset: usize,
    /// What was wrong at that offset
    pub reason: &'static str,
}

impl Value {
    /// Builds a byte string value from a UTF-8 string.
    pub fn string(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }

    /// Returns a short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Bytes(_) => "byte string",
            Value::List(_) => "list",
            Value::Dict(_) => "dictionary",
        }
    }

    pub fn integer(&self) -> Result<i64> {
        match self {
            Value::Integer(i) => Ok(*i),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn bytes(&self) -> Result<&[u8]> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch("byte string", other)),
        }
    }

    /// Returns the byte string as UTF-8 text.
    pub fn str(&self) -> Result<&str> {
        std::str::from_utf8(self.bytes()?)
            .map_err(|_| Error::format("byte string is not valid UTF-8"))
    }

    pub fn list(&self) -> Result<&[Value]> {
        match self {
            Value::List(l) => Ok(l),
            other => Err(mismatch("list", other)),
        }
    }

    pub fn dict(&self) -> Result<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Ok(d),
            other => Err(mismatch("dictionary", other)),
        }
    }

    /// Looks up a key in a dictionary value.
    ///
    /// Returns `None` if the value is not a dictionary or the key is absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(d) => d.get(key.as_bytes()),
            _ => None,
        }
    }

    /// Looks up a key that must be present in a dictionary value.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.dict()?
            .get(key.as_bytes())
            .ok_or_else(|| Error::format(format!("missing key {:?}", key)))
    }
}

fn mismatch(expected: &str, found: &Value) -> Error {
    Error::format(format!("expected {}, found {}", expected, found.kind()))
}

/// Renders byte strings as (lossy) UTF-8 text so decoded values can be
/// printed as JSON.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            Value::List(l) => {
                let mut seq = serializer.serialize_seq(Some(l.len()))?;
                for item in l {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Dict(d) => {
                let mut map = serializer.serialize_map(Some(d.len()))?;
                for (k, v) in d {
                    map.serialize_entry(&String::from_utf8_lossy(k), v)?;
                }
                map.end()
            }
        }
    }
}

/// Decodes one value from the front of `input`.
///
/// Returns the value and the bytes left after it.
pub fn decode(input: &[u8]) -> Result<(Value, &[u8])> {
    let mut decoder = Decoder { data: input, pos: 0 };
    let value = decoder.value(0)?;
    Ok((value, &input[decoder.pos..]))
}

/// Decodes `input` as exactly one value, rejecting trailing bytes.
pub fn decode_exact(input: &[u8]) -> Result<Value> {
    let (value, rest) = decode(input)?;
    if !rest.is_empty() {
        return Err(BencodeError {
            offset: input.len() - rest.len(),
            reason: "trailing data after value",
        }
        .into());
    }
    Ok(value)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn fail<T>(&self, reason: &'static str) -> Result<T> {
        Err(BencodeError {
            offset: self.pos,
            reason,
        }
        .into())
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return self.fail("nesting too deep");
        }

        match self.peek() {
            Some(b'i') => self.integer(),
            Some(b'l') => self.list(depth),
            Some(b'd') => self.dict(depth),
            Some(b'0'..=b'9') => self.bytes().map(Value::Bytes),
            Some(_) => self.fail("unexpected character"),
            None => self.fail("unexpected end of input"),
        }
    }

    /// Scans up to `terminator` and returns the span before it, leaving the
    /// cursor on the terminator.
    fn span_until(&mut self, terminator: u8) -> Result<&'a [u8]> {
        let data = self.data;
        let start = self.pos;
        match data[start..].iter().position(|&b| b == terminator) {
            Some(len) => {
                self.pos = start + len;
                Ok(&data[start..start + len])
            }
            None => {
                self.pos = self.data.len();
                self.fail("unexpected end of input")
            }
        }
    }

    fn integer(&mut self) -> Result<Value> {
        // Skip 'i'
        self.pos += 1;
        let start = self.pos;
        let span = self.span_until(b'e')?;

        let digits = span.strip_prefix(b"-").unwrap_or(span);
        let valid = !digits.is_empty()
            && digits.iter().all(u8::is_ascii_digit)
            && (digits == b"0" || digits[0] != b'0')
            && span != b"-0";

        let value = if valid {
            std::str::from_utf8(span)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
        } else {
            None
        };

        match value {
            Some(i) => {
                // Skip 'e'
                self.pos += 1;
                Ok(Value::Integer(i))
            }
            None => Err(BencodeError {
                offset: start,
                reason: "invalid integer",
            }
            .into()),
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;
        let span = self.span_until(b':')?;

        let len = if !span.is_empty() && span.iter().all(u8::is_ascii_digit) {
            std::str::from_utf8(span)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
        } else {
            None
        };
        let len = match len {
            Some(len) => len,
            None => {
                return Err(BencodeError {
                    offset: start,
                    reason: "invalid string length",
                }
                .into())
            }
        };

        // Skip ':'
        self.pos += 1;
        if len > self.data.len() - self.pos {
            return self.fail("string length exceeds input");
        }

        let bytes = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;

        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value> {
        // Skip 'l'
        self.pos += 1;
        let mut list = Vec::new();

        loop {
            match self.peek() {
                Some(b'e') => break,
                Some(_) => list.push(self.value(depth + 1)?),
                None => return self.fail("unterminated list"),
            }
        }

        self.pos += 1;
        Ok(Value::List(list))
    }

    fn dict(&mut self, depth: usize) -> Result<Value> {
        // Skip 'd'
        self.pos += 1;
        let mut dict = BTreeMap::new();

        loop {
            match self.peek() {
                Some(b'e') => break,
                Some(b'0'..=b'9') => {
                    let key_offset = self.pos;
                    let key = self.bytes()?;
                    let value = self.value(depth + 1)?;
                    if dict.insert(key, value).is_some() {
                        return Err(BencodeError {
                            offset: key_offset,
                            reason: "duplicate dictionary key",
                        }
                        .into());
                    }
                }
                Some(_) => return self.fail("dictionary key must be a byte string"),
                None => return self.fail("unterminated dictionary"),
            }
        }

        self.pos += 1;
        Ok(Value::Dict(dict))
    }
}

/// Encodes a value in canonical bencode.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Integer(i) => {
            buf.push(b'i');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.push(b'e');
        }
        Value::Bytes(b) => encode_bytes(b, buf),
        Value::List(l) => {
            buf.push(b'l');
            for item in l {
                encode_into(item, buf);
            }
            buf.push(b'e');
        }
        Value::Dict(d) => {
            buf.push(b'd');
            // BTreeMap iterates in ascending key order
            for (k, v) in d {
                encode_bytes(k, buf);
                encode_into(v, buf);
            }
            buf.push(b'e');
        }
    }
}

fn encode_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(bytes);
}

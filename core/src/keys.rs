//! Order-preserving, prefix-free key encodings.
//!
//! Byte order of an encoded key equals the logical order of the value, and no
//! encoded value is a prefix of another, so composite keys such as
//! `term ‖ priority ‖ target` range-scan correctly.

use crate::error::{IndexError, Result};
use crate::Priority;

const STR_ESCAPE: u8 = 0x00;
const STR_ESCAPED_ZERO: u8 = 0xFF;
const STR_TERMINATOR: u8 = 0x01;

pub trait KeyCodec: Sized {
    fn encode_key(&self, out: &mut Vec<u8>);

    /// Decodes one value from the front of `bytes`, returning it with the
    /// number of bytes consumed.
    fn decode_key(bytes: &[u8]) -> Result<(Self, usize)>;

    fn to_key(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_key(&mut out);
        out
    }

    /// Decodes a value that must span all of `bytes`.
    fn from_key(bytes: &[u8]) -> Result<Self> {
        let (value, used) = Self::decode_key(bytes)?;
        if used != bytes.len() {
            return Err(IndexError::consistency(format!(
                "{} trailing bytes after key",
                bytes.len() - used
            )));
        }
        Ok(value)
    }
}

fn fixed8(bytes: &[u8]) -> Result<[u8; 8]> {
    bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| IndexError::consistency("truncated fixed-width key"))
}

impl KeyCodec for u64 {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<(Self, usize)> {
        Ok((u64::from_be_bytes(fixed8(bytes)?), 8))
    }
}

impl KeyCodec for Priority {
    fn encode_key(&self, out: &mut Vec<u8>) {
        // flipping the sign bit makes negative seconds sort before positive
        let biased = (self.0 as u64) ^ (1 << 63);
        out.extend_from_slice(&biased.to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<(Self, usize)> {
        let biased = u64::from_be_bytes(fixed8(bytes)?);
        Ok((Priority((biased ^ (1 << 63)) as i64), 8))
    }
}

impl KeyCodec for String {
    fn encode_key(&self, out: &mut Vec<u8>) {
        for &b in self.as_bytes() {
            if b == STR_ESCAPE {
                out.push(STR_ESCAPE);
                out.push(STR_ESCAPED_ZERO);
            } else {
                out.push(b);
            }
        }
        out.push(STR_ESCAPE);
        out.push(STR_TERMINATOR);
    }

    fn decode_key(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut raw = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b != STR_ESCAPE {
                raw.push(b);
                i += 1;
                continue;
            }
            match bytes.get(i + 1) {
                Some(&STR_TERMINATOR) => {
                    let s = String::from_utf8(raw)
                        .map_err(|_| IndexError::consistency("string key is not utf-8"))?;
                    return Ok((s, i + 2));
                }
                Some(&STR_ESCAPED_ZERO) => {
                    raw.push(0);
                    i += 2;
                }
                _ => return Err(IndexError::consistency("bad escape in string key")),
            }
        }
        Err(IndexError::consistency("unterminated string key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_order_matches_byte_order() {
        let mut keys: Vec<Vec<u8>> = [300u64, 2, 70_000, 1].iter().map(|v| v.to_key()).collect();
        keys.sort();
        let decoded: Vec<u64> = keys.iter().map(|k| u64::from_key(k).unwrap()).collect();
        assert_eq!(decoded, vec![1, 2, 300, 70_000]);
    }

    #[test]
    fn negative_priorities_sort_first() {
        assert!(Priority(-5).to_key() < Priority(0).to_key());
        assert!(Priority(0).to_key() < Priority(1_700_000_000).to_key());
        assert_eq!(Priority::from_key(&Priority(-5).to_key()).unwrap(), Priority(-5));
    }

    #[test]
    fn string_keys_are_prefix_free() {
        let short = "t:ab".to_string().to_key();
        let long = "t:abc".to_string().to_key();
        assert!(!long.starts_with(&short));
        assert!(short < long);
    }

    #[test]
    fn string_with_nul_survives() {
        let s = "a\0b".to_string();
        let mut key = s.to_key();
        key.extend_from_slice(&7u64.to_be_bytes());
        let (back, used) = String::decode_key(&key).unwrap();
        assert_eq!(back, s);
        assert_eq!(u64::from_key(&key[used..]).unwrap(), 7);
    }

    #[test]
    fn truncated_keys_are_rejected() {
        assert!(matches!(u64::from_key(&[1, 2, 3]), Err(IndexError::ConsistencyViolation(_))));
        assert!(String::from_key(b"abc").is_err());
    }
}

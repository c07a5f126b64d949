//! Extended attributes stored inline after the fixed record header.

use crate::error::{StoreError, StoreResult};
use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};

/// Largest value a single attribute may carry.
pub const MAX_ATTRIBUTE_VALUE_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(with = "value_bytes")]
    pub value: Bytes,
}

/// Ordered (name, value) list with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes {
    entries: Vec<Attribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|a| a.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.entries
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    /// Insert `name`, replacing the value in place when it already exists.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Bytes>) -> StoreResult<()> {
        let name = name.into();
        let value = value.into();
        if value.len() > MAX_ATTRIBUTE_VALUE_SIZE {
            return Err(StoreError::InvalidInput(format!(
                "attribute {name} value is {} bytes (max {MAX_ATTRIBUTE_VALUE_SIZE})",
                value.len()
            )));
        }
        match self.entries.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => self.entries.push(Attribute { name, value }),
        }
        Ok(())
    }

    /// Returns whether an attribute was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.entries.iter().position(|a| a.name == name) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|a| a.name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Bytes> {
        self.entries.iter().map(|a| &a.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.entries.iter()
    }

    /// Bytes occupied by the encoded block, including the leading count.
    pub fn encoded_len(&self) -> usize {
        4 + self
            .entries
            .iter()
            .map(|a| 8 + a.name.len() + a.value.len())
            .sum::<usize>()
    }

    pub(crate) fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.entries.len() as u32);
        for attr in &self.entries {
            buf.put_u32_le(attr.name.len() as u32);
            buf.put_u32_le(attr.value.len() as u32);
            buf.put_slice(attr.name.as_bytes());
            buf.put_slice(&attr.value);
        }
    }

    pub(crate) fn decode_from(buf: &mut impl Buf) -> StoreResult<Self> {
        let count = read_u32(buf, "attribute count")? as usize;
        let mut attrs = Attributes::new();
        for _ in 0..count {
            let key_len = read_u32(buf, "attribute key length")? as usize;
            let value_len = read_u32(buf, "attribute value length")? as usize;
            if value_len > MAX_ATTRIBUTE_VALUE_SIZE {
                return Err(StoreError::io(format!(
                    "attribute value length {value_len} exceeds {MAX_ATTRIBUTE_VALUE_SIZE}"
                )));
            }
            if buf.remaining() < key_len + value_len {
                return Err(StoreError::io("buffer too small for attribute data"));
            }
            let key = buf.copy_to_bytes(key_len);
            let name = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::io(format!("attribute name is not UTF-8: {e}")))?;
            let value = buf.copy_to_bytes(value_len);
            attrs.set(name, value)?;
        }
        Ok(attrs)
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn read_u32(buf: &mut impl Buf, what: &str) -> StoreResult<u32> {
    if buf.remaining() < 4 {
        return Err(StoreError::io(format!("buffer too small to read {what}")));
    }
    Ok(buf.get_u32_le())
}

mod value_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        Vec::<u8>::deserialize(d).map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut attrs = Attributes::new();
        attrs.set("user.a", b"1".to_vec()).unwrap();
        attrs.set("user.b", b"2".to_vec()).unwrap();
        attrs.set("user.a", b"3".to_vec()).unwrap();

        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.keys().collect::<Vec<_>>(), vec!["user.a", "user.b"]);
        assert_eq!(attrs.get("user.a").unwrap().as_ref(), b"3");
    }

    #[test]
    fn test_value_size_limit() {
        let mut attrs = Attributes::new();
        assert!(attrs.set("big", vec![0u8; MAX_ATTRIBUTE_VALUE_SIZE]).is_ok());
        assert!(matches!(
            attrs.set("bigger", vec![0u8; MAX_ATTRIBUTE_VALUE_SIZE + 1]),
            Err(StoreError::InvalidInput(_))
        ));
        assert!(!attrs.has("bigger"));
    }

    #[test]
    fn test_remove() {
        let mut attrs = Attributes::new();
        attrs.set("user.x", Bytes::from_static(b"x")).unwrap();
        assert!(attrs.remove("user.x"));
        assert!(!attrs.remove("user.x"));
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_decode_rejects_truncated_block() {
        let mut attrs = Attributes::new();
        attrs.set("user.name", Bytes::from_static(b"value")).unwrap();
        let mut buf = Vec::new();
        attrs.encode_into(&mut buf);
        assert_eq!(buf.len(), attrs.encoded_len());

        let truncated = &buf[..buf.len() - 2];
        let err = Attributes::decode_from(&mut &truncated[..]).unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
    }
}

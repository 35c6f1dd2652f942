//! Decodes the attribute list of an element into a typed record.

use std::fmt::Display;
use std::str::FromStr;

use serde::de::{self, DeserializeSeed, MapAccess, Visitor};
use serde::{Deserialize, forward_to_deserialize_any};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeserializeError {
    #[error("{0}")]
    Message(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("expected bool (0 or 1), got '{0}'")]
    ExpectedBool(String),
}

impl de::Error for DeserializeError {
    fn custom<T: Display>(msg: T) -> Self {
        DeserializeError::Message(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DeserializeError>;

pub fn from_attributes<'de, T>(attributes: &'de [(String, String)]) -> Result<T>
where
    T: Deserialize<'de>,
{
    T::deserialize(AttributeDeserializer { attributes })
}

struct AttributeDeserializer<'de> {
    attributes: &'de [(String, String)],
}

impl<'de> de::Deserializer<'de> for AttributeDeserializer<'de> {
    type Error = DeserializeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_map(AttributeMap {
            iter: self.attributes.iter(),
            value: None,
        })
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

struct AttributeMap<'de> {
    iter: std::slice::Iter<'de, (String, String)>,
    value: Option<&'de str>,
}

impl<'de> MapAccess<'de> for AttributeMap<'de> {
    type Error = DeserializeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(ValueDeserializer(key)).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        let value = self
            .value
            .take()
            .ok_or_else(|| DeserializeError::Message("attribute value without a name".to_string()))?;
        seed.deserialize(ValueDeserializer(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

/// A single attribute value.
struct ValueDeserializer<'de>(&'de str);

impl ValueDeserializer<'_> {
    fn parse<T: FromStr>(&self) -> Result<T> {
        self.0
            .trim()
            .parse()
            .map_err(|_| DeserializeError::InvalidNumber(self.0.to_string()))
    }
}

macro_rules! deserialize_number {
    ($($method:ident => $visit:ident,)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
                visitor.$visit(self.parse()?)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for ValueDeserializer<'de> {
    type Error = DeserializeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_borrowed_str(self.0)
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0.trim() {
            "0" | "false" => visitor.visit_bool(false),
            "1" | "true" => visitor.visit_bool(true),
            other => Err(DeserializeError::ExpectedBool(other.to_string())),
        }
    }

    deserialize_number! {
        deserialize_i8 => visit_i8,
        deserialize_i16 => visit_i16,
        deserialize_i32 => visit_i32,
        deserialize_i64 => visit_i64,
        deserialize_u8 => visit_u8,
        deserialize_u16 => visit_u16,
        deserialize_u32 => visit_u32,
        deserialize_u64 => visit_u64,
        deserialize_f32 => visit_f32,
        deserialize_f64 => visit_f64,
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_some(self)
    }

    forward_to_deserialize_any! {
        i128 u128 char str string bytes byte_buf unit unit_struct newtype_struct
        seq tuple tuple_struct map struct enum identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Record<'a> {
        index: usize,
        value: f64,
        #[serde(rename = "type")]
        kind: Option<&'a str>,
        #[serde(default)]
        selected: bool,
    }

    fn attrs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn typed_record() {
        let a = attrs(&[("index", "3"), ("name", "ignored"), ("value", "-1.25e-2"), ("selected", "1")]);
        let r: Record = from_attributes(&a).unwrap();
        assert_eq!(
            r,
            Record {
                index: 3,
                value: -0.0125,
                kind: None,
                selected: true
            }
        );
    }

    #[test]
    fn bad_number() {
        let a = attrs(&[("index", "x1"), ("value", "0")]);
        assert_eq!(
            from_attributes::<Record>(&a).unwrap_err(),
            DeserializeError::InvalidNumber("x1".to_string())
        );
    }

    #[test]
    fn missing_field() {
        let a = attrs(&[("index", "1")]);
        assert!(matches!(from_attributes::<Record>(&a), Err(DeserializeError::Message(_))));
    }
}

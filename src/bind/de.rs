// ==============================================================================
// Lenient deserializer over serde_json::Value
// ==============================================================================
//
// Struct parameters are built from a synthetic document in which most
// leaves are strings (query and form values) and some are typed (JSON
// bodies). This deserializer lets either shape land in numeric, boolean and
// string fields: unparsable values become zero instead of failing, the way
// scalar parameters are coerced.

use serde::{
    de::{
        self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor,
    },
    forward_to_deserialize_any,
};
use serde_json::{Value, map};

use super::BindError;

/// Deserializes `T` from `value`, coercing leaves leniently.
pub(crate) fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, BindError> {
    T::deserialize(Lenient(value))
}

/// Repeated keys arrive as arrays; scalar fields read the first element.
fn leaf(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    }
}

#[allow(clippy::cast_possible_truncation)] // Float-to-int truncation is the coercion policy.
fn lenient_i64(value: &Value) -> i64 {
    match leaf(value) {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or_default()
        }
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Same policy as `lenient_i64`.
fn lenient_u64(value: &Value) -> u64 {
    match leaf(value) {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or_default(),
        Value::String(s) => s.trim().parse::<u64>().unwrap_or_default(),
        Value::Bool(b) => u64::from(*b),
        _ => 0,
    }
}

fn lenient_f64(value: &Value) -> f64 {
    match leaf(value) {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or_default(),
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}

fn lenient_bool(value: &Value) -> bool {
    match leaf(value) {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "0" | "false" | "null" | "nil"
        ),
        _ => false,
    }
}

fn lenient_string(value: &Value) -> String {
    match leaf(value) {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

// ==============================================================================
// Deserializer
// ==============================================================================

struct Lenient<'a>(&'a Value);

// Narrow integers that do not fit their field degrade to zero like any other
// unparsable value.
macro_rules! lenient_int {
    ($($method:ident => $visit:ident($conv:ident $(as $ty:ty)?)),* $(,)?) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, Self::Error>
            where
                V: Visitor<'de>,
            {
                let value = $conv(self.0);
                $(let value = <$ty>::try_from(value).unwrap_or_default();)?
                visitor.$visit(value)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Lenient<'de> {
    type Error = BindError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(*b),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    visitor.visit_u64(u)
                } else if let Some(i) = n.as_i64() {
                    visitor.visit_i64(i)
                } else {
                    visitor.visit_f64(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => visitor.visit_str(s),
            Value::Array(items) => visitor.visit_seq(LenientSeq(items.iter())),
            Value::Object(members) => visitor.visit_map(LenientMap::new(Some(members.iter()))),
        }
    }

    fn deserialize_bool<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_bool(lenient_bool(self.0))
    }

    lenient_int! {
        deserialize_i8 => visit_i8(lenient_i64 as i8),
        deserialize_i16 => visit_i16(lenient_i64 as i16),
        deserialize_i32 => visit_i32(lenient_i64 as i32),
        deserialize_i64 => visit_i64(lenient_i64),
        deserialize_u8 => visit_u8(lenient_u64 as u8),
        deserialize_u16 => visit_u16(lenient_u64 as u16),
        deserialize_u32 => visit_u32(lenient_u64 as u32),
        deserialize_u64 => visit_u64(lenient_u64),
        deserialize_f32 => visit_f64(lenient_f64),
        deserialize_f64 => visit_f64(lenient_f64),
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_string(lenient_string(self.0))
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_string(lenient_string(self.0))
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Null => visitor.visit_none(),
            Value::String(s) if s.is_empty() => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Array(items) => visitor.visit_seq(LenientSeq(items.iter())),
            Value::Null => {
                let empty: &[Value] = &[];
                visitor.visit_seq(LenientSeq(empty.iter()))
            }
            single => visitor.visit_seq(LenientSeq(std::slice::from_ref(single).iter())),
        }
    }

    fn deserialize_tuple<V>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Object(members) => visitor.visit_map(LenientMap::new(Some(members.iter()))),
            Value::Null => visitor.visit_map(LenientMap::new(None)),
            other => Err(de::Error::invalid_type(unexpected(other), &visitor)),
        }
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match leaf(self.0) {
            Value::String(s) => visitor.visit_enum(s.as_str().into_deserializer()),
            other => de::Deserializer::deserialize_enum(other, name, variants, visitor)
                .map_err(|err| BindError::new(err.to_string())),
        }
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        i128 u128 char bytes byte_buf identifier
    }
}

fn unexpected(value: &Value) -> de::Unexpected<'_> {
    match value {
        Value::Null => de::Unexpected::Unit,
        Value::Bool(b) => de::Unexpected::Bool(*b),
        Value::Number(_) => de::Unexpected::Other("number"),
        Value::String(s) => de::Unexpected::Str(s),
        Value::Array(_) => de::Unexpected::Seq,
        Value::Object(_) => de::Unexpected::Map,
    }
}

// ==============================================================================
// Seq / Map access
// ==============================================================================

struct LenientSeq<'a>(std::slice::Iter<'a, Value>);

impl<'de> SeqAccess<'de> for LenientSeq<'de> {
    type Error = BindError;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>, Self::Error>
    where
        T: DeserializeSeed<'de>,
    {
        self.0
            .next()
            .map(|value| seed.deserialize(Lenient(value)))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.0.len())
    }
}

struct LenientMap<'a> {
    members: Option<map::Iter<'a>>,
    pending: Option<&'a Value>,
}

impl<'a> LenientMap<'a> {
    const fn new(members: Option<map::Iter<'a>>) -> Self {
        Self {
            members,
            pending: None,
        }
    }
}

impl<'de> MapAccess<'de> for LenientMap<'de> {
    type Error = BindError;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>, Self::Error>
    where
        K: DeserializeSeed<'de>,
    {
        match self.members.as_mut().and_then(Iterator::next) {
            Some((key, value)) => {
                self.pending = Some(value);
                seed.deserialize(key.as_str().into_deserializer()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value, Self::Error>
    where
        V: DeserializeSeed<'de>,
    {
        let value = self
            .pending
            .take()
            .ok_or_else(|| BindError::new("value requested before key"))?;
        seed.deserialize(Lenient(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.members.as_ref().map_or(0, ExactSizeIterator::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Profile {
        name: String,
        age: u32,
        score: f64,
        active: bool,
        #[serde(rename = "nick_name")]
        nick: Option<String>,
        tags: Vec<String>,
    }

    #[test]
    fn string_leaves_coerce_into_typed_fields() {
        let doc = json!({
            "name": "ada",
            "age": "36",
            "score": "9.5",
            "active": "1",
            "nick_name": "countess",
            "tags": ["a", "b"],
        });
        let profile: Profile = from_value(&doc).unwrap_or_default();
        assert_eq!(
            profile,
            Profile {
                name: "ada".to_owned(),
                age: 36,
                score: 9.5,
                active: true,
                nick: Some("countess".to_owned()),
                tags: vec!["a".to_owned(), "b".to_owned()],
            }
        );
    }

    #[test]
    fn unparsable_leaves_become_zero() {
        let doc = json!({ "age": "old", "score": "high", "active": "nil", "nick_name": "" });
        let profile: Profile = from_value(&doc).unwrap_or_default();
        assert_eq!(profile.age, 0);
        assert!(profile.score.abs() < f64::EPSILON);
        assert!(!profile.active);
        assert_eq!(profile.nick, None);
    }

    #[test]
    fn out_of_range_integers_become_zero() {
        #[derive(Debug, Default, Deserialize, PartialEq)]
        #[serde(default)]
        struct Narrow {
            n: i32,
            small: u8,
            tiny: i8,
        }
        let doc = json!({ "n": "99999999999", "small": "300", "tiny": -129 });
        assert_eq!(from_value::<Narrow>(&doc).ok(), Some(Narrow::default()));

        let doc = json!({ "n": "-2147483648", "small": "255", "tiny": "-128" });
        assert_eq!(
            from_value::<Narrow>(&doc).ok(),
            Some(Narrow {
                n: i32::MIN,
                small: u8::MAX,
                tiny: i8::MIN,
            })
        );
    }

    #[test]
    fn typed_json_leaves_pass_through() {
        let doc = json!({ "name": 7, "age": 41, "active": true, "tags": "solo" });
        let profile: Profile = from_value(&doc).unwrap_or_default();
        assert_eq!(profile.name, "7");
        assert_eq!(profile.age, 41);
        assert!(profile.active);
        assert_eq!(profile.tags, vec!["solo".to_owned()]);
    }

    #[test]
    fn repeated_keys_read_first_value_for_scalars() {
        let doc = json!({ "age": ["3", "4"] });
        let profile: Profile = from_value(&doc).unwrap_or_default();
        assert_eq!(profile.age, 3);
    }

    #[test]
    fn missing_required_fields_are_errors() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Strict {
            id: i64,
        }
        let err = from_value::<Strict>(&json!({})).err();
        assert!(err.is_some_and(|e| e.to_string().contains("missing field `id`")));
    }

    #[test]
    fn unit_enums_deserialize_from_strings() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(rename_all = "lowercase")]
        enum Color {
            Red,
            Blue,
        }
        assert_eq!(from_value::<Color>(&json!("blue")).ok(), Some(Color::Blue));
        assert!(from_value::<Color>(&json!("green")).is_err());
    }
}

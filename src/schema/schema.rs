use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{FieldValue, Record};

/// Declared kind of a field; fixes the codec for the field's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Enum,
    String,
    Bytes,
    StringSet,
    Timestamp,
}

/// Encoding used for a field's bitmap streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCodec {
    Boolean,
    Bsi,
    Mutex,
    Set,
}

impl FieldKind {
    /// Codec chosen at schema-setup time. Floats store their bit pattern and
    /// strings and bytes store translated key IDs, so all three ride the
    /// mutex or BSI encodings.
    pub fn codec(&self) -> FieldCodec {
        match self {
            FieldKind::Bool => FieldCodec::Boolean,
            FieldKind::Int | FieldKind::Float | FieldKind::Timestamp => FieldCodec::Bsi,
            FieldKind::Enum | FieldKind::String | FieldKind::Bytes => FieldCodec::Mutex,
            FieldKind::StringSet => FieldCodec::Set,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

/// Field layout for one record stream. `quantum` routes writes into
/// day-bucket views derived from the timestamp field; without it every
/// stream lands in the fixed standard view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
    pub timestamp_field: String,
    pub quantum: bool,
}

impl Schema {
    pub fn new(timestamp_field: &str) -> Self {
        Schema {
            fields: vec![Field {
                name: timestamp_field.to_string(),
                kind: FieldKind::Timestamp,
            }],
            timestamp_field: timestamp_field.to_string(),
            quantum: true,
        }
    }

    pub fn standard_views_only(mut self) -> Self {
        self.quantum = false;
        self
    }

    pub fn add_bool_field(self, name: &str) -> Self {
        self.add_field(name, FieldKind::Bool)
    }

    pub fn add_int_field(self, name: &str) -> Self {
        self.add_field(name, FieldKind::Int)
    }

    pub fn add_float_field(self, name: &str) -> Self {
        self.add_field(name, FieldKind::Float)
    }

    pub fn add_enum_field(self, name: &str) -> Self {
        self.add_field(name, FieldKind::Enum)
    }

    pub fn add_string_field(self, name: &str) -> Self {
        self.add_field(name, FieldKind::String)
    }

    pub fn add_bytes_field(self, name: &str) -> Self {
        self.add_field(name, FieldKind::Bytes)
    }

    pub fn add_string_set_field(self, name: &str) -> Self {
        self.add_field(name, FieldKind::StringSet)
    }

    fn add_field(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(Field {
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A usable schema names its timestamp field and declares it as one.
    pub fn validate(&self) -> Result<()> {
        match self.field(&self.timestamp_field) {
            Some(field) if field.kind == FieldKind::Timestamp => Ok(()),
            Some(field) => Err(Error::new(
                ErrorKind::Schema,
                format!(
                    "field `{}` is declared {:?}, not a timestamp",
                    field.name, field.kind
                ),
            )),
            None => Err(Error::new(
                ErrorKind::Schema,
                format!("schema has no timestamp field `{}`", self.timestamp_field),
            )),
        }
    }

    /// Build a typed record from a self-describing JSON object using the
    /// declared field kinds. Fields absent from the object stay absent;
    /// fields with the wrong shape are schema errors.
    pub fn record_from_json(&self, value: &serde_json::Value) -> Result<Record> {
        let object = value.as_object().ok_or_else(|| {
            Error::new(
                ErrorKind::Schema,
                "record must be a JSON object".to_string(),
            )
        })?;
        let mut record = Record::new();
        for field in &self.fields {
            let Some(raw) = object.get(&field.name) else {
                continue;
            };
            let value = json_field(field, raw)?;
            record.set(&field.name, value);
        }
        Ok(record)
    }
}

fn json_field(field: &Field, raw: &serde_json::Value) -> Result<FieldValue> {
    let mismatch = || {
        Error::new(
            ErrorKind::Schema,
            format!("field `{}` cannot hold {} as {:?}", field.name, raw, field.kind),
        )
    };
    match field.kind {
        FieldKind::Bool => raw.as_bool().map(FieldValue::Bool).ok_or_else(mismatch),
        FieldKind::Int | FieldKind::Enum => raw.as_i64().map(FieldValue::Int).ok_or_else(mismatch),
        FieldKind::Timestamp => raw.as_i64().map(FieldValue::Timestamp).ok_or_else(mismatch),
        FieldKind::Float => raw.as_f64().map(FieldValue::Float).ok_or_else(mismatch),
        FieldKind::String => raw
            .as_str()
            .map(|s| FieldValue::String(s.to_string()))
            .ok_or_else(mismatch),
        FieldKind::Bytes => raw
            .as_str()
            .map(|s| FieldValue::Bytes(s.as_bytes().to_vec()))
            .ok_or_else(mismatch),
        FieldKind::StringSet => {
            let list = raw.as_array().ok_or_else(mismatch)?;
            let mut values = Vec::with_capacity(list.len());
            for item in list {
                values.push(item.as_str().ok_or_else(mismatch)?.to_string());
            }
            Ok(FieldValue::StringSet(values))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new("ts")
            .add_bool_field("active")
            .add_int_field("age")
            .add_string_field("city")
            .add_string_set_field("tags")
    }

    #[test]
    fn codec_selection_is_fixed_per_kind() {
        assert_eq!(FieldKind::Bool.codec(), FieldCodec::Boolean);
        assert_eq!(FieldKind::Int.codec(), FieldCodec::Bsi);
        assert_eq!(FieldKind::Float.codec(), FieldCodec::Bsi);
        assert_eq!(FieldKind::Timestamp.codec(), FieldCodec::Bsi);
        assert_eq!(FieldKind::Enum.codec(), FieldCodec::Mutex);
        assert_eq!(FieldKind::String.codec(), FieldCodec::Mutex);
        assert_eq!(FieldKind::Bytes.codec(), FieldCodec::Mutex);
        assert_eq!(FieldKind::StringSet.codec(), FieldCodec::Set);
    }

    #[test]
    fn validate_requires_a_timestamp_field() {
        assert!(schema().validate().is_ok());

        let broken = Schema {
            fields: vec![Field {
                name: "ts".to_string(),
                kind: FieldKind::Int,
            }],
            timestamp_field: "ts".to_string(),
            quantum: true,
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn record_from_json_follows_declared_kinds() {
        let record = schema()
            .record_from_json(&json!({
                "ts": 1704110400000i64,
                "active": true,
                "age": 34,
                "city": "hanoi",
                "tags": ["a", "b"],
                "unknown": "ignored"
            }))
            .unwrap();

        assert_eq!(record.get("ts"), Some(&FieldValue::Timestamp(1704110400000)));
        assert_eq!(record.get("active"), Some(&FieldValue::Bool(true)));
        assert_eq!(record.get("age"), Some(&FieldValue::Int(34)));
        assert_eq!(
            record.get("city"),
            Some(&FieldValue::String("hanoi".to_string()))
        );
        assert_eq!(
            record.get("tags"),
            Some(&FieldValue::StringSet(vec![
                "a".to_string(),
                "b".to_string()
            ]))
        );
        assert_eq!(record.get("unknown"), None);
    }

    #[test]
    fn record_from_json_rejects_wrong_shapes() {
        assert!(schema().record_from_json(&json!({"age": "old"})).is_err());
        assert!(schema().record_from_json(&json!({"tags": [1, 2]})).is_err());
        assert!(schema().record_from_json(&json!("not an object")).is_err());
    }
}

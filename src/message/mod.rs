//! Record - the structured telemetry message.
//!
//! A `Record` is the decoded payload an envelope carries through the
//! pipeline: identity (uuid), timing, origin (logger, hostname, pid),
//! severity, a free-form payload string, and an ordered collection of
//! typed `Field`s. Field names are not unique; lookup by name returns the
//! first match or all matches.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Typed field value. Fields carry arrays; scalar constructors wrap
/// one-element arrays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Str(Vec<String>),
    Bytes(Vec<Vec<u8>>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
}

impl FieldValue {
    /// Number of elements in the value array.
    pub fn len(&self) -> usize {
        match self {
            FieldValue::Str(v) => v.len(),
            FieldValue::Bytes(v) => v.len(),
            FieldValue::Int(v) => v.len(),
            FieldValue::Float(v) => v.len(),
            FieldValue::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single named field on a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,

    /// Optional representation tag (e.g. a unit or encoding hint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub representation: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
            representation: None,
        }
    }

    pub fn with_representation(mut self, repr: impl Into<String>) -> Self {
        self.representation = Some(repr.into());
        self
    }
}

/// The structured telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub uuid: Uuid,

    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,

    #[serde(rename = "type")]
    pub msg_type: String,

    pub logger: String,
    pub hostname: String,
    pub severity: i32,
    pub pid: i32,
    pub env_version: String,
    pub payload: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
}

impl Record {
    /// Create a record stamped with a fresh uuid and the current time.
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or(0),
            msg_type: String::new(),
            logger: String::new(),
            hostname: String::new(),
            severity: 7,
            pid: std::process::id() as i32,
            env_version: String::new(),
            payload: String::new(),
            fields: Vec::new(),
        }
    }

    /// First field with the given name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The i-th field with the given name (0-based among same-named fields).
    pub fn field_nth(&self, name: &str, idx: usize) -> Option<&Field> {
        self.fields.iter().filter(|f| f.name == name).nth(idx)
    }

    /// All fields with the given name, in insertion order.
    pub fn fields_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> {
        self.fields.iter().filter(move |f| f.name == name)
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Append a one-element string field.
    pub fn add_str_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.add_field(Field::new(name, FieldValue::Str(vec![value.into()])));
    }

    /// Append a one-element integer field.
    pub fn add_int_field(&mut self, name: impl Into<String>, value: i64) {
        self.add_field(Field::new(name, FieldValue::Int(vec![value])));
    }

    /// Append a one-element float field.
    pub fn add_float_field(&mut self, name: impl Into<String>, value: f64) {
        self.add_field(Field::new(name, FieldValue::Float(vec![value])));
    }

    /// Append a one-element boolean field.
    pub fn add_bool_field(&mut self, name: impl Into<String>, value: bool) {
        self.add_field(Field::new(name, FieldValue::Bool(vec![value])));
    }

    /// Reset all content while keeping allocated field capacity.
    pub fn clear(&mut self) {
        self.uuid = Uuid::nil();
        self.timestamp = 0;
        self.msg_type.clear();
        self.logger.clear();
        self.hostname.clear();
        self.severity = 7;
        self.pid = 0;
        self.env_version.clear();
        self.payload.clear();
        self.fields.clear();
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

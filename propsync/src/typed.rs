//! Typed access to a mirror through an explicit schema.
//!
//! A schema lists `(field name, default, converter)` for one host. The
//! builder rejects malformed schemas up front; a [`TypedView`] then reads
//! raw strings from the mirror and converts them, falling back to the
//! field's default when the property is absent or does not convert.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::mirror::{ListenerError, ListenerId, Mirror};

/// Shape of a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Int,
    Bool,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Str => write!(f, "string"),
            ValueKind::Int => write!(f, "int"),
            ValueKind::Bool => write!(f, "bool"),
        }
    }
}

/// A converted property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl TypedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            TypedValue::Str(_) => ValueKind::Str,
            TypedValue::Int(_) => ValueKind::Int,
            TypedValue::Bool(_) => ValueKind::Bool,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TypedValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot convert {raw:?} to {kind}")]
pub struct ConvertError {
    pub raw: String,
    pub kind: ValueKind,
}

/// Raw string → typed value.
pub trait Converter: Send + Sync {
    fn kind(&self) -> ValueKind;
    fn convert(&self, raw: &str) -> Result<TypedValue, ConvertError>;

    fn reject(&self, raw: &str) -> ConvertError {
        ConvertError {
            raw: raw.into(),
            kind: self.kind(),
        }
    }
}

pub struct StringConverter;

impl Converter for StringConverter {
    fn kind(&self) -> ValueKind {
        ValueKind::Str
    }

    fn convert(&self, raw: &str) -> Result<TypedValue, ConvertError> {
        Ok(TypedValue::Str(raw.to_owned()))
    }
}

pub struct IntConverter;

impl Converter for IntConverter {
    fn kind(&self) -> ValueKind {
        ValueKind::Int
    }

    fn convert(&self, raw: &str) -> Result<TypedValue, ConvertError> {
        raw.trim()
            .parse()
            .map(TypedValue::Int)
            .map_err(|_| self.reject(raw))
    }
}

/// Accepts `true/false`, `yes/no`, `on/off` and `1/0`, case-insensitively.
pub struct BoolConverter;

impl Converter for BoolConverter {
    fn kind(&self) -> ValueKind {
        ValueKind::Bool
    }

    fn convert(&self, raw: &str) -> Result<TypedValue, ConvertError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(TypedValue::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(TypedValue::Bool(false)),
            _ => Err(self.reject(raw)),
        }
    }
}

/// Malformed schema, reported by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Schema has no fields")]
    NoFields,

    #[error("Schema host name is empty")]
    EmptyHost,

    #[error("Field name is empty")]
    EmptyFieldName,

    #[error("Duplicate field: {name}")]
    DuplicateField { name: String },

    #[error("Default of {name} is {found}, converter produces {expected}")]
    DefaultKindMismatch {
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

struct FieldSpec {
    name: String,
    default: TypedValue,
    converter: Arc<dyn Converter>,
}

/// Validated field list for one host.
pub struct PropertySchema {
    host: String,
    fields: Vec<FieldSpec>,
}

impl PropertySchema {
    pub fn builder(host: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            host: host.into(),
            fields: Vec::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Bind to a mirror.
    pub fn view(self, mirror: Arc<Mirror>) -> TypedView {
        TypedView {
            schema: Arc::new(self),
            mirror,
        }
    }
}

pub struct SchemaBuilder {
    host: String,
    fields: Vec<FieldSpec>,
}

impl SchemaBuilder {
    pub fn field(
        mut self,
        name: impl Into<String>,
        default: TypedValue,
        converter: impl Converter + 'static,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            default,
            converter: Arc::new(converter),
        });
        self
    }

    pub fn build(self) -> Result<PropertySchema, SchemaError> {
        if self.host.is_empty() {
            return Err(SchemaError::EmptyHost);
        }
        if self.fields.is_empty() {
            return Err(SchemaError::NoFields);
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(SchemaError::EmptyFieldName);
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    name: field.name.clone(),
                });
            }
            let expected = field.converter.kind();
            if field.default.kind() != expected {
                return Err(SchemaError::DefaultKindMismatch {
                    name: field.name.clone(),
                    expected,
                    found: field.default.kind(),
                });
            }
        }

        Ok(PropertySchema {
            host: self.host,
            fields: self.fields,
        })
    }

    /// Validate and bind in one step.
    pub fn build_view(self, mirror: Arc<Mirror>) -> Result<TypedView, SchemaError> {
        Ok(self.build()?.view(mirror))
    }
}

/// Typed reads over a mirror.
#[derive(Clone)]
pub struct TypedView {
    schema: Arc<PropertySchema>,
    mirror: Arc<Mirror>,
}

impl TypedView {
    /// Converted value of `name`, or its default. `None` for unknown fields.
    pub fn get(&self, name: &str) -> Option<TypedValue> {
        let field = self.schema.field(name)?;
        let raw = self.mirror.get(&self.schema.host, name);
        Some(resolve(field, raw.as_deref()))
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|v| v.as_str().map(str::to_owned))
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.as_int())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|v| v.as_bool())
    }

    /// Every field, converted or defaulted.
    pub fn values(&self) -> BTreeMap<String, TypedValue> {
        self.schema
            .fields
            .iter()
            .map(|f| {
                let raw = self.mirror.get(&self.schema.host, &f.name);
                (f.name.clone(), resolve(f, raw.as_deref()))
            })
            .collect()
    }

    /// Call `callback` with the new typed value whenever `name` changes.
    ///
    /// A deleted property reports its default.
    pub fn on_change<F>(&self, name: &str, mut callback: F) -> Option<ListenerId>
    where
        F: FnMut(TypedValue) -> Result<(), ListenerError> + Send + 'static,
    {
        self.schema.field(name)?;
        let schema = self.schema.clone();
        let name = name.to_owned();

        let (id, _) = self.mirror.register_listener(move |change| {
            if change.host != schema.host || change.property != name {
                return Ok(());
            }
            match schema.field(&name) {
                Some(field) => callback(resolve(field, change.new_value.as_deref())),
                None => Ok(()),
            }
        });
        Some(id)
    }
}

fn resolve(field: &FieldSpec, raw: Option<&str>) -> TypedValue {
    let Some(raw) = raw else {
        return field.default.clone();
    };
    match field.converter.convert(raw) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("{e} for field {}; using default", field.name);
            field.default.clone()
        }
    }
}

//! Typed fixed-width schema description.
//!
//! The per-table schema is a runtime-described record layout, not a struct
//! synthesised per table: a byte buffer plus an offset table computed from
//! `[(name, kind, width)]` is sufficient and keeps pack/unpack data-driven.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A field type. Every type has a fixed byte width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Type {
    Int,
    Float,
    Char(usize),
    Bool,
    /// Fixed-dimension packed-float array, used for spatial keys.
    Array(usize),
}

impl Type {
    pub fn size(&self) -> usize {
        match self {
            Type::Int => 4,
            Type::Float => 4,
            Type::Char(n) => *n,
            Type::Bool => 1,
            Type::Array(d) => d * 4,
        }
    }
}

/// A single scalar value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Float(f32),
    /// Already normalised (trailing zero/whitespace stripped) or not;
    /// comparisons always normalise, see [`Value::key_cmp`].
    Char(String),
    Bool(bool),
    Array(Vec<f32>),
}

impl Value {
    /// Strip the padding used when a CHAR value was stored fixed-width.
    pub fn normalize_char(s: &str) -> &str {
        s.trim_end_matches(['\0', ' '])
    }

    /// Ordering/equality that normalises CHAR padding, used by every index.
    pub fn key_cmp(&self, other: &Value) -> std::cmp::Ordering {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal),
            (Char(a), Char(b)) => Self::normalize_char(a).cmp(Self::normalize_char(b)),
            (Bool(a), Bool(b)) => a.cmp(b),
            _ => panic!("key_cmp on incompatible or non-orderable types"),
        }
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Char(s) => Type::Char(s.len()),
            Value::Bool(_) => Type::Bool,
            Value::Array(v) => Type::Array(v.len()),
        }
    }

    /// Parse a literal (as seen from the demo CLI or a loader) into a typed value.
    pub fn parse(literal: &str, typ: &Type) -> Result<Value> {
        Ok(match typ {
            Type::Int => Value::Int(
                literal
                    .parse()
                    .map_err(|_| Error::TypeMismatch(literal.to_owned()))?,
            ),
            Type::Float => Value::Float(
                literal
                    .parse()
                    .map_err(|_| Error::TypeMismatch(literal.to_owned()))?,
            ),
            Type::Char(n) => Value::Char(literal.chars().take(*n).collect()),
            Type::Bool => Value::Bool(
                literal
                    .parse()
                    .map_err(|_| Error::TypeMismatch(literal.to_owned()))?,
            ),
            Type::Array(d) => {
                let parts: Result<Vec<f32>> = literal
                    .split(';')
                    .map(|p| {
                        p.trim()
                            .parse::<f32>()
                            .map_err(|_| Error::TypeMismatch(literal.to_owned()))
                    })
                    .collect();
                let parts = parts?;
                if parts.len() != *d {
                    return Err(Error::TypeMismatch(literal.to_owned()));
                }
                Value::Array(parts)
            }
        })
    }
}

/// A column in a table.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Column {
    pub name: String,
    pub typ: Type,
}

impl Column {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}

/// Serializable description of a table's shape.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Schema {
    pub columns: Vec<Column>,
    pub key_field: String,
}

/// A wrapped table schema with precomputed offsets.
#[derive(Clone, Debug)]
pub struct TableSchema {
    schema: Schema,
    offsets: Vec<usize>,
    column_map: HashMap<String, usize>,
    record_size: usize,
}

impl TableSchema {
    pub fn new(schema: Schema) -> Result<Self> {
        if !schema.columns.iter().any(|c| c.name == schema.key_field) {
            return Err(Error::ColumnNotFound(schema.key_field.clone()));
        }

        let mut offset = 0;
        let mut offsets = Vec::with_capacity(schema.columns.len());
        for c in &schema.columns {
            offsets.push(offset);
            offset += c.typ.size();
        }
        let column_map = schema
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        Ok(Self {
            schema,
            offsets,
            column_map,
            record_size: offset,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.schema.columns
    }

    pub fn key_field(&self) -> &str {
        &self.schema.key_field
    }

    pub fn key_index(&self) -> usize {
        self.column_map[&self.schema.key_field]
    }

    pub fn key_type(&self) -> Type {
        self.schema.columns[self.key_index()].typ
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_map.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.column_map
            .get(name)
            .copied()
            .ok_or_else(|| Error::ColumnNotFound(name.to_owned()))
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        Ok(&self.schema.columns[self.column_index(name)?])
    }

    pub fn offset_of(&self, index: usize) -> usize {
        self.offsets[index]
    }

    /// Size in bytes of one packed record under this schema.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Append a field to this schema, returning a new schema. Used by the
    /// sequential-file primary index, which stores an extra trailing
    /// `active: BOOL` flag per record.
    pub fn with_extra_column(&self, column: Column) -> Result<Self> {
        let mut schema = self.schema.clone();
        schema.columns.push(column);
        Self::new(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableSchema {
        TableSchema::new(Schema {
            columns: vec![
                Column::new("id", Type::Int),
                Column::new("name", Type::Char(16)),
                Column::new("score", Type::Float),
            ],
            key_field: "id".to_owned(),
        })
        .unwrap()
    }

    #[test]
    fn offsets_and_record_size() {
        let schema = sample();
        assert_eq!(schema.offset_of(0), 0);
        assert_eq!(schema.offset_of(1), 4);
        assert_eq!(schema.offset_of(2), 20);
        assert_eq!(schema.record_size(), 24);
    }

    #[test]
    fn char_key_compare_ignores_padding() {
        let a = Value::Char("abc\0\0\0".to_owned());
        let b = Value::Char("abc".to_owned());
        assert_eq!(a.key_cmp(&b), std::cmp::Ordering::Equal);
    }

    #[test]
    fn missing_key_field_is_rejected() {
        let schema = Schema {
            columns: vec![Column::new("id", Type::Int)],
            key_field: "missing".to_owned(),
        };
        assert!(TableSchema::new(schema).is_err());
    }
}

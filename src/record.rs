//! Fixed-width record packing.
//!
//! Records carry no pointers and own their field values. A record's packed
//! form is deterministic and depends only on its [`TableSchema`]; the
//! all-zero buffer is reserved as the tombstone and is never a valid packed
//! record because every schema contains at least the key field and
//! `Type::Int`'s zero is a legitimate key — pages therefore never rely on
//! the buffer alone to mean "deleted", see [`crate::page::Page`].

use crate::error::{Error, Result};
use crate::schema::{Type, Value};

/// A tuple of typed field values matching some [`crate::schema::TableSchema`].
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub fields: Vec<Value>,
}

impl Record {
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, index: usize) -> &Value {
        &self.fields[index]
    }

    pub fn key(&self, key_index: usize) -> &Value {
        &self.fields[key_index]
    }

    /// Pack this record into `buf[offset..offset + schema.record_size()]`.
    pub fn pack_into(&self, buf: &mut [u8], offset: usize, columns: &[(Type, usize)]) -> Result<()> {
        if self.fields.len() != columns.len() {
            return Err(Error::FieldCountMismatch(self.fields.len(), columns.len()));
        }
        for (value, (typ, field_offset)) in self.fields.iter().zip(columns) {
            let start = offset + field_offset;
            let slot = &mut buf[start..start + typ.size()];
            match (value, typ) {
                (Value::Int(v), Type::Int) => slot.copy_from_slice(&v.to_le_bytes()),
                (Value::Float(v), Type::Float) => slot.copy_from_slice(&v.to_le_bytes()),
                (Value::Bool(v), Type::Bool) => slot[0] = *v as u8,
                (Value::Char(s), Type::Char(n)) => {
                    let bytes = s.as_bytes();
                    let take = bytes.len().min(*n);
                    slot[..take].copy_from_slice(&bytes[..take]);
                    slot[take..].fill(0);
                }
                (Value::Array(v), Type::Array(d)) => {
                    if v.len() != *d {
                        return Err(Error::TypeMismatch("array dimension mismatch".into()));
                    }
                    for (i, f) in v.iter().enumerate() {
                        slot[i * 4..i * 4 + 4].copy_from_slice(&f.to_le_bytes());
                    }
                }
                _ => return Err(Error::TypeMismatch("field/type mismatch".into())),
            }
        }
        Ok(())
    }

    /// Unpack a record from `buf[offset..offset + record_size]`.
    pub fn unpack_from(buf: &[u8], offset: usize, columns: &[(Type, usize)]) -> Self {
        let mut fields = Vec::with_capacity(columns.len());
        for (typ, field_offset) in columns {
            let start = offset + field_offset;
            let slot = &buf[start..start + typ.size()];
            let value = match typ {
                Type::Int => Value::Int(i32::from_le_bytes(slot.try_into().unwrap())),
                Type::Float => Value::Float(f32::from_le_bytes(slot.try_into().unwrap())),
                Type::Bool => Value::Bool(slot[0] != 0),
                Type::Char(_) => {
                    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
                    Value::Char(String::from_utf8_lossy(&slot[..end]).into_owned())
                }
                Type::Array(d) => {
                    let mut v = Vec::with_capacity(*d);
                    for i in 0..*d {
                        v.push(f32::from_le_bytes(slot[i * 4..i * 4 + 4].try_into().unwrap()));
                    }
                    Value::Array(v)
                }
            };
            fields.push(value);
        }
        Record { fields }
    }
}

/// Helper bundling `(Type, byte_offset)` per column, precomputed once per
/// schema so pack/unpack don't recompute offsets per record.
pub fn column_layout(columns: &[crate::schema::Column]) -> Vec<(Type, usize)> {
    let mut offset = 0;
    columns
        .iter()
        .map(|c| {
            let entry = (c.typ, offset);
            offset += c.typ.size();
            entry
        })
        .collect()
}

/// `(secondary_value, primary_key)`, the payload of every unclustered
/// secondary index.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexRecord {
    pub value: Value,
    pub primary_key: i32,
}

impl IndexRecord {
    pub fn new(value: Value, primary_key: i32) -> Self {
        Self { value, primary_key }
    }

    pub fn layout(value_type: Type) -> Vec<(Type, usize)> {
        vec![(value_type, 0), (Type::Int, value_type.size())]
    }

    pub fn size(value_type: Type) -> usize {
        value_type.size() + Type::Int.size()
    }

    pub fn pack_into(&self, buf: &mut [u8], offset: usize, value_type: Type) -> Result<()> {
        let layout = Self::layout(value_type);
        let record = Record::new(vec![self.value.clone(), Value::Int(self.primary_key)]);
        record.pack_into(buf, offset, &layout)
    }

    pub fn unpack_from(buf: &[u8], offset: usize, value_type: Type) -> Self {
        let layout = Self::layout(value_type);
        let record = Record::unpack_from(buf, offset, &layout);
        let primary_key = match &record.fields[1] {
            Value::Int(v) => *v,
            _ => unreachable!(),
        };
        Self {
            value: record.fields[0].clone(),
            primary_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    #[test]
    fn record_round_trips_through_pack_unpack() {
        let columns = vec![
            Column::new("id", Type::Int),
            Column::new("name", Type::Char(8)),
            Column::new("score", Type::Float),
        ];
        let layout = column_layout(&columns);
        let record = Record::new(vec![
            Value::Int(42),
            Value::Char("hi".to_owned()),
            Value::Float(3.5),
        ]);

        let mut buf = vec![0u8; 16];
        record.pack_into(&mut buf, 0, &layout).unwrap();
        let back = Record::unpack_from(&buf, 0, &layout);
        assert_eq!(record, back);
    }

    #[test]
    fn index_record_round_trips() {
        let ir = IndexRecord::new(Value::Int(7), 99);
        let mut buf = vec![0u8; IndexRecord::size(Type::Int)];
        ir.pack_into(&mut buf, 0, Type::Int).unwrap();
        let back = IndexRecord::unpack_from(&buf, 0, Type::Int);
        assert_eq!(ir, back);
    }

    #[test]
    fn field_count_mismatch_is_an_error() {
        let columns = vec![Column::new("id", Type::Int)];
        let layout = column_layout(&columns);
        let record = Record::new(vec![Value::Int(1), Value::Int(2)]);
        let mut buf = vec![0u8; 8];
        assert!(record.pack_into(&mut buf, 0, &layout).is_err());
    }
}

//! `DatabaseManager`: the coordinator that keeps one primary index and zero
//! or more secondary indexes in agreement for each table (§4.7).
//!
//! Per the shared-resource policy (§5), no index handle is held across
//! calls: every public method re-derives the table's directory layout from
//! `_metadata.json` and builds fresh index objects for the duration of the
//! call.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{PrimaryKind, SecondaryKind};
use crate::error::{Error, Result};
use crate::perf::{IndexMetrics, OperationResult};
use crate::primary::bptree::{default_order as primary_default_order, ClusteredBPlusTree};
use crate::primary::isam::{IsamOptions, IsamPrimaryIndex};
use crate::primary::seqfile::{SeqFileOptions, SequentialFilePrimaryIndex};
use crate::primary::PrimaryIndex;
use crate::record::{IndexRecord, Record};
use crate::schema::{Schema, TableSchema, Type, Value};
use crate::secondary::bptree::{default_order as secondary_default_order, UnclusteredBPlusTree};
use crate::secondary::fulltext::InvertedTextIndex;
use crate::secondary::hash::ExtendibleHashIndex;
use crate::secondary::multimedia::MultimediaIndex;
use crate::secondary::rtree::RTreeIndex;
use crate::secondary::SecondaryIndex;

const METADATA_FILE: &str = "_metadata.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct TableMeta {
    primary_type: PrimaryKind,
    schema: Schema,
    secondary_indexes: HashMap<String, SecondaryKind>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct DatabaseMetadata {
    tables: HashMap<String, TableMeta>,
}

pub struct DatabaseManager {
    base: PathBuf,
    metadata: DatabaseMetadata,
}

fn primary_kind_name(kind: PrimaryKind) -> &'static str {
    match kind {
        PrimaryKind::Isam => "isam",
        PrimaryKind::Sequential => "sequential",
        PrimaryKind::Btree => "btree",
    }
}

fn secondary_kind_name(kind: SecondaryKind) -> &'static str {
    match kind {
        SecondaryKind::Btree => "btree",
        SecondaryKind::Hash => "hash",
        SecondaryKind::Rtree => "rtree",
        SecondaryKind::Fulltext => "fulltext",
        SecondaryKind::Multimedia => "multimedia",
    }
}

/// Whether a field of type `typ` can carry a secondary index of `kind`.
fn type_compatible(kind: SecondaryKind, typ: Type) -> bool {
    match kind {
        SecondaryKind::Btree => !matches!(typ, Type::Array(_)),
        SecondaryKind::Hash => true,
        SecondaryKind::Rtree | SecondaryKind::Multimedia => matches!(typ, Type::Array(_)),
        SecondaryKind::Fulltext => matches!(typ, Type::Char(_)),
    }
}

fn metrics_of<T>(r: &OperationResult<T>) -> IndexMetrics {
    IndexMetrics { reads: r.disk_reads, writes: r.disk_writes, time_ms: r.execution_time_ms }
}

fn combine<T>(data: T, rebuild_triggered: bool, breakdown: HashMap<String, IndexMetrics>) -> OperationResult<T> {
    let disk_reads = breakdown.values().map(|m| m.reads).sum();
    let disk_writes = breakdown.values().map(|m| m.writes).sum();
    let execution_time_ms = breakdown.values().map(|m| m.time_ms).sum();
    OperationResult {
        data,
        execution_time_ms,
        disk_reads,
        disk_writes,
        rebuild_triggered,
        operation_breakdown: breakdown,
    }
}

impl DatabaseManager {
    pub fn open(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        let metadata_path = base.join(METADATA_FILE);
        let metadata = if metadata_path.exists() {
            serde_json::from_slice(&fs::read(&metadata_path)?)?
        } else {
            DatabaseMetadata::default()
        };
        Ok(Self { base, metadata })
    }

    fn save_metadata(&self) -> Result<()> {
        fs::write(self.base.join(METADATA_FILE), serde_json::to_vec_pretty(&self.metadata)?)?;
        Ok(())
    }

    /// The schema a table was created with, for callers (the demo CLI, a
    /// loader) that need to parse literals into typed values.
    pub fn schema(&self, table: &str) -> Result<TableSchema> {
        TableSchema::new(self.table_meta(table)?.schema.clone())
    }

    fn table_meta(&self, table: &str) -> Result<&TableMeta> {
        self.metadata.tables.get(table).ok_or_else(|| Error::TableNotFound(table.to_owned()))
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.base.join(table)
    }

    fn primary_dir(&self, table: &str, meta: &TableMeta) -> Result<PathBuf> {
        let schema = TableSchema::new(meta.schema.clone())?;
        Ok(self
            .table_dir(table)
            .join(format!("primary_{}_{}", primary_kind_name(meta.primary_type), schema.key_field())))
    }

    fn secondary_dir(&self, table: &str, field: &str, kind: SecondaryKind) -> PathBuf {
        self.table_dir(table).join(format!("secondary_{}_{}", secondary_kind_name(kind), field))
    }

    fn open_primary(&self, table: &str) -> Result<(TableSchema, Box<dyn PrimaryIndex>)> {
        let meta = self.table_meta(table)?;
        let schema = TableSchema::new(meta.schema.clone())?;
        let dir = self.primary_dir(table, meta)?;
        let index: Box<dyn PrimaryIndex> = match meta.primary_type {
            PrimaryKind::Isam => Box::new(IsamPrimaryIndex::new(&dir, schema.clone(), IsamOptions::default())?),
            PrimaryKind::Sequential => {
                Box::new(SequentialFilePrimaryIndex::new(&dir, schema.clone(), SeqFileOptions::default())?)
            }
            PrimaryKind::Btree => {
                fs::create_dir_all(&dir)?;
                Box::new(ClusteredBPlusTree::new(dir.join("btree_clustered.dat"), schema.clone(), primary_default_order()))
            }
        };
        Ok((schema, index))
    }

    /// Open the secondary index on `field`, for the kinds that share the
    /// uniform `(value, primary_key)` contract (everything but fulltext).
    fn open_secondary(&self, table: &str, field: &str) -> Result<(SecondaryKind, Box<dyn SecondaryIndex>)> {
        let meta = self.table_meta(table)?;
        let kind = *meta
            .secondary_indexes
            .get(field)
            .ok_or_else(|| Error::IndexNotFound(field.to_owned()))?;
        let schema = TableSchema::new(meta.schema.clone())?;
        let value_type = schema.column(field)?.typ;
        let dir = self.secondary_dir(table, field, kind);
        fs::create_dir_all(&dir)?;
        let index: Box<dyn SecondaryIndex> = match kind {
            SecondaryKind::Btree => Box::new(UnclusteredBPlusTree::new(
                dir.join("btree_unclustered.dat"),
                value_type,
                secondary_default_order(),
            )),
            SecondaryKind::Hash => Box::new(ExtendibleHashIndex::new(&dir, "datos", value_type)),
            SecondaryKind::Rtree => {
                let dim = match value_type {
                    Type::Array(d) => d,
                    _ => return Err(Error::SchemaMismatch(field.to_owned(), kind)),
                };
                Box::new(RTreeIndex::new(dir.join("rtree.dat"), dim))
            }
            SecondaryKind::Fulltext | SecondaryKind::Multimedia => {
                return Err(Error::UnsupportedSecondaryIndex(kind));
            }
        };
        Ok((kind, index))
    }

    fn open_fulltext(&self, table: &str, field: &str) -> Result<InvertedTextIndex> {
        let meta = self.table_meta(table)?;
        let kind = *meta.secondary_indexes.get(field).ok_or_else(|| Error::IndexNotFound(field.to_owned()))?;
        if kind != SecondaryKind::Fulltext {
            return Err(Error::UnsupportedSecondaryIndex(kind));
        }
        let dir = self.secondary_dir(table, field, kind);
        fs::create_dir_all(&dir)?;
        Ok(InvertedTextIndex::new(dir.join("postings.json")))
    }

    fn secondary_kind(&self, table: &str, field: &str) -> Result<SecondaryKind> {
        let meta = self.table_meta(table)?;
        meta.secondary_indexes.get(field).copied().ok_or_else(|| Error::IndexNotFound(field.to_owned()))
    }

    fn open_multimedia(&self, table: &str, field: &str) -> Result<MultimediaIndex> {
        let meta = self.table_meta(table)?;
        let kind = *meta.secondary_indexes.get(field).ok_or_else(|| Error::IndexNotFound(field.to_owned()))?;
        if kind != SecondaryKind::Multimedia {
            return Err(Error::UnsupportedSecondaryIndex(kind));
        }
        let schema = TableSchema::new(meta.schema.clone())?;
        let dim = match schema.column(field)?.typ {
            Type::Array(d) => d,
            _ => return Err(Error::SchemaMismatch(field.to_owned(), kind)),
        };
        let dir = self.secondary_dir(table, field, kind);
        fs::create_dir_all(&dir)?;
        Ok(MultimediaIndex::new(dir.join("descriptors.dat"), dim))
    }

    /// Every field with a uniform-contract secondary index (excludes
    /// fulltext and multimedia, which the insert/delete paths skip per §4.7).
    fn indexed_fields(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .table_meta(table)?
            .secondary_indexes
            .iter()
            .filter(|(_, k)| !matches!(k, SecondaryKind::Fulltext | SecondaryKind::Multimedia))
            .map(|(f, _)| f.clone())
            .collect())
    }

    pub fn create_table(&mut self, table: &str, schema: Schema, primary: PrimaryKind) -> Result<()> {
        if self.metadata.tables.contains_key(table) {
            return Err(Error::TableExists(table.to_owned()));
        }
        TableSchema::new(schema.clone())?;
        fs::create_dir_all(self.table_dir(table))?;
        self.metadata.tables.insert(
            table.to_owned(),
            TableMeta { primary_type: primary, schema, secondary_indexes: HashMap::new() },
        );
        self.save_metadata()
    }

    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        self.table_meta(table)?;
        let dir = self.table_dir(table);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        self.metadata.tables.remove(table);
        self.save_metadata()
    }

    /// Allocate a new secondary index and backfill it from the primary's
    /// current contents. On failure the partially-built index directory is
    /// removed and the metadata change is not persisted.
    pub fn create_index(&mut self, table: &str, field: &str, kind: SecondaryKind) -> Result<()> {
        let meta = self.table_meta(table)?.clone();
        let schema = TableSchema::new(meta.schema.clone())?;
        if field == schema.key_field() {
            return Err(Error::SecondaryOnPrimaryKey(field.to_owned()));
        }
        if meta.secondary_indexes.contains_key(field) {
            return Err(Error::IndexExists(field.to_owned()));
        }
        let column = schema.column(field)?;
        if !type_compatible(kind, column.typ) {
            return Err(Error::SchemaMismatch(field.to_owned(), kind));
        }

        self.metadata.tables.get_mut(table).unwrap().secondary_indexes.insert(field.to_owned(), kind);

        if let Err(e) = self.backfill_index(table, field, kind) {
            self.metadata.tables.get_mut(table).unwrap().secondary_indexes.remove(field);
            let dir = self.secondary_dir(table, field, kind);
            let _ = fs::remove_dir_all(dir);
            return Err(e);
        }

        self.save_metadata()
    }

    fn backfill_index(&self, table: &str, field: &str, kind: SecondaryKind) -> Result<()> {
        let (schema, mut primary) = self.open_primary(table)?;
        let field_index = schema.column_index(field)?;
        let records = primary.scan_all()?.data;

        match kind {
            SecondaryKind::Fulltext => {
                let index = self.open_fulltext(table, field)?;
                for record in &records {
                    let text = match record.get(field_index) {
                        Value::Char(s) => s.clone(),
                        _ => return Err(Error::SchemaMismatch(field.to_owned(), kind)),
                    };
                    let pk = match record.key(schema.key_index()) {
                        Value::Int(v) => *v,
                        _ => return Err(Error::TypeMismatch(schema.key_field().to_owned())),
                    };
                    index.index_document(pk, &text)?;
                }
            }
            SecondaryKind::Multimedia => {
                let index = self.open_multimedia(table, field)?;
                for record in &records {
                    let descriptor = match record.get(field_index) {
                        Value::Array(v) => v.clone(),
                        _ => return Err(Error::SchemaMismatch(field.to_owned(), kind)),
                    };
                    let pk = match record.key(schema.key_index()) {
                        Value::Int(v) => *v,
                        _ => return Err(Error::TypeMismatch(schema.key_field().to_owned())),
                    };
                    index.index_vector(pk, descriptor)?;
                }
            }
            _ => {
                let (_, mut index) = self.open_secondary(table, field)?;
                for record in &records {
                    let pk = match record.key(schema.key_index()) {
                        Value::Int(v) => *v,
                        _ => return Err(Error::TypeMismatch(schema.key_field().to_owned())),
                    };
                    index.insert(IndexRecord::new(record.get(field_index).clone(), pk))?;
                }
            }
        }
        Ok(())
    }

    pub fn drop_index(&mut self, table: &str, field: &str) -> Result<()> {
        let meta = self.table_meta(table)?;
        let kind = *meta.secondary_indexes.get(field).ok_or_else(|| Error::IndexNotFound(field.to_owned()))?;
        let dir = self.secondary_dir(table, field, kind);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        self.metadata.tables.get_mut(table).unwrap().secondary_indexes.remove(field);
        self.save_metadata()
    }

    /// Insert `record`. On a duplicate primary key, returns `data = false`
    /// and only the primary's cost; secondary indexes are left untouched.
    pub fn insert(&mut self, table: &str, record: Record) -> Result<OperationResult<bool>> {
        let (schema, mut primary) = self.open_primary(table)?;
        let primary_result = primary.insert(record.clone())?;
        let mut breakdown = HashMap::new();
        let rebuilt = primary_result.rebuild_triggered;
        breakdown.insert("primary_metrics".to_owned(), metrics_of(&primary_result));

        if !primary_result.data {
            return Ok(combine(false, rebuilt, breakdown));
        }

        let key_index = schema.key_index();
        let pk = match record.key(key_index) {
            Value::Int(v) => *v,
            _ => return Err(Error::TypeMismatch(schema.key_field().to_owned())),
        };

        let mut rebuild_triggered = rebuilt;
        for field in self.indexed_fields(table)? {
            let field_index = schema.column_index(&field)?;
            let (_, mut secondary) = self.open_secondary(table, &field)?;
            let value = record.get(field_index).clone();
            let result = secondary.insert(IndexRecord::new(value, pk))?;
            rebuild_triggered |= result.rebuild_triggered;
            breakdown.insert(format!("secondary_metrics_{field}"), metrics_of(&result));
        }

        Ok(combine(true, rebuild_triggered, breakdown))
    }

    /// Delete by primary key: fetches the record first so every secondary
    /// index can be told which `(value, pk)` pair to drop.
    pub fn delete(&mut self, table: &str, key: &Value) -> Result<OperationResult<bool>> {
        let (schema, mut primary) = self.open_primary(table)?;
        let fetch = primary.search(key)?;
        let mut breakdown = HashMap::new();
        breakdown.insert("primary_metrics".to_owned(), metrics_of(&fetch));

        let Some(record) = fetch.data else {
            return Ok(combine(false, fetch.rebuild_triggered, breakdown));
        };

        let pk = match record.key(schema.key_index()) {
            Value::Int(v) => *v,
            _ => return Err(Error::TypeMismatch(schema.key_field().to_owned())),
        };

        let mut rebuild_triggered = fetch.rebuild_triggered;
        for field in self.indexed_fields(table)? {
            let field_index = schema.column_index(&field)?;
            let (_, mut secondary) = self.open_secondary(table, &field)?;
            let value = record.get(field_index).clone();
            let result = secondary.delete_one(&value, pk)?;
            rebuild_triggered |= result.rebuild_triggered;
            breakdown.insert(format!("secondary_metrics_{field}"), metrics_of(&result));
        }

        let delete_result = primary.delete(key)?;
        rebuild_triggered |= delete_result.rebuild_triggered;
        *breakdown.get_mut("primary_metrics").unwrap() = metrics_of(&delete_result);

        Ok(combine(delete_result.data, rebuild_triggered, breakdown))
    }

    /// Delete every record whose `field` equals `value`. If `field` carries a
    /// secondary index, uses its multi-delete; otherwise falls back to a full
    /// scan. Returns the primary keys actually removed.
    pub fn delete_by_field(&mut self, table: &str, field: &str, value: &Value) -> Result<OperationResult<Vec<i32>>> {
        let meta = self.table_meta(table)?;
        let schema = TableSchema::new(meta.schema.clone())?;
        if field == schema.key_field() {
            let key_deleted = self.delete(table, value)?;
            let pk = match value {
                Value::Int(v) => *v,
                _ => return Err(Error::TypeMismatch(field.to_owned())),
            };
            let data = if key_deleted.data { vec![pk] } else { vec![] };
            return Ok(OperationResult {
                data,
                execution_time_ms: key_deleted.execution_time_ms,
                disk_reads: key_deleted.disk_reads,
                disk_writes: key_deleted.disk_writes,
                rebuild_triggered: key_deleted.rebuild_triggered,
                operation_breakdown: key_deleted.operation_breakdown,
            });
        }

        let has_index = meta.secondary_indexes.contains_key(field)
            && !matches!(meta.secondary_indexes[field], SecondaryKind::Fulltext | SecondaryKind::Multimedia);

        let mut breakdown: HashMap<String, IndexMetrics> = HashMap::new();
        let affected: Vec<i32> = if has_index {
            let (_, mut secondary) = self.open_secondary(table, field)?;
            let result = secondary.delete_all(value)?;
            breakdown.insert(format!("secondary_metrics_{field}"), metrics_of(&result));
            result.data
        } else {
            let (schema, mut primary) = self.open_primary(table)?;
            let field_index = schema.column_index(field)?;
            let scan = primary.scan_all()?;
            breakdown.insert("primary_metrics".to_owned(), metrics_of(&scan));
            scan.data
                .into_iter()
                .filter(|r| r.get(field_index) == value)
                .map(|r| match r.key(schema.key_index()) {
                    Value::Int(v) => *v,
                    _ => unreachable!("primary key is always INT"),
                })
                .collect()
        };

        let mut rebuild_triggered = false;
        let mut removed = Vec::with_capacity(affected.len());
        for pk in affected {
            let one = self.delete(table, &Value::Int(pk))?;
            rebuild_triggered |= one.rebuild_triggered;
            for (k, v) in one.operation_breakdown {
                breakdown.insert(k, v);
            }
            if one.data {
                removed.push(pk);
            }
        }

        Ok(combine(removed, rebuild_triggered, breakdown))
    }

    pub fn get(&self, table: &str, key: &Value) -> Result<OperationResult<Option<Record>>> {
        let (_, mut primary) = self.open_primary(table)?;
        primary.search(key)
    }

    pub fn scan(&self, table: &str) -> Result<OperationResult<Vec<Record>>> {
        let (_, mut primary) = self.open_primary(table)?;
        primary.scan_all()
    }

    /// Range scan on the primary key or on a field with an ordered secondary
    /// index (B+ tree only; hash has no useful order, per §7).
    pub fn range_search(&self, table: &str, field: &str, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<Record>>> {
        let meta = self.table_meta(table)?;
        let schema = TableSchema::new(meta.schema.clone())?;
        if field == schema.key_field() {
            let (_, mut primary) = self.open_primary(table)?;
            return primary.range_search(lo, hi);
        }

        let (_, mut secondary) = self.open_secondary(table, field)?;
        let pks = secondary.range_search(lo, hi)?;
        let mut breakdown = HashMap::new();
        breakdown.insert(format!("secondary_metrics_{field}"), metrics_of(&pks));

        let (_, mut primary) = self.open_primary(table)?;
        let mut records = Vec::with_capacity(pks.data.len());
        for pk in &pks.data {
            let fetched = primary.search(&Value::Int(*pk))?;
            if let Some(record) = fetched.data {
                records.push(record);
            }
            let entry: &mut IndexMetrics = breakdown.entry("primary_metrics".to_owned()).or_default();
            entry.reads += fetched.disk_reads;
            entry.writes += fetched.disk_writes;
            entry.time_ms += fetched.execution_time_ms;
        }

        Ok(combine(records, pks.rebuild_triggered, breakdown))
    }

    /// Spatial radius query on an R-tree field: every record within
    /// `radius` of `center`.
    pub fn radius_search(&self, table: &str, field: &str, center: &Value, radius: f32) -> Result<OperationResult<Vec<Record>>> {
        let rtree = self.open_rtree(table, field, center)?;
        let hits = rtree.radius_search(center, radius)?;
        self.fetch_all(table, hits)
    }

    /// Spatial KNN query on an R-tree field.
    pub fn knn_search(&self, table: &str, field: &str, center: &Value, k: usize) -> Result<OperationResult<Vec<Record>>> {
        let rtree = self.open_rtree(table, field, center)?;
        let hits = rtree.knn_search(center, k)?;
        self.fetch_all(table, hits)
    }

    fn open_rtree(&self, table: &str, field: &str, center: &Value) -> Result<RTreeIndex> {
        let kind = self.secondary_kind(table, field)?;
        if kind != SecondaryKind::Rtree {
            return Err(Error::UnsupportedPredicate(format!("{field} is not a spatial index")));
        }
        let dim = match center {
            Value::Array(v) => v.len(),
            _ => return Err(Error::TypeMismatch(field.to_owned())),
        };
        Ok(RTreeIndex::new(self.secondary_dir(table, field, kind).join("rtree.dat"), dim))
    }

    /// `WHERE field @@ query`: ranks documents by TF-IDF cosine similarity
    /// and attaches the score to each fetched record.
    pub fn fulltext_search(&self, table: &str, field: &str, query: &str, top_k: usize) -> Result<OperationResult<Vec<(Record, f64)>>> {
        let index = self.open_fulltext(table, field)?;
        let ranked = index.search(query, top_k)?;
        let mut breakdown = HashMap::new();
        breakdown.insert(format!("secondary_metrics_{field}"), metrics_of(&ranked));

        let (_, mut primary) = self.open_primary(table)?;
        let mut out = Vec::with_capacity(ranked.data.len());
        for (pk, score) in &ranked.data {
            let fetched = primary.search(&Value::Int(*pk))?;
            if let Some(record) = fetched.data {
                out.push((record, *score));
            }
            let entry: &mut IndexMetrics = breakdown.entry("primary_metrics".to_owned()).or_default();
            entry.reads += fetched.disk_reads;
            entry.writes += fetched.disk_writes;
            entry.time_ms += fetched.execution_time_ms;
        }

        Ok(combine(out, ranked.rebuild_triggered, breakdown))
    }

    fn fetch_all(&self, table: &str, hits: OperationResult<Vec<i32>>) -> Result<OperationResult<Vec<Record>>> {
        let mut breakdown = HashMap::new();
        breakdown.insert("spatial_metrics".to_owned(), metrics_of(&hits));

        let (_, mut primary) = self.open_primary(table)?;
        let mut records = Vec::with_capacity(hits.data.len());
        for pk in &hits.data {
            let fetched = primary.search(&Value::Int(*pk))?;
            if let Some(record) = fetched.data {
                records.push(record);
            }
            let entry: &mut IndexMetrics = breakdown.entry("primary_metrics".to_owned()).or_default();
            entry.reads += fetched.disk_reads;
            entry.writes += fetched.disk_writes;
            entry.time_ms += fetched.execution_time_ms;
        }
        Ok(combine(records, hits.rebuild_triggered, breakdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema {
            columns: vec![
                Column::new("id", Type::Int),
                Column::new("name", Type::Char(16)),
                Column::new("score", Type::Float),
            ],
            key_field: "id".to_owned(),
        }
    }

    fn rec(id: i32, name: &str, score: f32) -> Record {
        Record::new(vec![Value::Int(id), Value::Char(name.to_owned()), Value::Float(score)])
    }

    #[test]
    fn insert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let mut mgr = DatabaseManager::open(dir.path()).unwrap();
        mgr.create_table("people", schema(), PrimaryKind::Btree).unwrap();
        mgr.insert("people", rec(1, "ada", 9.0)).unwrap();
        let got = mgr.get("people", &Value::Int(1)).unwrap().data;
        assert_eq!(got, Some(rec(1, "ada", 9.0)));
    }

    #[test]
    fn secondary_index_stays_consistent_through_insert_and_delete() {
        let dir = tempdir().unwrap();
        let mut mgr = DatabaseManager::open(dir.path()).unwrap();
        mgr.create_table("people", schema(), PrimaryKind::Isam).unwrap();
        mgr.insert("people", rec(1, "ada", 9.0)).unwrap();
        mgr.insert("people", rec(2, "bob", 7.0)).unwrap();
        mgr.create_index("people", "name", SecondaryKind::Btree).unwrap();

        let found = mgr
            .range_search("people", "name", &Value::Char("ada".into()), &Value::Char("ada".into()))
            .unwrap()
            .data;
        assert_eq!(found, vec![rec(1, "ada", 9.0)]);

        mgr.delete("people", &Value::Int(1)).unwrap();
        let found = mgr
            .range_search("people", "name", &Value::Char("ada".into()), &Value::Char("ada".into()))
            .unwrap()
            .data;
        assert!(found.is_empty());
    }

    #[test]
    fn duplicate_insert_leaves_secondary_indexes_untouched() {
        let dir = tempdir().unwrap();
        let mut mgr = DatabaseManager::open(dir.path()).unwrap();
        mgr.create_table("people", schema(), PrimaryKind::Sequential).unwrap();
        mgr.insert("people", rec(1, "ada", 9.0)).unwrap();
        mgr.create_index("people", "name", SecondaryKind::Btree).unwrap();
        let result = mgr.insert("people", rec(1, "ada2", 1.0)).unwrap();
        assert!(!result.data);
        assert!(!result.operation_breakdown.contains_key("secondary_metrics_name"));
    }

    #[test]
    fn secondary_on_primary_key_is_rejected() {
        let dir = tempdir().unwrap();
        let mut mgr = DatabaseManager::open(dir.path()).unwrap();
        mgr.create_table("people", schema(), PrimaryKind::Btree).unwrap();
        assert!(mgr.create_index("people", "id", SecondaryKind::Btree).is_err());
    }

    #[test]
    fn create_index_backfills_existing_records() {
        let dir = tempdir().unwrap();
        let mut mgr = DatabaseManager::open(dir.path()).unwrap();
        mgr.create_table("people", schema(), PrimaryKind::Btree).unwrap();
        mgr.insert("people", rec(1, "ada", 9.0)).unwrap();
        mgr.insert("people", rec(2, "bob", 7.0)).unwrap();
        mgr.create_index("people", "name", SecondaryKind::Btree).unwrap();
        let found = mgr
            .range_search("people", "name", &Value::Char("bob".into()), &Value::Char("bob".into()))
            .unwrap()
            .data;
        assert_eq!(found, vec![rec(2, "bob", 7.0)]);
    }

    #[test]
    fn metadata_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut mgr = DatabaseManager::open(dir.path()).unwrap();
            mgr.create_table("people", schema(), PrimaryKind::Isam).unwrap();
            mgr.insert("people", rec(1, "ada", 9.0)).unwrap();
        }
        let mgr = DatabaseManager::open(dir.path()).unwrap();
        let got = mgr.get("people", &Value::Int(1)).unwrap().data;
        assert_eq!(got, Some(rec(1, "ada", 9.0)));
    }
}

//! Demo CLI: a thin, single-shot command surface over [`relstore::manager::DatabaseManager`].
//!
//! There is no SQL parser or shell here (out of scope, see spec §1) — each
//! invocation runs one command against the database at `--path` and exits.

use prettytable::{Cell, Row, Table};

use relstore::config::Command;
use relstore::error::Result;
use relstore::manager::DatabaseManager;
use relstore::record::Record;
use relstore::schema::{Column, Schema, TableSchema, Type, Value};
use relstore::setup;

fn parse_type(spec: &str) -> Result<Type> {
    let spec = spec.trim().to_uppercase();
    if let Some(n) = spec.strip_prefix("CHAR") {
        return Ok(Type::Char(n.parse().map_err(|_| {
            relstore::error::Error::TypeMismatch(format!("bad CHAR width: {spec}"))
        })?));
    }
    if let Some(d) = spec.strip_prefix("ARRAY") {
        return Ok(Type::Array(d.parse().map_err(|_| {
            relstore::error::Error::TypeMismatch(format!("bad ARRAY dimension: {spec}"))
        })?));
    }
    match spec.as_str() {
        "INT" => Ok(Type::Int),
        "FLOAT" => Ok(Type::Float),
        "BOOL" => Ok(Type::Bool),
        other => Err(relstore::error::Error::TypeMismatch(format!("unknown column type: {other}"))),
    }
}

/// Parse `"id:INT,name:CHAR16,score:FLOAT"` into a column list.
fn parse_columns(spec: &str) -> Result<Vec<Column>> {
    spec.split(',')
        .map(|entry| {
            let (name, typ) = entry
                .split_once(':')
                .ok_or_else(|| relstore::error::Error::TypeMismatch(format!("bad column spec: {entry}")))?;
            Ok(Column::new(name.trim(), parse_type(typ)?))
        })
        .collect()
}

/// Parse `"1,ada,9.5"` into typed values matching `schema`.
fn parse_values(schema: &TableSchema, spec: &str) -> Result<Record> {
    let parts: Vec<&str> = spec.split(',').collect();
    if parts.len() != schema.columns().len() {
        return Err(relstore::error::Error::FieldCountMismatch(parts.len(), schema.columns().len()));
    }
    let fields = parts
        .iter()
        .zip(schema.columns())
        .map(|(p, c)| Value::parse(p.trim(), &c.typ))
        .collect::<Result<Vec<_>>>()?;
    Ok(Record::new(fields))
}

fn value_cell(v: &Value) -> String {
    match v {
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Char(s) => Value::normalize_char(s).to_owned(),
        Value::Array(a) => format!("[{}]", a.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(";")),
    }
}

fn print_records(schema: &TableSchema, records: &[Record]) {
    let mut table = Table::new();
    table.add_row(Row::new(schema.columns().iter().map(|c| Cell::new(&c.name)).collect()));
    for record in records {
        table.add_row(Row::new(record.fields.iter().map(|v| Cell::new(&value_cell(v))).collect()));
    }
    table.printstd();
}

fn run() -> Result<()> {
    let config = setup::init_config();
    let mut manager = DatabaseManager::open(&config.path)?;

    match config.command {
        Command::CreateTable { table, columns, key_field, primary } => {
            let schema = Schema { columns: parse_columns(&columns)?, key_field };
            manager.create_table(&table, schema, primary)?;
            println!("{}", console::style(format!("Table `{table}` created")).green());
        }
        Command::CreateIndex { table, field, kind } => {
            manager.create_index(&table, &field, kind)?;
            println!("{}", console::style(format!("Index on `{table}.{field}` created")).green());
        }
        Command::Insert { table, values } => {
            let schema = manager.schema(&table)?;
            let record = parse_values(&schema, &values)?;
            let result = manager.insert(&table, record)?;
            if result.data {
                println!("Query OK, 1 row affected ({:.2} ms)", result.execution_time_ms);
            } else {
                println!("{}", console::style("Duplicate primary key").red());
            }
        }
        Command::Get { table, key } => {
            let schema = manager.schema(&table)?;
            let key = Value::parse(&key, &schema.key_type())?;
            let result = manager.get(&table, &key)?;
            match result.data {
                Some(record) => print_records(&schema, std::slice::from_ref(&record)),
                None => println!("Empty set"),
            }
        }
        Command::Range { table, lo, hi } => {
            let schema = manager.schema(&table)?;
            let lo = Value::parse(&lo, &schema.key_type())?;
            let hi = Value::parse(&hi, &schema.key_type())?;
            let result = manager.range_search(&table, schema.key_field(), &lo, &hi)?;
            print_records(&schema, &result.data);
            println!("{} rows in set", result.data.len());
        }
        Command::Scan { table } => {
            let schema = manager.schema(&table)?;
            let result = manager.scan(&table)?;
            print_records(&schema, &result.data);
            println!("{} rows in set", result.data.len());
        }
        Command::Delete { table, key } => {
            let schema = manager.schema(&table)?;
            let key = Value::parse(&key, &schema.key_type())?;
            let result = manager.delete(&table, &key)?;
            if result.data {
                println!("Query OK, 1 row affected");
            } else {
                println!("Empty set");
            }
        }
    }
    Ok(())
}

fn main() {
    setup::init_logging();
    if let Err(err) = run() {
        eprintln!("{} {err}", console::style("Error:").bold().red());
        std::process::exit(1);
    }
}

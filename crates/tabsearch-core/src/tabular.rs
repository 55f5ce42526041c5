//! Delimited text input and output.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::{ColumnSchema, FieldType, Schema};
use crate::value::{DataTable, Row, Value};

/// Cell texts read as missing values.
const MISSING_MARKERS: &[&str] = &["", "NA", "N/A", "n/a", "NaN", "nan", "NULL", "null", "None", "<NA>"];

const COLUMN_NAME_HEADER: &str = "column name";
const DATA_TYPE_HEADER: &str = "data type";
const FORMAT_HEADER: &str = "format";

fn reader<R: Read>(input: R, delimiter: u8) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(input)
}

fn header_position(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

/// Reads a schema definition table with `column name`, `data type` and
/// `format` columns.
pub fn read_schema_definition<R: Read>(input: R, delimiter: u8) -> Result<Schema> {
    let mut rdr = reader(input, delimiter);
    let headers = rdr.headers()?.clone();

    let name_at = header_position(&headers, COLUMN_NAME_HEADER)
        .ok_or_else(|| Error::Input(format!("schema definition lacks a '{COLUMN_NAME_HEADER}' column")))?;
    let type_at = header_position(&headers, DATA_TYPE_HEADER)
        .ok_or_else(|| Error::Input(format!("schema definition lacks a '{DATA_TYPE_HEADER}' column")))?;
    let format_at = header_position(&headers, FORMAT_HEADER);

    let mut schema = Schema::new();
    for record in rdr.records() {
        let record = record?;
        let name = record.get(name_at).unwrap_or_default().trim();
        if name.is_empty() {
            continue;
        }
        let data_type = record.get(type_at).unwrap_or_default().trim();
        let declared_type = if data_type.is_empty() {
            None
        } else {
            Some(data_type.parse::<FieldType>().map_err(|e| match e {
                Error::SchemaValidation(msg) => {
                    Error::SchemaValidation(format!("column '{name}': {msg}"))
                }
                other => other,
            })?)
        };
        let format = format_at
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from);

        schema.insert(ColumnSchema {
            name: name.to_string(),
            declared_type,
            format,
        })?;
    }

    debug!(columns = schema.len(), "schema definition read");
    Ok(schema)
}

pub fn read_schema_definition_file(path: impl AsRef<Path>, delimiter: u8) -> Result<Schema> {
    read_schema_definition(File::open(path)?, delimiter)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Integer,
    Float,
    Boolean,
    Text,
}

fn is_missing_marker(cell: &str) -> bool {
    MISSING_MARKERS.contains(&cell.trim())
}

fn parse_bool(cell: &str) -> Option<bool> {
    let cell = cell.trim();
    if cell.eq_ignore_ascii_case("true") {
        Some(true)
    } else if cell.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Picks the narrowest kind every present cell of a column fits.
fn infer_kind<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> CellKind {
    let mut present = cells.filter(|c| !is_missing_marker(c)).peekable();
    if present.peek().is_none() {
        return CellKind::Text;
    }
    if present.clone().all(|c| c.trim().parse::<i64>().is_ok()) {
        CellKind::Integer
    } else if present.clone().all(|c| c.trim().parse::<f64>().is_ok()) {
        CellKind::Float
    } else if present.all(|c| parse_bool(c).is_some()) {
        CellKind::Boolean
    } else {
        CellKind::Text
    }
}

fn to_value(cell: &str, kind: CellKind) -> Value {
    if is_missing_marker(cell) {
        return Value::Null;
    }
    let trimmed = cell.trim();
    match kind {
        CellKind::Integer => trimmed.parse().map_or(Value::Null, Value::Integer),
        CellKind::Float => trimmed.parse().map_or(Value::Null, Value::Float),
        CellKind::Boolean => parse_bool(trimmed).map_or(Value::Null, Value::Boolean),
        CellKind::Text => Value::String(cell.to_string()),
    }
}

/// Reads a data table with a header row. Each column gets one scalar kind
/// inferred from all of its cells.
pub fn read_data_table<R: Read>(input: R, delimiter: u8) -> Result<DataTable> {
    let mut rdr = reader(input, delimiter);
    let columns: Vec<String> = rdr.headers()?.iter().map(String::from).collect();

    let mut unique = HashSet::new();
    for column in &columns {
        if !unique.insert(column.as_str()) {
            return Err(Error::Input(format!("duplicate column '{column}' in data header")));
        }
    }

    let records = rdr.records().collect::<std::result::Result<Vec<_>, _>>()?;
    let kinds: Vec<CellKind> = (0..columns.len())
        .map(|i| infer_kind(records.iter().map(move |r| r.get(i).unwrap_or_default())))
        .collect();

    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .zip(&kinds)
                .enumerate()
                .map(|(i, (column, kind))| {
                    (column.clone(), to_value(record.get(i).unwrap_or_default(), *kind))
                })
                .collect::<Row>()
        })
        .collect();

    let table = DataTable { columns, rows };
    debug!(columns = table.columns.len(), rows = table.len(), "data table read");
    Ok(table)
}

pub fn read_data_table_file(path: impl AsRef<Path>, delimiter: u8) -> Result<DataTable> {
    read_data_table(File::open(path)?, delimiter)
}

/// Writes a table as comma-delimited text with a header row. Cells a row
/// lacks are written empty.
pub fn write_csv<W: Write>(table: &DataTable, output: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(output);
    wtr.write_record(&table.columns)?;
    for row in &table.rows {
        wtr.write_record(
            table
                .columns
                .iter()
                .map(|c| row.get(c).map(ToString::to_string).unwrap_or_default()),
        )?;
    }
    wtr.flush()?;
    Ok(())
}

/// Saves a table to `path`, replacing any existing file.
pub fn save_csv(table: &DataTable, path: impl AsRef<Path>) -> Result<()> {
    write_csv(table, File::create(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_definition() {
        let text = "column name,data type,format\n amount ,double,\njoined,date,\nnote,,\n";
        let schema = read_schema_definition(text.as_bytes(), b',').unwrap();

        assert_eq!(schema.len(), 3);
        assert_eq!(schema.get("amount").unwrap().declared_type, Some(FieldType::Double));
        assert_eq!(schema.get("joined").unwrap().format, None);
        assert_eq!(schema.get("note").unwrap().declared_type, None);
    }

    #[test]
    fn test_schema_definition_rejects_unknown_type() {
        let text = "column name,data type,format\nprice,money,\n";
        let err = read_schema_definition(text.as_bytes(), b',').unwrap_err();
        assert!(err.to_string().contains("price"));
    }

    #[test]
    fn test_schema_definition_requires_headers() {
        let text = "name,type\nprice,double\n";
        assert!(matches!(
            read_schema_definition(text.as_bytes(), b','),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn test_column_inference() {
        let text = "id,price,active,joined,label\n1,2.5,TRUE,2020-01-15,a\n2,,false,2020-02-20,NA\n3,4,true,,c\n";
        let table = read_data_table(text.as_bytes(), b',').unwrap();

        assert_eq!(table.len(), 3);
        let first = &table.rows[0];
        assert_eq!(first.get("id"), Some(&Value::Integer(1)));
        assert_eq!(first.get("price"), Some(&Value::Float(2.5)));
        assert_eq!(first.get("active"), Some(&Value::Boolean(true)));
        assert_eq!(first.get("joined"), Some(&Value::String("2020-01-15".into())));
        assert_eq!(table.rows[1].get("price"), Some(&Value::Null));
        assert_eq!(table.rows[1].get("label"), Some(&Value::Null));
        assert_eq!(table.rows[2].get("price"), Some(&Value::Float(4.0)));
        assert_eq!(table.rows[2].get("joined"), Some(&Value::Null));
    }

    #[test]
    fn test_datetime_text_is_kept_verbatim() {
        let text = "at\n2021-06-01T12:00:00.000+02:00\n2021-06-01T10:00:00Z\n";
        let table = read_data_table(text.as_bytes(), b',').unwrap();
        assert_eq!(
            table.rows[0].get("at"),
            Some(&Value::String("2021-06-01T12:00:00.000+02:00".into()))
        );
        assert_eq!(
            table.rows[1].get("at"),
            Some(&Value::String("2021-06-01T10:00:00Z".into()))
        );
    }

    #[test]
    fn test_duplicate_header_rejected() {
        let text = "a,a\n1,2\n";
        assert!(matches!(
            read_data_table(text.as_bytes(), b','),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn test_semicolon_delimiter() {
        let text = "a;b\n1;x\n";
        let table = read_data_table(text.as_bytes(), b';').unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
    }

    #[test]
    fn test_write_csv() {
        let mut table = DataTable::new(vec!["name".into(), "tags".into()]);
        table.rows.push(Row::from([
            ("name".to_string(), Value::String("widget".into())),
            ("tags".to_string(), Value::String("a, b".into())),
        ]));
        table.rows.push(Row::from([("name".to_string(), Value::String("NULL".into()))]));

        let mut out = Vec::new();
        write_csv(&table, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "name,tags\nwidget,\"a, b\"\nNULL,\n"
        );
    }
}

//! Table ⇄ parquet bridge
//!
//! One table maps to one parquet file through a single `RecordBatch`.
//! Column types map 1:1: `Float` ⇄ Float64, `Int` ⇄ Int64, `Tiny` ⇄ Int8.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, Int8Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::error::{Result, SimError};
use crate::table::{Column, Table};

pub fn write_table(table: &Table, path: &Path) -> Result<()> {
    if table.n_cols() == 0 {
        return Err(SimError::Io(format!(
            "refusing to write a zero-column table to {}",
            path.display()
        )));
    }
    let mut fields = Vec::with_capacity(table.n_cols());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.n_cols());
    for (name, col) in table.columns() {
        match col {
            Column::Float(v) => {
                fields.push(Field::new(name, DataType::Float64, false));
                arrays.push(Arc::new(Float64Array::from(v.clone())));
            }
            Column::Int(v) => {
                fields.push(Field::new(name, DataType::Int64, false));
                arrays.push(Arc::new(Int64Array::from(v.clone())));
            }
            Column::Tiny(v) => {
                fields.push(Field::new(name, DataType::Int8, false));
                arrays.push(Arc::new(Int8Array::from(v.clone())));
            }
            Column::Str(v) => {
                fields.push(Field::new(name, DataType::Utf8, false));
                arrays.push(Arc::new(StringArray::from(v.clone())));
            }
        }
    }
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    let file = File::create(path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

pub fn read_table(path: &Path) -> Result<Table> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let reader = builder.build()?;
    let mut pieces = Vec::new();
    for batch in reader {
        pieces.push(batch_to_table(&batch?)?);
    }
    Ok(Table::concat(&pieces))
}

fn batch_to_table(batch: &RecordBatch) -> Result<Table> {
    let mut table = Table::new();
    for (i, field) in batch.schema().fields().iter().enumerate() {
        let array = batch.column(i);
        let column = match field.data_type() {
            DataType::Float64 => {
                let a = array
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| SimError::Io(format!("column '{}' downcast", field.name())))?;
                Column::Float(a.values().to_vec())
            }
            DataType::Int64 => {
                let a = array
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .ok_or_else(|| SimError::Io(format!("column '{}' downcast", field.name())))?;
                Column::Int(a.values().to_vec())
            }
            DataType::Int8 => {
                let a = array
                    .as_any()
                    .downcast_ref::<Int8Array>()
                    .ok_or_else(|| SimError::Io(format!("column '{}' downcast", field.name())))?;
                Column::Tiny(a.values().to_vec())
            }
            DataType::Utf8 => {
                let a = array
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| SimError::Io(format!("column '{}' downcast", field.name())))?;
                Column::Str(
                    (0..a.len())
                        .map(|i| a.value(i).to_string())
                        .collect(),
                )
            }
            other => {
                return Err(SimError::Io(format!(
                    "unsupported parquet type {other} in column '{}'",
                    field.name()
                )))
            }
        };
        table.push(field.name().clone(), column)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_three_column_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");

        let mut t = Table::new();
        t.push("rt", Column::Float(vec![0.5, 0.75])).unwrap();
        t.push("condition_idx", Column::Int(vec![1, 2])).unwrap();
        t.push("choice", Column::Tiny(vec![1, -1])).unwrap();

        write_table(&t, &path).unwrap();
        let back = read_table(&path).unwrap();
        assert_eq!(back, t);
    }
}

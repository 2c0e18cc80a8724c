// JSONL tables
//
// One JSON object per line, column name -> number. Used for materialized
// train/validation splits and for local datasets.

use anyhow::{bail, Context, Result};
use ndarray::{Array1, Array2};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub type Row = Map<String, Value>;

/// Read every row of a JSONL file
pub fn read_rows(path: &Path) -> Result<Vec<Row>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open table: {}", path.display()))?;

    let mut rows = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Row = serde_json::from_str(&line)
            .with_context(|| format!("Invalid JSON on line {} of {}", idx + 1, path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Write rows keeping only `columns`
pub fn write_rows(path: &Path, rows: &[Row], columns: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create table: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for row in rows {
        let projected: Row = columns
            .iter()
            .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
            .collect();
        serde_json::to_writer(&mut writer, &projected).context("Failed to serialize row")?;
        writeln!(writer).context("Failed to write row")?;
    }
    writer.flush().context("Failed to flush table")?;
    Ok(())
}

fn numeric(row: &Row, column: &str, line: usize) -> Result<f64> {
    match row.get(column) {
        Some(Value::Number(n)) => n
            .as_f64()
            .with_context(|| format!("Column '{}' on row {} is not finite", column, line)),
        Some(Value::Bool(b)) => Ok(if *b { 1.0 } else { 0.0 }),
        Some(other) => bail!("Column '{}' on row {} is not numeric: {}", column, line, other),
        None => bail!("Column '{}' missing on row {}", column, line),
    }
}

/// Check that every row has numeric values for `columns`
pub fn validate_rows(rows: &[Row], columns: &[String]) -> Result<()> {
    for (idx, row) in rows.iter().enumerate() {
        for column in columns {
            numeric(row, column, idx + 1)?;
        }
    }
    Ok(())
}

/// Feature matrix and target vector from in-memory rows
pub fn to_arrays(rows: &[Row], target: &str, features: &[String]) -> Result<(Array2<f64>, Array1<f64>)> {
    let mut x = Vec::with_capacity(rows.len() * features.len());
    let mut y = Vec::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        for feature in features {
            x.push(numeric(row, feature, idx + 1)?);
        }
        y.push(numeric(row, target, idx + 1)?);
    }

    let x = Array2::from_shape_vec((rows.len(), features.len()), x)
        .context("Feature matrix has inconsistent shape")?;
    Ok((x, Array1::from_vec(y)))
}

/// Load a JSONL file straight into arrays
pub fn read_arrays(path: &Path, target: &str, features: &[String]) -> Result<(Array2<f64>, Array1<f64>)> {
    let rows = read_rows(path)?;
    to_arrays(&rows, target, features)
        .with_context(|| format!("Failed to load arrays from {}", path.display()))
}

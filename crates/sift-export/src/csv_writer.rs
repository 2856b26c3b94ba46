//! CSV export artifact.

use crate::error::{ExportError, Result};
use crate::filename::export_file_name;
use crate::Persistence;
use chrono::Utc;
use sift_core::Record;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const LEADING_COLUMNS: [&str; 3] = ["id", "title", "price"];
const TRAILING_COLUMNS: [&str; 5] = ["images", "condition", "shipping", "url", "captured_at"];

/// Writes one CSV file per task into a fixed directory.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    output_dir: PathBuf,
}

impl CsvExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `records` to a fresh file and return its path.
    ///
    /// Secondary columns are `fields` in the given order, then any other
    /// detail keys found in `records`, sorted.
    pub fn write(&self, label: &str, fields: &[String], records: &[Record]) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).map_err(|source| ExportError::CreateDir {
            path: self.output_dir.clone(),
            source,
        })?;

        let path = self.unique_path(&export_file_name(label, &Utc::now()));
        let detail_columns = detail_columns(fields, records);

        let mut writer = csv::Writer::from_path(&path)?;

        let header: Vec<&str> = LEADING_COLUMNS
            .iter()
            .copied()
            .chain(detail_columns.iter().map(String::as_str))
            .chain(TRAILING_COLUMNS.iter().copied())
            .collect();
        writer.write_record(&header)?;

        for record in records {
            let mut row: Vec<String> = vec![
                record.id.clone(),
                record.title.clone(),
                record.price.clone().unwrap_or_default(),
            ];
            for column in &detail_columns {
                row.push(record.details.get(column).cloned().unwrap_or_default());
            }
            row.push(record.images.join("|"));
            row.push(record.condition.clone().unwrap_or_default());
            row.push(record.shipping.clone().unwrap_or_default());
            row.push(record.url.clone());
            row.push(
                record
                    .captured_at
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
            );
            writer.write_record(&row)?;
        }

        writer.flush()?;
        tracing::info!(
            records = records.len(),
            "Exported {} to {}",
            label,
            path.display()
        );
        Ok(path)
    }

    /// Append `_2`, `_3`, ... when a file of the same name exists.
    fn unique_path(&self, file_name: &str) -> PathBuf {
        let candidate = self.output_dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }

        let stem = file_name.trim_end_matches(".csv");
        (2..)
            .map(|n| self.output_dir.join(format!("{stem}_{n}.csv")))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}

#[async_trait::async_trait]
impl Persistence for CsvExporter {
    async fn persist(
        &self,
        label: &str,
        fields: &[String],
        records: &[Record],
    ) -> Result<Vec<PathBuf>> {
        let exporter = self.clone();
        let label = label.to_string();
        let fields = fields.to_vec();
        let records = records.to_vec();

        // csv and fs writes are blocking
        let path =
            tokio::task::spawn_blocking(move || exporter.write(&label, &fields, &records)).await??;
        Ok(vec![path])
    }
}

/// Requested fields first, then the sorted remaining detail keys.
fn detail_columns(fields: &[String], records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(fields.len());
    for field in fields {
        if !columns.contains(field) {
            columns.push(field.clone());
        }
    }

    let extra: BTreeSet<&String> = records
        .iter()
        .flat_map(|r| r.details.keys())
        .filter(|key| !columns.contains(key))
        .collect();
    columns.extend(extra.into_iter().cloned());
    columns
}

use anyhow::{Context, Result};
use csv::{Reader, ReaderBuilder, StringRecord, Trim};
use std::io::Read;
use std::path::Path;

use crate::ElementData;

/// Geochemical observations: one row per sample, one column per element.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    sample_column: String,
    /// Element name and its position within each record
    columns: Vec<(String, usize)>,
    samples: Vec<String>,
    records: Vec<StringRecord>,
}

fn reader_builder(delimiter: char) -> Result<ReaderBuilder> {
    let delimiter = u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .with_context(|| format!("delimiter {delimiter:?} is not a single ASCII byte"))?;
    let mut builder = ReaderBuilder::new();
    builder.delimiter(delimiter).has_headers(true).trim(Trim::All);
    Ok(builder)
}

impl ObservationTable {
    /// Parse delimited text with a header row.
    pub fn parse(text: &str, delimiter: char, sample_column: &str) -> Result<Self> {
        let reader = reader_builder(delimiter)?.from_reader(text.as_bytes());
        Self::from_reader(reader, sample_column)
    }

    pub fn from_path(path: impl AsRef<Path>, delimiter: char, sample_column: &str) -> Result<Self> {
        let path = path.as_ref();
        let reader = reader_builder(delimiter)?
            .from_path(path)
            .with_context(|| format!("failed to open observations {}", path.display()))?;
        Self::from_reader(reader, sample_column).with_context(|| format!("in {}", path.display()))
    }

    fn from_reader<R: Read>(mut reader: Reader<R>, sample_column: &str) -> Result<Self> {
        let header = reader.headers().context("observation table has no header")?.clone();
        let id_position = header
            .iter()
            .position(|h| h == sample_column)
            .with_context(|| format!("sample column '{sample_column}' not found in header"))?;

        let columns = header
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != id_position)
            .map(|(i, h)| (h.to_string(), i))
            .collect();

        let records = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .context("malformed observation row")?;
        let samples = records
            .iter()
            .map(|r| r.get(id_position).unwrap_or_default().to_string())
            .collect();

        Ok(Self {
            sample_column: sample_column.to_string(),
            columns,
            samples,
            records,
        })
    }

    pub fn sample_column(&self) -> &str {
        &self.sample_column
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn elements(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Drop element columns by name. Unknown names are ignored.
    pub fn exclude(&mut self, elements: &[String]) {
        self.columns.retain(|(name, _)| !elements.contains(name));
    }

    /// Observations of one element, keyed by sample. Cells that are not
    /// finite numbers are left out.
    pub fn element(&self, element: &str) -> Option<ElementData> {
        let &(_, position) = self.columns.iter().find(|(name, _)| name == element)?;
        Some(
            self.samples
                .iter()
                .zip(&self.records)
                .filter_map(|(sample, record)| {
                    let value = record.get(position)?.parse::<f64>().ok()?;
                    value.is_finite().then(|| (sample.clone(), value))
                })
                .collect(),
        )
    }
}

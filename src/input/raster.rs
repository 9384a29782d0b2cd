use anyhow::{bail, Context, Result};
use ndarray::Array2;
use std::path::Path;

/// Whitespace-separated integer grid, one raster row per line. Blank lines
/// are ignored; every row must have the same width.
pub fn parse_label_raster(text: &str) -> Result<Array2<u32>> {
    let mut data = Vec::new();
    let mut width = None;
    let mut height = 0;

    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|cell| {
                cell.parse::<u32>()
                    .with_context(|| format!("line {}: invalid label '{cell}'", line_no + 1))
            })
            .collect::<Result<Vec<_>>>()?;

        match width {
            None => width = Some(row.len()),
            Some(w) if w != row.len() => {
                bail!("line {}: expected {w} labels, found {}", line_no + 1, row.len())
            }
            Some(_) => {}
        }
        data.extend(row);
        height += 1;
    }

    let width = width.context("label raster is empty")?;
    Ok(Array2::from_shape_vec((height, width), data)?)
}

pub fn load_label_raster(path: impl AsRef<Path>) -> Result<Array2<u32>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read label raster {}", path.display()))?;
    parse_label_raster(&text).with_context(|| format!("in {}", path.display()))
}

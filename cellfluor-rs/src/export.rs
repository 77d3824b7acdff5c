//! CSV export: one row per cell, one column per frame.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fluorescence::FluorescenceTable;

pub const MISSING: &str = "nan";

/// `<base_name>.csv`
pub fn csv_path(base_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.csv", base_name))
}

/// `12.0`, `12.5`, `nan`
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:?}", v),
        _ => MISSING.to_string(),
    }
}

/// Header `cell_id,frame_0,...`, rows in table order.
pub fn write_table<W: Write>(writer: W, table: &FluorescenceTable, frames: usize) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = Vec::with_capacity(frames + 1);
    header.push("cell_id".to_string());
    header.extend((0..frames).map(|i| format!("frame_{}", i)));
    wtr.write_record(&header)?;

    for (cell, values) in table.rows() {
        let mut record = Vec::with_capacity(frames + 1);
        record.push(cell.to_string());
        record.extend((0..frames).map(|i| format_value(values.get(i).copied().flatten())));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_csv(path: &Path, table: &FluorescenceTable, frames: usize) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_table(std::io::BufWriter::new(file), table, frames)
}

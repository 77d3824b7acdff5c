//! Fluorescence trace charts, one PNG per cell.

use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fluorescence::FluorescenceTable;

pub fn trace_name(cell: u32) -> String {
    format!("trace_cell_{}.png", cell)
}

/// Contiguous runs of measured values as `(frame, value)` points.
/// Missing values split the line.
pub fn segments(values: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for (i, v) in values.iter().enumerate() {
        match v {
            Some(v) if v.is_finite() => current.push((i as f64, *v)),
            _ => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn plot_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Plot(e.to_string())
}

fn plot_trace(output_path: &Path, cell: u32, values: &[Option<f64>]) -> Result<()> {
    let runs = segments(values);
    let (mut y_min, mut y_max) = runs
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, y)| {
            (lo.min(y), hi.max(y))
        });
    if !y_min.is_finite() {
        (y_min, y_max) = (0.0, 1.0);
    }
    let y_pad = ((y_max - y_min) * 0.05).max(1e-3);
    let x_max = (values.len().max(2) - 1) as f64;

    let root = BitMapBackend::new(output_path, (1000, 400)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(15)
        .caption(format!("Fluorescence Trace - Cell {}", cell), ("sans-serif", 22))
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..x_max, (y_min - y_pad)..(y_max + y_pad))
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Frame")
        .y_desc("Mean Fluorescence")
        .draw()
        .map_err(plot_err)?;

    for (i, run) in runs.into_iter().enumerate() {
        let series = chart
            .draw_series(LineSeries::new(run, &BLUE))
            .map_err(plot_err)?;
        if i == 0 {
            series
                .label(format!("Cell {}", cell))
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
        }
    }

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Render every cell's trace, in table order. Returns the written paths.
pub fn plot_traces(
    dir: &Path,
    table: &FluorescenceTable,
    progress: &impl Fn(usize, usize),
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let total = table.len();
    let mut written = Vec::with_capacity(total);
    for (i, (cell, values)) in table.rows().enumerate() {
        let path = dir.join(trace_name(cell));
        plot_trace(&path, cell, values)?;
        written.push(path);
        progress(i + 1, total);
    }
    Ok(written)
}

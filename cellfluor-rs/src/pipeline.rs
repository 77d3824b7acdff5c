//! The run: reference scan → one-time segmentation → per-frame measurement
//! with artifacts → CSV export.

use std::path::{Path, PathBuf};

use crate::artifacts::ArtifactWriter;
use crate::error::Result;
use crate::export;
use crate::fluorescence::{self, CancelToken, FluorescenceTable};
use crate::params::RunParams;
use crate::reference;
use crate::segment::{LabelMask, Segmenter};
use crate::source::FrameSource;

// Progress share per phase.
const SCAN_END: f64 = 0.3;
const SEGMENT_END: f64 = 0.4;
const AGGREGATE_END: f64 = 0.95;

/// Frame count is unknown while scanning, so the bar approaches `SCAN_END`
/// without reaching it.
fn scan_fraction(scanned: usize) -> f64 {
    SCAN_END * scanned as f64 / (scanned as f64 + 1.0)
}

#[derive(Debug)]
pub struct RunSummary {
    pub frames: usize,
    pub reference_index: usize,
    pub mask: LabelMask,
    pub table: FluorescenceTable,
    pub csv_path: PathBuf,
    pub stopped: bool,
}

pub fn run(
    params: &RunParams,
    source: &dyn FrameSource,
    segmenter: &mut dyn Segmenter,
    output_dir: &Path,
    cancel: &CancelToken,
    progress: &impl Fn(f64, &str),
) -> Result<RunSummary> {
    eprintln!("Scanning frames to select the one with highest fluorescence...");
    let reference = reference::select_reference(source, params.channel, &|n| {
        progress(scan_fraction(n), &format!("Scanning frame {}", n));
    })?;
    progress(
        SCAN_END,
        &format!(
            "Reference frame {} of {} (mean {:.2})",
            reference.index, reference.frame_count, reference.brightness
        ),
    );

    eprintln!("Generating mask from brightest frame...");
    let image = reference.frame.channel_image(params.channel)?;
    let mask = segmenter.segment(&image, params.diameter)?;
    let cells = mask.cell_ids();
    eprintln!(
        "Mask {}x{} with {} cell(s)",
        mask.height(),
        mask.width(),
        cells.len()
    );
    progress(SEGMENT_END, &format!("Segmented {} cell(s)", cells.len()));

    let writer = ArtifactWriter::new(output_dir, &mask, params.channel)?;
    let total = reference.frame_count.max(1);
    let aggregation = fluorescence::aggregate(
        source,
        &mask,
        &cells,
        params.channel,
        FluorescenceTable::new(),
        cancel,
        |t, frame| writer.write_frame(t, frame),
        &|done| {
            progress(
                SEGMENT_END + done.min(total) as f64 / total as f64 * (AGGREGATE_END - SEGMENT_END),
                &format!("Frame {}/{}", done, total),
            );
        },
    )?;

    let csv_path = export::csv_path(&params.csv_name);
    export::export_csv(&csv_path, &aggregation.table, aggregation.frames)?;

    eprintln!("Segmentation complete. {} frames processed.", aggregation.frames);
    eprintln!("Fluorescence data saved to '{}'", csv_path.display());
    progress(1.0, &format!("Wrote {}", csv_path.display()));

    Ok(RunSummary {
        frames: aggregation.frames,
        reference_index: reference.index,
        mask,
        table: aggregation.table,
        csv_path,
        stopped: aggregation.stopped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_progress_rises_below_scan_share() {
        assert_eq!(scan_fraction(0), 0.0);
        let steps: Vec<f64> = (1..50).map(scan_fraction).collect();
        assert!(steps.windows(2).all(|w| w[0] < w[1]));
        assert!(steps.iter().all(|&p| p > 0.0 && p < SCAN_END));
    }
}

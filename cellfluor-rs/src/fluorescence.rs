//! Per-cell mean fluorescence over time, measured under a fixed label mask.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::segment::LabelMask;
use crate::source::FrameSource;

/// Cell id → per-frame mean intensity (`None` = no measurement).
/// Rows keep the order in which cells were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluorescenceTable {
    order: Vec<u32>,
    series: HashMap<u32, Vec<Option<f64>>>,
}

impl FluorescenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `cell` at frame `t`, back-filling earlier frames of a new cell.
    pub fn record(&mut self, cell: u32, t: usize, value: f64) {
        if !self.series.contains_key(&cell) {
            self.order.push(cell);
        }
        let series = self.series.entry(cell).or_default();
        if series.len() < t {
            series.resize(t, None);
        }
        series.push(Some(value));
    }

    /// Right-pad every series to `frames` entries.
    pub fn finish(&mut self, frames: usize) {
        for series in self.series.values_mut() {
            if series.len() < frames {
                series.resize(frames, None);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, cell: u32) -> Option<&[Option<f64>]> {
        self.series.get(&cell).map(Vec::as_slice)
    }

    /// Rows in first-appearance order.
    pub fn rows(&self) -> impl Iterator<Item = (u32, &[Option<f64>])> + '_ {
        self.order
            .iter()
            .map(move |&cell| (cell, self.series[&cell].as_slice()))
    }
}

/// Cooperative stop signal, checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    stop_file: Option<PathBuf>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also counts as cancelled once `path` exists.
    pub fn with_stop_file(path: PathBuf) -> Self {
        Self {
            flag: Arc::default(),
            stop_file: Some(path),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.stop_file.as_ref().is_some_and(|p| p.exists())
    }
}

pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Mean of `channel` under each label of the mask, as `(cell, mean)` for every
/// cell in `cells` that has at least one pixel.
pub fn measure_frame(
    frame: &Frame,
    mask: &LabelMask,
    cells: &[u32],
    channel: usize,
) -> Result<Vec<(u32, f64)>> {
    let plane = frame.channel(channel)?;
    let max_label = mask.max_label() as usize;
    let mut sums = vec![0.0f64; max_label + 1];
    let mut counts = vec![0u64; max_label + 1];

    for (&lbl, &v) in mask.labels().iter().zip(plane.iter()) {
        let lbl = lbl as usize;
        if lbl > 0 {
            sums[lbl] += v as f64;
            counts[lbl] += 1;
        }
    }

    Ok(cells
        .iter()
        .filter_map(|&cell| {
            let i = cell as usize;
            (i <= max_label && counts[i] > 0).then(|| (cell, round4(sums[i] / counts[i] as f64)))
        })
        .collect())
}

/// Per-frame log line: detected cell count, or a warning when the mask is empty.
pub fn cell_count_message(cells: usize, frame: usize) -> String {
    if cells == 0 {
        format!("Warning: No cells detected in frame {}", frame)
    } else {
        format!("Detected {} cell(s) in frame {}", cells, frame)
    }
}

#[derive(Debug)]
pub struct Aggregation {
    pub table: FluorescenceTable,
    /// Frames fully processed.
    pub frames: usize,
    pub stopped: bool,
}

/// Replay `source` applying the fixed `mask`, filling `table`.
///
/// `on_frame(t, frame)` runs before each frame is measured; its errors abort.
/// The table is padded to the processed frame count before it is returned.
#[allow(clippy::too_many_arguments)]
pub fn aggregate(
    source: &dyn FrameSource,
    mask: &LabelMask,
    cells: &[u32],
    channel: usize,
    mut table: FluorescenceTable,
    cancel: &CancelToken,
    mut on_frame: impl FnMut(usize, &Frame) -> Result<()>,
    progress: &impl Fn(usize),
) -> Result<Aggregation> {
    let mut frame_num = 0usize;
    let mut stopped = false;

    for frame in source.frames()? {
        if cancel.is_cancelled() {
            eprintln!("Segmentation manually stopped by user.");
            stopped = true;
            break;
        }
        let frame = frame?;
        let actual = (frame.height(), frame.width());
        if actual != mask.shape() {
            return Err(Error::ShapeMismatch {
                frame: frame_num,
                expected: mask.shape(),
                actual,
            });
        }

        on_frame(frame_num, &frame)?;

        eprintln!("{}", cell_count_message(cells.len(), frame_num));
        for (cell, mean) in measure_frame(&frame, mask, cells, channel)? {
            table.record(cell, frame_num, mean);
        }

        frame_num += 1;
        progress(frame_num);
    }

    table.finish(frame_num);
    Ok(Aggregation {
        table,
        frames: frame_num,
        stopped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FrameIter;
    use approx::assert_relative_eq;

    struct Frames(Vec<Frame>);

    impl FrameSource for Frames {
        fn frames(&self) -> Result<FrameIter<'_>> {
            Ok(Box::new(self.0.iter().cloned().map(Ok)))
        }
    }

    #[test]
    fn new_cells_are_back_filled() {
        let mut table = FluorescenceTable::new();
        table.record(4, 2, 1.5);
        assert_eq!(table.get(4).unwrap(), &[None, None, Some(1.5)]);
    }

    #[test]
    fn frame_without_measurement_pads_existing_rows_only() {
        let mut table = FluorescenceTable::new();
        table.record(1, 0, 10.0);
        // frame 1 measures nothing
        table.finish(2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1).unwrap(), &[Some(10.0), None]);
    }

    #[test]
    fn rows_follow_first_appearance() {
        let mut table = FluorescenceTable::new();
        table.record(9, 0, 1.0);
        table.record(2, 1, 2.0);
        table.record(9, 1, 3.0);
        let ids: Vec<u32> = table.rows().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![9, 2]);
    }

    #[test]
    fn rounding_keeps_four_decimals() {
        assert_eq!(round4(1.0 / 3.0), 0.3333);
        assert_eq!(round4(2.0 / 3.0), 0.6667);
        assert_eq!(round4(12.0), 12.0);
    }

    #[test]
    fn measure_averages_selected_channel_per_label() {
        let frame = Frame::from_rgb(
            3,
            1,
            vec![0, 10, 0, 0, 20, 0, 0, 7, 0],
        )
        .unwrap();
        let mask = LabelMask::from_vec(3, 1, vec![1, 1, 2]).unwrap();
        let means = measure_frame(&frame, &mask, &mask.cell_ids(), 1).unwrap();
        assert_eq!(means, vec![(1, 15.0), (2, 7.0)]);
        let reds = measure_frame(&frame, &mask, &mask.cell_ids(), 0).unwrap();
        assert_eq!(reds, vec![(1, 0.0), (2, 0.0)]);
    }

    #[test]
    fn frame_log_reports_cell_count() {
        assert_eq!(cell_count_message(2, 7), "Detected 2 cell(s) in frame 7");
        assert_eq!(
            cell_count_message(0, 3),
            "Warning: No cells detected in frame 3"
        );
    }

    #[test]
    fn aggregate_builds_rectangular_table() {
        let mask = LabelMask::from_vec(2, 2, vec![1, 1, 0, 2]).unwrap();
        let frames = Frames(vec![
            Frame::from_gray(2, 2, vec![1, 2, 100, 3]).unwrap(),
            Frame::from_gray(2, 2, vec![4, 4, 100, 9]).unwrap(),
        ]);
        let mut seen = Vec::new();
        let result = aggregate(
            &frames,
            &mask,
            &mask.cell_ids(),
            0,
            FluorescenceTable::new(),
            &CancelToken::new(),
            |t, _| {
                seen.push(t);
                Ok(())
            },
            &|_| {},
        )
        .unwrap();
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(result.frames, 2);
        assert!(!result.stopped);
        let one = result.table.get(1).unwrap();
        assert_relative_eq!(one[0].unwrap(), 1.5);
        assert_relative_eq!(one[1].unwrap(), 4.0);
        assert_eq!(result.table.get(2).unwrap(), &[Some(3.0), Some(9.0)]);
    }

    #[test]
    fn cancelled_token_stops_before_next_frame() {
        let mask = LabelMask::from_vec(1, 1, vec![1]).unwrap();
        let frames = Frames((0..5).map(|v| Frame::from_gray(1, 1, vec![v]).unwrap()).collect());
        let cancel = CancelToken::new();
        let result = aggregate(
            &frames,
            &mask,
            &mask.cell_ids(),
            0,
            FluorescenceTable::new(),
            &cancel,
            |t, _| {
                if t == 1 {
                    cancel.cancel();
                }
                Ok(())
            },
            &|_| {},
        )
        .unwrap();
        assert!(result.stopped);
        assert_eq!(result.frames, 2);
        assert_eq!(result.table.get(1).unwrap(), &[Some(0.0), Some(1.0)]);
    }

    #[test]
    fn stop_file_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let stop = dir.path().join("stop");
        let token = CancelToken::with_stop_file(stop.clone());
        assert!(!token.is_cancelled());
        std::fs::write(&stop, b"").unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn mismatched_frame_shape_is_fatal() {
        let mask = LabelMask::from_vec(2, 1, vec![1, 1]).unwrap();
        let frames = Frames(vec![Frame::from_gray(1, 1, vec![3]).unwrap()]);
        let err = aggregate(
            &frames,
            &mask,
            &mask.cell_ids(),
            0,
            FluorescenceTable::new(),
            &CancelToken::new(),
            |_, _| Ok(()),
            &|_| {},
        )
        .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { frame: 0, .. }));
    }

    #[test]
    fn empty_mask_still_counts_frames() {
        let mask = LabelMask::from_vec(1, 1, vec![0]).unwrap();
        let frames = Frames(vec![
            Frame::from_gray(1, 1, vec![3]).unwrap(),
            Frame::from_gray(1, 1, vec![4]).unwrap(),
        ]);
        let result = aggregate(
            &frames,
            &mask,
            &mask.cell_ids(),
            0,
            FluorescenceTable::new(),
            &CancelToken::new(),
            |_, _| Ok(()),
            &|_| {},
        )
        .unwrap();
        assert_eq!(result.frames, 2);
        assert!(result.table.is_empty());
    }
}

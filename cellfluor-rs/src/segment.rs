//! Segmentation: label masks and the Cellpose (ONNX) segmenter.
//!
//! The reference frame is segmented exactly once; the resulting [`LabelMask`]
//! is reused unchanged for every frame of the movie.

use cellpose_rs::{CellposeSession, SegmentParams};
use image::{imageops::FilterType, GrayImage};
use ndarray::Array2;
use std::path::Path;

use crate::error::{Error, Result};

/// Diameter (pixels) the Cellpose model was trained at. Inputs are rescaled by
/// `CELLPOSE_DIAMETER / diameter` before inference.
pub const CELLPOSE_DIAMETER: f32 = 30.0;

/// Integer label image: 0 = background, 1..N = cells.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMask {
    labels: Array2<u32>,
}

impl LabelMask {
    pub fn new(labels: Array2<u32>) -> Self {
        Self { labels }
    }

    pub fn from_vec(width: usize, height: usize, labels: Vec<u32>) -> Result<Self> {
        Ok(Self::new(Array2::from_shape_vec((height, width), labels)?))
    }

    pub fn height(&self) -> usize {
        self.labels.nrows()
    }

    pub fn width(&self) -> usize {
        self.labels.ncols()
    }

    /// (height, width)
    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    pub fn labels(&self) -> &Array2<u32> {
        &self.labels
    }

    pub fn max_label(&self) -> u32 {
        self.labels.iter().copied().max().unwrap_or(0)
    }

    /// Distinct non-zero labels in ascending order.
    pub fn cell_ids(&self) -> Vec<u32> {
        let mut seen = vec![false; self.max_label() as usize + 1];
        for &lbl in self.labels.iter() {
            seen[lbl as usize] = true;
        }
        seen.iter()
            .enumerate()
            .skip(1)
            .filter_map(|(lbl, &present)| present.then_some(lbl as u32))
            .collect()
    }

    /// 255 where a cell is, 0 elsewhere.
    pub fn foreground(&self) -> GrayImage {
        let data: Vec<u8> = self
            .labels
            .iter()
            .map(|&lbl| if lbl > 0 { 255 } else { 0 })
            .collect();
        GrayImage::from_raw(self.width() as u32, self.height() as u32, data)
            .unwrap_or_else(|| GrayImage::new(self.width() as u32, self.height() as u32))
    }
}

pub trait Segmenter {
    /// Segment one grayscale image with the given expected cell diameter (pixels).
    fn segment(&mut self, image: &GrayImage, diameter: f32) -> Result<LabelMask>;
}

pub struct CellposeSegmenter {
    session: CellposeSession,
    batch_size: usize,
}

impl CellposeSegmenter {
    /// Load `<model_dir>/model.onnx`.
    pub fn new(model_dir: &Path, cpu: bool, batch_size: usize) -> Result<Self> {
        let model_file = model_dir.join("model.onnx");
        if !model_file.exists() {
            return Err(Error::ModelNotFound(model_file));
        }
        let session = CellposeSession::new(&model_file, cpu)
            .map_err(|e| Error::Segmentation(e.to_string()))?;
        Ok(Self {
            session,
            batch_size: batch_size.max(1),
        })
    }
}

impl Segmenter for CellposeSegmenter {
    fn segment(&mut self, image: &GrayImage, diameter: f32) -> Result<LabelMask> {
        let (w, h) = image.dimensions();
        let (sw, sh) = scaled_dims(w, h, diameter);
        let scaled = if (sw, sh) == (w, h) {
            image.clone()
        } else {
            image::imageops::resize(image, sw, sh, FilterType::Triangle)
        };

        let plane: Vec<f32> = scaled.as_raw().iter().map(|&v| v as f32).collect();
        let chw = cellpose_rs::preprocess::build_chw_image(
            plane.clone(),
            plane,
            sh as usize,
            sw as usize,
        );

        let params = SegmentParams {
            batch_size: self.batch_size,
            ..Default::default()
        };
        let masks = self
            .session
            .segment(&chw, sh as usize, sw as usize, params)
            .map_err(|e| Error::Segmentation(e.to_string()))?;
        if masks.len() != (sw * sh) as usize {
            return Err(Error::Segmentation(format!(
                "model returned {} labels for a {}x{} image",
                masks.len(),
                sw,
                sh
            )));
        }

        let labels = resize_labels_nearest(&masks, sw as usize, sh as usize, w as usize, h as usize);
        LabelMask::from_vec(w as usize, h as usize, labels)
    }
}

/// Image size after rescaling for `diameter`. Never below 1x1.
pub fn scaled_dims(width: u32, height: u32, diameter: f32) -> (u32, u32) {
    if !(diameter > 0.0) {
        return (width, height);
    }
    let scale = CELLPOSE_DIAMETER / diameter;
    let sw = ((width as f32 * scale).round() as u32).max(1);
    let sh = ((height as f32 * scale).round() as u32).max(1);
    (sw, sh)
}

/// Map labels from a (src_w, src_h) grid onto (dst_w, dst_h) by nearest neighbour.
pub fn resize_labels_nearest(
    labels: &[u32],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u32> {
    let mut out = vec![0u32; dst_w * dst_h];
    for y in 0..dst_h {
        let sy = ((y as f64 + 0.5) * src_h as f64 / dst_h as f64) as usize;
        let sy = sy.min(src_h - 1);
        for x in 0..dst_w {
            let sx = ((x as f64 + 0.5) * src_w as f64 / dst_w as f64) as usize;
            out[y * dst_w + x] = labels[sy * src_w + sx.min(src_w - 1)];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_ids_are_distinct_sorted_and_skip_background() {
        let mask = LabelMask::from_vec(3, 2, vec![0, 3, 3, 1, 0, 1]).unwrap();
        assert_eq!(mask.cell_ids(), vec![1, 3]);
        assert_eq!(mask.max_label(), 3);
        assert_eq!(mask.shape(), (2, 3));
    }

    #[test]
    fn empty_mask_has_no_cells() {
        let mask = LabelMask::from_vec(2, 2, vec![0; 4]).unwrap();
        assert!(mask.cell_ids().is_empty());
    }

    #[test]
    fn foreground_is_binary() {
        let mask = LabelMask::from_vec(3, 1, vec![0, 2, 7]).unwrap();
        assert_eq!(mask.foreground().as_raw(), &vec![0, 255, 255]);
    }

    #[test]
    fn diameter_rescales_around_training_size() {
        assert_eq!(scaled_dims(100, 50, 30.0), (100, 50));
        assert_eq!(scaled_dims(100, 50, 15.0), (200, 100));
        assert_eq!(scaled_dims(100, 50, 60.0), (50, 25));
        assert_eq!(scaled_dims(1, 1, 1000.0), (1, 1));
    }

    #[test]
    fn nearest_resize_round_trips_block_labels() {
        let small = vec![1, 2, 3, 4];
        let big = resize_labels_nearest(&small, 2, 2, 4, 4);
        assert_eq!(
            big,
            vec![1, 1, 2, 2, 1, 1, 2, 2, 3, 3, 4, 4, 3, 3, 4, 4]
        );
        assert_eq!(resize_labels_nearest(&big, 4, 4, 2, 2), small);
    }
}

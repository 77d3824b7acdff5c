//! Per-frame PNG artifacts: binary masks, contour overlays and a debug frame.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::frame::Frame;
use crate::segment::LabelMask;

pub const DEFAULT_OUTPUT_DIR: &str = "cellpose_segmented_frames";
pub const DEBUG_FRAME_NAME: &str = "debug_enhanced_frame.png";
pub const CONTOUR_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const CONTOUR_WIDTH: u32 = 2;

pub fn mask_name(t: usize) -> String {
    format!("mask_{:04}.png", t)
}

pub fn overlay_name(t: usize) -> String {
    format!("frame_{:04}.png", t)
}

pub struct ArtifactWriter {
    dir: PathBuf,
    channel: usize,
    foreground: GrayImage,
}

impl ArtifactWriter {
    /// Creates `dir` if needed. The mask is fixed, so its foreground image is built once.
    pub fn new(dir: &Path, mask: &LabelMask, channel: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            channel,
            foreground: mask.foreground(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the debug frame, `mask_{t}.png` and `frame_{t}.png`.
    pub fn write_frame(&self, t: usize, frame: &Frame) -> Result<()> {
        self.write_debug(frame)?;
        self.foreground.save(self.dir.join(mask_name(t)))?;
        let overlay = draw_outlines(frame.to_rgb_image(self.channel)?, &self.foreground);
        overlay.save(self.dir.join(overlay_name(t)))?;
        Ok(())
    }

    /// Overwritten on every frame.
    fn write_debug(&self, frame: &Frame) -> Result<()> {
        let path = self.dir.join(DEBUG_FRAME_NAME);
        if frame.channels() == 3 {
            frame.to_rgb_image(self.channel)?.save(path)?;
        } else {
            frame.channel_image(self.channel)?.save(path)?;
        }
        Ok(())
    }
}

/// Draw the outermost contours of `foreground` onto `image`.
pub fn draw_outlines(mut image: RgbImage, foreground: &GrayImage) -> RgbImage {
    let contours = find_contours::<u32>(foreground);
    for contour in contours
        .iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
    {
        // Stroke centred on the contour: one pixel outside, one on it.
        for p in &contour.points {
            let rect =
                Rect::at(p.x as i32 - 1, p.y as i32 - 1).of_size(CONTOUR_WIDTH, CONTOUR_WIDTH);
            draw_filled_rect_mut(&mut image, rect, CONTOUR_COLOR);
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mask() -> LabelMask {
        // 8x8 with one 4x4 cell at (2..6, 2..6).
        let mut labels = vec![0u32; 64];
        for y in 2..6 {
            for x in 2..6 {
                labels[y * 8 + x] = 1;
            }
        }
        LabelMask::from_vec(8, 8, labels).unwrap()
    }

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(mask_name(0), "mask_0000.png");
        assert_eq!(overlay_name(42), "frame_0042.png");
    }

    #[test]
    fn outline_touches_border_but_not_background_far_away() {
        let mask = square_mask();
        let image = RgbImage::new(8, 8);
        let out = draw_outlines(image, &mask.foreground());
        assert_eq!(*out.get_pixel(2, 2), CONTOUR_COLOR);
        assert_eq!(*out.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(7, 7), Rgb([0, 0, 0]));
    }

    #[test]
    fn stroke_straddles_the_contour() {
        let mask = square_mask();
        let out = draw_outlines(RgbImage::new(8, 8), &mask.foreground());
        // Corner (2, 2) spills one pixel outward.
        assert_eq!(*out.get_pixel(1, 1), CONTOUR_COLOR);
        assert_eq!(*out.get_pixel(1, 3), CONTOUR_COLOR);
        // Nothing past the far edge, interior untouched.
        assert_eq!(*out.get_pixel(6, 6), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(3, 3), Rgb([0, 0, 0]));
    }

    #[test]
    fn empty_mask_leaves_frame_untouched() {
        let mask = LabelMask::from_vec(4, 4, vec![0; 16]).unwrap();
        let image = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        let out = draw_outlines(image.clone(), &mask.foreground());
        assert_eq!(out, image);
    }

    #[test]
    fn writes_mask_overlay_and_debug_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("frames");
        let mask = square_mask();
        let writer = ArtifactWriter::new(&out, &mask, 0).unwrap();
        let frame = Frame::from_gray(8, 8, vec![50; 64]).unwrap();
        writer.write_frame(0, &frame).unwrap();
        writer.write_frame(1, &frame).unwrap();

        let saved = image::open(out.join("mask_0001.png")).unwrap().into_luma8();
        assert_eq!(saved.get_pixel(3, 3).0, [255]);
        assert_eq!(saved.get_pixel(0, 0).0, [0]);
        assert!(out.join("frame_0000.png").exists());
        assert!(out.join("frame_0001.png").exists());
        assert!(out.join(DEBUG_FRAME_NAME).exists());
    }
}

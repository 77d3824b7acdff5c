//! In-memory frames: `(height, width, channels)` 8-bit pixel arrays.

use image::{GrayImage, RgbImage};
use ndarray::{Array3, ArrayView2, Axis};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pixels: Array3<u8>,
}

impl Frame {
    pub fn new(pixels: Array3<u8>) -> Self {
        Self { pixels }
    }

    /// Single-channel frame from row-major data.
    pub fn from_gray(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        Ok(Self::new(Array3::from_shape_vec((height, width, 1), data)?))
    }

    /// Three-channel frame from packed RGB24 data.
    pub fn from_rgb(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        Ok(Self::new(Array3::from_shape_vec((height, width, 3), data)?))
    }

    /// Frame from planar 16-bit channels (one row-major plane per channel).
    /// Each plane is min-max rescaled to 0-255 on its own.
    pub fn from_planes_u16(width: usize, height: usize, planes: &[Vec<u16>]) -> Result<Self> {
        let n = width * height;
        let mut data = vec![0u8; n * planes.len()];
        for (c, plane) in planes.iter().enumerate() {
            if plane.len() != n {
                return Err(Error::Nd2(format!(
                    "channel {} has {} pixels, expected {}",
                    c,
                    plane.len(),
                    n
                )));
            }
            for (i, v) in normalize_frame(plane).into_iter().enumerate() {
                data[i * planes.len() + c] = v;
            }
        }
        Ok(Self::new(Array3::from_shape_vec(
            (height, width, planes.len()),
            data,
        )?))
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn channels(&self) -> usize {
        self.pixels.shape()[2]
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// View of one channel plane. Errors when `channel` is past the last channel.
    pub fn channel(&self, channel: usize) -> Result<ArrayView2<'_, u8>> {
        if channel >= self.channels() {
            return Err(Error::ChannelOutOfRange {
                channel,
                channels: self.channels(),
            });
        }
        Ok(self.pixels.index_axis(Axis(2), channel))
    }

    /// Mean pixel value of one channel.
    pub fn mean(&self, channel: usize) -> Result<f64> {
        let plane = self.channel(channel)?;
        if plane.is_empty() {
            return Ok(0.0);
        }
        let sum: u64 = plane.iter().map(|&v| v as u64).sum();
        Ok(sum as f64 / plane.len() as f64)
    }

    pub fn channel_image(&self, channel: usize) -> Result<GrayImage> {
        let plane = self.channel(channel)?;
        let data: Vec<u8> = plane.iter().copied().collect();
        GrayImage::from_raw(self.width() as u32, self.height() as u32, data)
            .ok_or_else(|| Error::InvalidInput("frame buffer does not match its shape".into()))
    }

    /// RGB rendition: 3-channel frames as-is, anything else shows `channel` as gray.
    pub fn to_rgb_image(&self, channel: usize) -> Result<RgbImage> {
        let data: Vec<u8> = if self.channels() == 3 {
            self.pixels.iter().copied().collect()
        } else {
            self.channel(channel)?
                .iter()
                .flat_map(|&v| [v, v, v])
                .collect()
        };
        RgbImage::from_raw(self.width() as u32, self.height() as u32, data)
            .ok_or_else(|| Error::InvalidInput("frame buffer does not match its shape".into()))
    }
}

/// Min-max normalize uint16 frame to 0-255.
pub fn normalize_frame(data: &[u16]) -> Vec<u8> {
    if data.is_empty() {
        return vec![];
    }
    let (min, max) = data
        .iter()
        .fold((data[0], data[0]), |(min, max), &v| (min.min(v), max.max(v)));
    let range = (max - min) as f64;
    data.iter()
        .map(|&v| {
            if range > 0.0 {
                (((v - min) as f64 / range) * 255.0).round() as u8
            } else {
                0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_stretches_to_full_range() {
        assert_eq!(normalize_frame(&[100, 150, 200]), vec![0, 128, 255]);
    }

    #[test]
    fn normalize_constant_frame_is_black() {
        assert_eq!(normalize_frame(&[7, 7, 7]), vec![0, 0, 0]);
        assert!(normalize_frame(&[]).is_empty());
    }

    #[test]
    fn each_plane_is_rescaled_on_its_own() {
        let frame = Frame::from_planes_u16(2, 1, &[vec![0, 100], vec![0, 1000]]).unwrap();
        assert_eq!(frame.channels(), 2);
        assert_eq!(frame.channel(0).unwrap().iter().copied().collect::<Vec<_>>(), vec![0, 255]);
        assert_eq!(frame.channel(1).unwrap().iter().copied().collect::<Vec<_>>(), vec![0, 255]);
    }

    #[test]
    fn brighter_neighbour_channel_leaves_plane_unchanged() {
        let dim = Frame::from_planes_u16(3, 1, &[vec![10, 20, 30], vec![0, 1, 2]]).unwrap();
        let bright = Frame::from_planes_u16(3, 1, &[vec![10, 20, 30], vec![0, 60000, 2]]).unwrap();
        assert_eq!(dim.channel(0).unwrap(), bright.channel(0).unwrap());
        assert_eq!(dim.mean(0).unwrap(), bright.mean(0).unwrap());
    }

    #[test]
    fn mean_uses_selected_channel() {
        let frame = Frame::from_rgb(2, 1, vec![10, 20, 30, 10, 40, 30]).unwrap();
        assert_eq!(frame.mean(1).unwrap(), 30.0);
        assert!(matches!(
            frame.mean(3),
            Err(Error::ChannelOutOfRange { channel: 3, channels: 3 })
        ));
    }

    #[test]
    fn gray_frame_renders_as_gray_rgb() {
        let frame = Frame::from_gray(2, 1, vec![5, 9]).unwrap();
        let rgb = frame.to_rgb_image(0).unwrap();
        assert_eq!(rgb.get_pixel(1, 0).0, [9, 9, 9]);
    }
}

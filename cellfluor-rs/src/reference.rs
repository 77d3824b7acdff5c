//! Reference frame selection: the brightest frame drives the one-time segmentation.

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::source::FrameSource;

#[derive(Debug, Clone)]
pub struct Reference {
    pub frame: Frame,
    pub index: usize,
    pub brightness: f64,
    /// Number of frames seen during the scan.
    pub frame_count: usize,
}

/// Scan every frame once and keep the first one with the highest mean of `channel`.
pub fn select_reference(
    source: &dyn FrameSource,
    channel: usize,
    progress: &impl Fn(usize),
) -> Result<Reference> {
    let mut best: Option<(usize, f64, Frame)> = None;
    let mut count = 0usize;

    for (i, frame) in source.frames()?.enumerate() {
        let frame = frame?;
        let brightness = frame.mean(channel)?;
        let brighter = match &best {
            Some((_, max, _)) => brightness > *max,
            None => true,
        };
        if brighter {
            best = Some((i, brightness, frame));
        }
        count = i + 1;
        progress(count);
    }

    let (index, brightness, frame) = best.ok_or(Error::NoReferenceFrame)?;
    Ok(Reference {
        frame,
        index,
        brightness,
        frame_count: count,
    })
}

//! Frame sources: ND2 containers via nd2-rs, everything else through ffmpeg.
//!
//! Every call to [`FrameSource::frames`] starts a fresh pass from the first frame.

use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::OutputVideoFrame;
use nd2_rs::Nd2File;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::frame::Frame;

pub type FrameIter<'a> = Box<dyn Iterator<Item = Result<Frame>> + 'a>;

pub trait FrameSource {
    /// Iterate all frames in temporal order, starting from the first.
    fn frames(&self) -> Result<FrameIter<'_>>;
}

/// Fails with `NotFound` / `PermissionDenied` unless `path` can be opened for reading.
pub fn check_readable(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }
    match fs::File::open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            Err(Error::PermissionDenied(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn is_nd2(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("nd2"))
}

/// Pick the reader by extension after checking the file is there and readable.
pub fn open_source(path: &Path, ffmpeg: Option<&Path>) -> Result<Box<dyn FrameSource>> {
    check_readable(path)?;
    if is_nd2(path) {
        Ok(Box::new(Nd2Source::new(path)))
    } else {
        Ok(Box::new(VideoSource::new(path, ffmpeg)))
    }
}

// ---------------------------------------------------------------------------
// ND2
// ---------------------------------------------------------------------------

/// Reads position 0, z 0 of every time point; all channels go into one frame.
pub struct Nd2Source {
    path: PathBuf,
}

impl Nd2Source {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

struct Nd2Frames {
    nd2: Nd2File,
    t: usize,
    n_time: usize,
    n_chan: usize,
    height: usize,
    width: usize,
}

impl Nd2Frames {
    fn read(&mut self, t: usize) -> Result<Frame> {
        let mut planes = Vec::with_capacity(self.n_chan);
        for c in 0..self.n_chan {
            let plane = self
                .nd2
                .read_frame_2d(0, t, c, 0)
                .map_err(|e| Error::Nd2(format!("frame t={} c={}: {}", t, c, e)))?;
            planes.push(plane);
        }
        Frame::from_planes_u16(self.width, self.height, &planes)
    }
}

impl Iterator for Nd2Frames {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.t >= self.n_time {
            return None;
        }
        let t = self.t;
        self.t += 1;
        Some(self.read(t))
    }
}

impl FrameSource for Nd2Source {
    fn frames(&self) -> Result<FrameIter<'_>> {
        let mut nd2 = Nd2File::open(&self.path).map_err(|e| Error::Nd2(e.to_string()))?;
        let sizes = nd2.sizes().map_err(|e| Error::Nd2(e.to_string()))?;

        let n_time = *sizes.get("T").unwrap_or(&1);
        let n_chan = *sizes.get("C").unwrap_or(&1);
        let height = *sizes.get("Y").unwrap_or(&1);
        let width = *sizes.get("X").unwrap_or(&1);

        Ok(Box::new(Nd2Frames {
            nd2,
            t: 0,
            n_time,
            n_chan,
            height,
            width,
        }))
    }
}

// ---------------------------------------------------------------------------
// Generic video (ffmpeg)
// ---------------------------------------------------------------------------

/// Decodes any ffmpeg-readable container to RGB24. Frames are already 8-bit.
pub struct VideoSource {
    path: PathBuf,
    ffmpeg: Option<PathBuf>,
}

impl VideoSource {
    pub fn new(path: &Path, ffmpeg: Option<&Path>) -> Self {
        Self {
            path: path.to_path_buf(),
            ffmpeg: ffmpeg.map(Path::to_path_buf),
        }
    }
}

struct VideoFrames {
    child: FfmpegChild,
    frames: Box<dyn Iterator<Item = OutputVideoFrame>>,
}

impl Iterator for VideoFrames {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let f = self.frames.next()?;
        Some(Frame::from_rgb(f.width as usize, f.height as usize, f.data))
    }
}

impl Drop for VideoFrames {
    fn drop(&mut self) {
        // ffmpeg may still be writing if the pass stopped early.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl FrameSource for VideoSource {
    fn frames(&self) -> Result<FrameIter<'_>> {
        let mut command = match &self.ffmpeg {
            Some(bin) => FfmpegCommand::new_with_path(bin),
            None => FfmpegCommand::new(),
        };
        let mut child = command
            .input(self.path.to_string_lossy())
            .rawvideo()
            .spawn()
            .map_err(|e| Error::Video(format!("failed to start ffmpeg: {}", e)))?;
        let frames = child
            .iter()
            .map_err(|e| Error::Video(e.to_string()))?
            .filter_frames();

        Ok(Box::new(VideoFrames {
            child,
            frames: Box::new(frames),
        }))
    }
}

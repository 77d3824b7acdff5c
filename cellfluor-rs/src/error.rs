//! Error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for cellfluor operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Video file not found at: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Video file is not readable: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Failed to find a valid frame for mask generation.")]
    NoReferenceFrame,

    /// Interactive input was requested but there is no terminal to ask on.
    #[error("interactive input unavailable: {0}")]
    InteractiveUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("Channel {channel} out of range (frame has {channels} channel(s))")]
    ChannelOutOfRange { channel: usize, channels: usize },

    #[error("frame {frame} is {actual:?} (h, w) but the mask is {expected:?}")]
    ShapeMismatch {
        frame: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Model not found at {}. Export with: python scripts/export_onnx.py", .0.display())]
    ModelNotFound(PathBuf),

    #[error("ND2 error: {0}")]
    Nd2(String),

    #[error("video decoding error: {0}")]
    Video(String),

    #[error("segmentation error: {0}")]
    Segmentation(String),

    #[error("plot error: {0}")]
    Plot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

//! cellfluor: segment cells once on the brightest frame of a microscopy movie,
//! then track each cell's mean fluorescence through every frame.

pub mod artifacts;
pub mod error;
pub mod export;
pub mod fluorescence;
pub mod frame;
pub mod params;
pub mod pipeline;
pub mod plot;
pub mod reference;
pub mod segment;
pub mod source;

pub use error::{Error, Result};

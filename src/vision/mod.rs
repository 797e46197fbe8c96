//! Vision Layer
//!
//! Pixel arithmetic over worksheet images: loading and masking, thin bar
//! detection, connected components, numeric label grouping, boundary
//! tracing and calibrated area. No learned models; OCR is reached only
//! through the label reader.

pub mod area;
pub mod bars;
pub mod boundary;
pub mod codec;
pub mod components;
pub mod labels;
pub mod mask;
pub mod raster;

pub use area::measure_area;
pub use bars::{detect_bars, Bar, Orientation};
pub use boundary::trace_boundary;
pub use codec::{ImageCodec, ImageCrateCodec};
pub use components::{label_components, Component, ComponentFilter};
pub use labels::{find_label_boxes, LabelBox, LabelReader, ValueRange};
pub use mask::{BinaryMask, MarkerColor};
pub use raster::{load_raster, Raster};

//! OCR Layer
//!
//! Text recognition used to turn numeric labels into calibration ground
//! truth. Backends are selected once at startup and reached only through
//! the `OcrWorkerPool`, which keeps one long-lived worker per
//! (language, model path) and serializes requests onto it.
//! Supported backends:
//! - Tesseract executable (`tesseract` on PATH or configured)
//! - Unavailable placeholder that fails every request with a typed error

pub mod pool;
pub mod tesseract;
pub mod tsv;

#[cfg(test)]
pub mod testing;

use serde::Serialize;
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

pub use pool::{OcrWorkerPool, PoolConfig};
pub use tesseract::TesseractBackend;

/// Tesseract page segmentation: sparse text, find as much text as possible
pub const PSM_SPARSE_TEXT: u32 = 11;
/// Tesseract page segmentation: treat the image as a single text line
pub const PSM_SINGLE_LINE: u32 = 7;

/// Pixel box (x, y, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Smallest box covering both
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        BoundingBox {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }
}

/// A recognized word
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrWord {
    pub text: String,
    pub bbox: BoundingBox,
    /// Recognizer confidence (0 - 100)
    pub confidence: f32,
}

/// A recognized line of words in reading order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrLine {
    pub text: String,
    pub bbox: BoundingBox,
    /// Mean word confidence (0 - 100)
    pub confidence: f32,
    pub words: Vec<OcrWord>,
}

/// Result of one recognition request
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OcrOutput {
    pub text: String,
    /// Mean word confidence (0 - 100), 0 when nothing was recognized
    pub confidence: f32,
    pub words: Vec<OcrWord>,
    pub lines: Vec<OcrLine>,
}

impl OcrOutput {
    /// Drop the layout levels the caller did not ask for
    pub fn restrict(mut self, flags: OutputFlags) -> Self {
        if !flags.words {
            self.words.clear();
        }
        if !flags.lines {
            self.lines.clear();
        }
        self
    }
}

/// Which layout levels to return alongside the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFlags {
    pub words: bool,
    pub lines: bool,
}

impl Default for OutputFlags {
    fn default() -> Self {
        Self {
            words: true,
            lines: true,
        }
    }
}

/// Per-request recognizer options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognizeOptions {
    /// Page segmentation mode (`PSM_*`)
    pub psm: Option<u32>,
    /// Restrict output to these characters
    pub whitelist: Option<String>,
    pub output: OutputFlags,
}

/// Pool key: one worker per language and model data directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    pub lang: String,
    pub lang_path: Option<PathBuf>,
}

impl WorkerKey {
    pub fn new(lang: impl Into<String>, lang_path: Option<PathBuf>) -> Self {
        Self {
            lang: lang.into(),
            lang_path,
        }
    }
}

/// Factory for recognition workers
pub trait RecognizerBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Construct a worker for a key; may be slow
    fn create_worker(&self, key: &WorkerKey) -> EngineResult<Box<dyn RecognitionWorker>>;
}

/// A constructed recognizer. Not reentrant: the pool never calls one
/// worker from two threads at once.
pub trait RecognitionWorker: Send {
    fn recognize(&mut self, image_png: &[u8], options: &RecognizeOptions) -> EngineResult<OcrOutput>;
}

/// Backend used when no recognizer is installed
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl RecognizerBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn create_worker(&self, _key: &WorkerKey) -> EngineResult<Box<dyn RecognitionWorker>> {
        Err(EngineError::RecognitionUnavailable(self.reason.clone()))
    }
}

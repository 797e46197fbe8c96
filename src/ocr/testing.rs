//! Scripted recognizer for tests

use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineResult;
use crate::ocr::{
    BoundingBox, OcrOutput, OcrWord, OcrWorkerPool, PoolConfig, RecognitionWorker, RecognizeOptions,
    RecognizerBackend, WorkerKey,
};

type Script = dyn Fn(&image::RgbaImage, &RecognizeOptions) -> Option<(String, f32)> + Send + Sync;

/// Backend whose answers come from a closure over the decoded request image
pub struct ScriptedBackend {
    script: Arc<Script>,
}

impl ScriptedBackend {
    pub fn new(
        script: impl Fn(&image::RgbaImage, &RecognizeOptions) -> Option<(String, f32)> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Arc::new(script),
        }
    }

    /// Pool over this backend with a short idle timeout
    pub fn into_pool(self) -> OcrWorkerPool {
        OcrWorkerPool::new(
            Arc::new(self),
            PoolConfig {
                idle_timeout: Duration::from_millis(200),
                queue_capacity: 4,
            },
        )
    }
}

impl RecognizerBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create_worker(&self, _key: &WorkerKey) -> EngineResult<Box<dyn RecognitionWorker>> {
        Ok(Box::new(ScriptedWorker {
            script: self.script.clone(),
        }))
    }
}

struct ScriptedWorker {
    script: Arc<Script>,
}

impl RecognitionWorker for ScriptedWorker {
    fn recognize(&mut self, image_png: &[u8], options: &RecognizeOptions) -> EngineResult<OcrOutput> {
        let decoded = image::load_from_memory(image_png)?.to_rgba8();
        Ok(match (self.script)(&decoded, options) {
            Some((text, confidence)) => OcrOutput {
                text: text.clone(),
                confidence,
                words: vec![OcrWord {
                    text,
                    bbox: BoundingBox {
                        x: 0,
                        y: 0,
                        width: decoded.width(),
                        height: decoded.height(),
                    },
                    confidence,
                }],
                lines: vec![],
            },
            None => OcrOutput::default(),
        })
    }
}

/// Inclusive bounds of dark pixels in a request image
pub fn ink_bounds(image: &image::RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[0] >= 128 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds
}

/// Width over height of the dark pixels, rounded. Tests draw label
/// "values" as blobs of that aspect so answers survive rescaling.
pub fn ink_aspect_value(image: &image::RgbaImage) -> Option<String> {
    let (x0, y0, x1, y1) = ink_bounds(image)?;
    let aspect = (x1 - x0 + 1) as f64 / (y1 - y0 + 1) as f64;
    Some(format!("{}", aspect.round() as i64))
}

/// Stroke-drawn digits: a mostly hollow box is "7", a solid stroke at
/// least twice as tall as wide is "1", anything else its aspect value.
pub fn stroke_digit(image: &image::RgbaImage) -> Option<String> {
    let (x0, y0, x1, y1) = ink_bounds(image)?;
    let (width, height) = (x1 - x0 + 1, y1 - y0 + 1);
    let ink = image.pixels().filter(|p| p[0] < 128).count();
    if ink * 2 < (width * height) as usize {
        Some("7".to_string())
    } else if height >= 2 * width {
        Some("1".to_string())
    } else {
        ink_aspect_value(image)
    }
}

//! Tesseract executable backend
//!
//! Worker construction checks that the executable runs and that the
//! requested language's model data is installed. Each recognition writes
//! the PNG to a scratch file and parses the TSV layout output.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::ocr::tsv::parse_tsv;
use crate::ocr::{OcrOutput, RecognitionWorker, RecognizeOptions, RecognizerBackend, WorkerKey};

/// Backend driving the `tesseract` command line program
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    binary: PathBuf,
}

impl TesseractBackend {
    /// Probe the executable; fails with `RecognitionUnavailable` if it does not run
    pub fn detect(binary: &Path) -> EngineResult<Self> {
        let output = Command::new(binary).arg("--version").output().map_err(|e| {
            EngineError::RecognitionUnavailable(format!(
                "failed to run {:?} (is tesseract installed?): {}",
                binary, e
            ))
        })?;
        if !output.status.success() {
            return Err(EngineError::RecognitionUnavailable(format!(
                "{:?} --version exited with {}",
                binary, output.status
            )));
        }
        let version = String::from_utf8_lossy(&output.stdout);
        info!(
            "Tesseract available: {}",
            version.lines().next().unwrap_or("unknown version").trim()
        );
        Ok(Self {
            binary: binary.to_path_buf(),
        })
    }

    fn base_command(&self, lang_path: Option<&Path>) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(dir) = lang_path {
            command.arg("--tessdata-dir").arg(dir);
        }
        command
    }
}

impl RecognizerBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn create_worker(&self, key: &WorkerKey) -> EngineResult<Box<dyn RecognitionWorker>> {
        let output = self
            .base_command(key.lang_path.as_deref())
            .arg("--list-langs")
            .output()
            .map_err(|e| EngineError::RecognitionUnavailable(format!("failed to run tesseract: {}", e)))?;

        // --list-langs prints to stdout on 4.x/5.x and to stderr on 3.x
        let listing = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let installed = key
            .lang
            .split('+')
            .all(|lang| listing.lines().any(|line| line.trim() == lang));
        if !installed {
            return Err(EngineError::RecognitionUnavailable(format!(
                "tesseract language data '{}' not installed{}",
                key.lang,
                key.lang_path
                    .as_ref()
                    .map(|p| format!(" in {:?}", p))
                    .unwrap_or_default()
            )));
        }

        debug!("Tesseract worker ready for {:?}", key);
        Ok(Box::new(TesseractWorker {
            backend: self.clone(),
            key: key.clone(),
        }))
    }
}

struct TesseractWorker {
    backend: TesseractBackend,
    key: WorkerKey,
}

impl RecognitionWorker for TesseractWorker {
    fn recognize(&mut self, image_png: &[u8], options: &RecognizeOptions) -> EngineResult<OcrOutput> {
        let mut scratch = tempfile::Builder::new().suffix(".png").tempfile()?;
        scratch.write_all(image_png)?;
        scratch.flush()?;

        let mut command = self.backend.base_command(self.key.lang_path.as_deref());
        command
            .arg(scratch.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.key.lang);
        if let Some(psm) = options.psm {
            command.arg("--psm").arg(psm.to_string());
        }
        if let Some(whitelist) = &options.whitelist {
            command
                .arg("-c")
                .arg(format!("tessedit_char_whitelist={}", whitelist));
        }
        command.arg("tsv");

        let output = command
            .output()
            .map_err(|e| EngineError::Recognition(format!("failed to run tesseract: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Recognition(format!("tesseract failed: {}", stderr.trim())));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

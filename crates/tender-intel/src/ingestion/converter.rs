//! Format conversion collaborator for legacy Word documents

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::config::ConverterConfig;
use crate::error::{Error, Result};

/// A converted document; its working directory is removed on drop
#[derive(Debug)]
pub struct ConvertedFile {
    path: PathBuf,
    _dir: Option<TempDir>,
}

impl ConvertedFile {
    pub fn new(path: PathBuf, dir: Option<TempDir>) -> Self {
        Self { path, _dir: dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Converts a `.doc` file to `.docx`
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, path: &Path) -> Result<ConvertedFile>;

    /// Converter name for logging
    fn name(&self) -> &str;
}

/// Headless LibreOffice conversion
pub struct LibreOfficeConverter {
    binary: String,
    enabled: bool,
    timeout: Duration,
}

/// Interval between exit checks of a running conversion
const POLL_INTERVAL: Duration = Duration::from_millis(100);

impl LibreOfficeConverter {
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            enabled: config.enabled,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    /// Check whether the configured binary can be executed
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl DocumentConverter for LibreOfficeConverter {
    fn convert(&self, path: &Path) -> Result<ConvertedFile> {
        if !self.enabled {
            return Err(Error::conversion("LibreOffice conversion is disabled"));
        }

        let is_doc = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("doc"))
            .unwrap_or(false);
        if !is_doc {
            return Err(Error::conversion(format!(
                "Input file must be .doc: {}",
                path.display()
            )));
        }

        let out_dir = tempfile::Builder::new().prefix("tender-convert-").tempdir()?;
        tracing::debug!(
            "Converting {} to docx in {}",
            path.display(),
            out_dir.path().display()
        );

        let mut child = Command::new(&self.binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg("docx")
            .arg("--outdir")
            .arg(out_dir.path())
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::conversion(format!("Failed to run {}: {}", self.binary, e)))?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(
                        "Conversion of {} timed out after {}s",
                        path.display(),
                        self.timeout.as_secs()
                    );
                    return Err(Error::conversion(format!(
                        "{} timed out after {}s",
                        self.binary,
                        self.timeout.as_secs()
                    )));
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(Error::conversion(format!("Failed to wait for {}: {}", self.binary, e)));
                }
            }
        };

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(Error::conversion(format!(
                "{} exited with {}: {}",
                self.binary,
                status,
                stderr.trim()
            )));
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let converted = out_dir.path().join(format!("{}.docx", stem));
        if !converted.is_file() {
            return Err(Error::conversion(format!(
                "Conversion produced no output: {}",
                converted.display()
            )));
        }

        tracing::info!("Converted {} to docx", path.display());
        Ok(ConvertedFile::new(converted, Some(out_dir)))
    }

    fn name(&self) -> &str {
        "libreoffice"
    }
}

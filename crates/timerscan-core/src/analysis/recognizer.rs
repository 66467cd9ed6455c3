use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use image::{GrayImage, ImageFormat};
use tracing::{debug, warn};

use crate::analysis::{FrameError, TextRecognizer};

/// Characters a timer overlay can contain.
pub const TIMER_WHITELIST: &str = "0123456789:.";

/// Tesseract page segmentation mode "treat the image as a single text line".
const PSM_SINGLE_LINE: &str = "7";

/// Runs the `tesseract` executable once per bitmap, piping a PNG over stdin.
pub struct TesseractCli {
    exe: PathBuf,
    language: String,
    tessdata: Option<PathBuf>,
}

impl TesseractCli {
    pub fn new(language: &str, tessdata: Option<PathBuf>) -> Self {
        Self {
            exe: PathBuf::from("tesseract"),
            language: language.to_string(),
            tessdata,
        }
    }

    pub fn with_executable(mut self, exe: PathBuf) -> Self {
        self.exe = exe;
        self
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, bitmap: &GrayImage) -> Result<String, FrameError> {
        ensure_not_empty(bitmap)?;

        let mut png = Vec::new();
        bitmap
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| FrameError::Recognition(format!("failed to encode bitmap: {e}")))?;

        let mut command = Command::new(&self.exe);
        command
            .args(["stdin", "stdout", "-l", &self.language, "--psm", PSM_SINGLE_LINE])
            .args(["-c", &format!("tessedit_char_whitelist={TIMER_WHITELIST}")]);
        if let Some(dir) = &self.tessdata {
            command.arg("--tessdata-dir").arg(dir);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FrameError::Recognition(format!("failed to spawn tesseract: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .map_err(|e| FrameError::Recognition(format!("failed to write to tesseract: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| FrameError::Recognition(format!("failed to wait for tesseract: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(%stderr, "tesseract exited with an error");
            return Err(FrameError::Recognition(stderr.trim().to_string()));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(text = text.trim(), "tesseract recognized text");
        Ok(text)
    }
}

fn ensure_not_empty(bitmap: &GrayImage) -> Result<(), FrameError> {
    if bitmap.width() == 0 || bitmap.height() == 0 {
        return Err(FrameError::RegionInvalid(format!(
            "empty {}x{} bitmap",
            bitmap.width(),
            bitmap.height()
        )));
    }
    Ok(())
}

#[cfg(feature = "tesseract")]
pub use native::TesseractNative;

#[cfg(feature = "tesseract")]
mod native {
    use image::GrayImage;
    use parking_lot::Mutex;
    use tesseract::Tesseract;
    use tracing::{debug, info};

    use super::{ensure_not_empty, PSM_SINGLE_LINE, TIMER_WHITELIST};
    use crate::analysis::{FrameError, TextRecognizer};

    /// Source resolution reported to tesseract for in-memory frames.
    const SOURCE_PPI: i32 = 96;

    /// In-process tesseract. Engines are not shareable, so each concurrent
    /// call checks one out of an idle pool, creating it on first demand.
    pub struct TesseractNative {
        datapath: Option<String>,
        language: String,
        idle: Mutex<Vec<Tesseract>>,
    }

    impl TesseractNative {
        pub fn new(datapath: Option<String>, language: &str) -> Result<Self, FrameError> {
            let recognizer = Self {
                datapath,
                language: language.to_string(),
                idle: Mutex::new(Vec::new()),
            };
            // Fail early on a missing traineddata file instead of on the first frame.
            let engine = recognizer.create_engine()?;
            recognizer.idle.lock().push(engine);
            info!(language, "tesseract engine initialized");
            Ok(recognizer)
        }

        fn create_engine(&self) -> Result<Tesseract, FrameError> {
            let engine = Tesseract::new(self.datapath.as_deref(), Some(&self.language))
                .map_err(|e| FrameError::Recognition(format!("failed to initialize tesseract: {e}")))?
                .set_variable("tessedit_char_whitelist", TIMER_WHITELIST)
                .map_err(|e| FrameError::Recognition(e.to_string()))?
                .set_variable("tessedit_pageseg_mode", PSM_SINGLE_LINE)
                .map_err(|e| FrameError::Recognition(e.to_string()))?;
            Ok(engine)
        }

        fn checkout(&self) -> Result<Tesseract, FrameError> {
            match self.idle.lock().pop() {
                Some(engine) => Ok(engine),
                None => {
                    debug!("creating additional tesseract engine");
                    self.create_engine()
                }
            }
        }
    }

    impl TextRecognizer for TesseractNative {
        fn recognize(&self, bitmap: &GrayImage) -> Result<String, FrameError> {
            ensure_not_empty(bitmap)?;

            let width = bitmap.width() as i32;
            let height = bitmap.height() as i32;
            let mut engine = self
                .checkout()?
                .set_frame(bitmap.as_raw(), width, height, 1, width)
                .map_err(|e| FrameError::Recognition(e.to_string()))?
                .set_source_resolution(SOURCE_PPI);

            let text = engine
                .get_text()
                .map_err(|e| FrameError::Recognition(e.to_string()))?;
            self.idle.lock().push(engine);

            debug!(text = text.trim(), "tesseract recognized text");
            Ok(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bitmap_is_rejected_before_spawning() {
        let recognizer = TesseractCli::new("eng", None)
            .with_executable(PathBuf::from("/nonexistent/tesseract"));
        let result = recognizer.recognize(&GrayImage::new(0, 10));
        assert!(matches!(result, Err(FrameError::RegionInvalid(_))));
    }

    #[test]
    fn missing_executable_is_a_recognition_failure() {
        let recognizer = TesseractCli::new("eng", None)
            .with_executable(PathBuf::from("/nonexistent/tesseract"));
        let result = recognizer.recognize(&GrayImage::new(8, 8));
        assert!(matches!(result, Err(FrameError::Recognition(_))));
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "timerscan", about = "Reads on-screen timer overlays from long videos")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sample a video once per second and record the timer shown in each sample.
    Extract {
        /// Local video path or any URL ffmpeg can open.
        #[arg(short, long)]
        input: String,

        /// Result journal to create or resume.
        #[arg(short, long)]
        output: PathBuf,

        /// Fraction of the video to start from (0.0 - 1.0).
        #[arg(long, default_value_t = 0.0)]
        start_frac: f64,

        /// Fraction of the video to stop at (0.0 - 1.0).
        #[arg(long, default_value_t = 1.0)]
        end_frac: f64,

        /// Concurrent sampling tasks, each over its own slice of the video.
        #[arg(long, default_value_t = 3)]
        sampling_workers: usize,

        /// Pool threads available for OCR beyond the sampling tasks.
        #[arg(long, default_value_t = 2)]
        processing_workers: usize,

        /// Samples buffered between sampling and OCR.
        #[arg(long, default_value_t = 256)]
        queue_capacity: usize,

        /// Overlay background color as R,G,B.
        #[arg(long, default_value = "21,12,67", value_parser = parse_rgb)]
        color: [u8; 3],

        /// Per-channel tolerance around --color.
        #[arg(long, default_value_t = 15)]
        color_tolerance: u8,

        /// Largest accepted relative perimeter deviation of a candidate region.
        #[arg(long, default_value_t = 0.20)]
        perimeter_tolerance: f64,

        /// Smallest accepted region area as a fraction of the frame.
        #[arg(long, default_value_t = 0.01)]
        min_area: f64,

        /// Radius of the closing applied to the color mask.
        #[arg(long, default_value_t = 1)]
        closing_radius: u8,

        /// Binarization threshold applied to the cropped overlay.
        #[arg(long, default_value_t = 80)]
        threshold: u8,

        /// Start each frame from the box found in the nearest earlier frame.
        #[arg(long)]
        cache_boxes: bool,

        /// Directory to save annotated frames.
        #[arg(long)]
        debug_frames: Option<PathBuf>,

        /// Also save every intermediate image (needs --debug-frames).
        #[arg(long, requires = "debug_frames")]
        record_stages: bool,

        /// TrueType font for annotated frames.
        #[arg(long)]
        font: Option<PathBuf>,

        /// Tesseract language.
        #[arg(long, default_value = "eng")]
        lang: String,

        /// Tesseract traineddata directory.
        #[arg(long)]
        tessdata: Option<PathBuf>,
    },
    /// Write a result journal as CSV.
    Export {
        /// Result journal written by `extract`.
        #[arg(short, long)]
        store: PathBuf,

        /// CSV file to write.
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn parse_rgb(value: &str) -> Result<[u8; 3], String> {
    let parts: Vec<_> = value.split(',').map(str::trim).collect();
    let [r, g, b] = parts.as_slice() else {
        return Err(format!("expected R,G,B, got {value:?}"));
    };
    let channel = |s: &str| {
        s.parse::<u8>()
            .map_err(|e| format!("invalid color channel {s:?}: {e}"))
    };
    Ok([channel(r)?, channel(g)?, channel(b)?])
}

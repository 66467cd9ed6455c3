use std::io::Read;
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::frame::{next_boundary, FrameIndex, RawFrame};
use super::{FrameSource, FrameSourceFactory};

/// Stream metadata obtained by probing with ffprobe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: u64,
}

/// Probe a local path or URL for its first video stream.
pub fn probe(input: &str) -> Result<ProbeResult> {
    info!(input, "probing video metadata with ffprobe");

    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate,nb_frames:format=duration",
            "-of", "default=noprint_wrappers=1",
        ])
        .arg(input)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe — is ffmpeg installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, input, "ffprobe failed");
        bail!("ffprobe failed: {stderr}");
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(&stdout)
}

/// Parse `key=value` lines printed by ffprobe's default writer.
fn parse_probe_output(stdout: &str) -> Result<ProbeResult> {
    let mut width = None;
    let mut height = None;
    let mut fps = None;
    let mut nb_frames = None;
    let mut duration = None;

    for line in stdout.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "width" => width = Some(value.parse::<u32>().context("failed to parse width")?),
            "height" => height = Some(value.parse::<u32>().context("failed to parse height")?),
            "r_frame_rate" => fps = Some(parse_frame_rate(value)?),
            "nb_frames" => nb_frames = value.parse::<u64>().ok(),
            "duration" => duration = value.parse::<f64>().ok(),
            _ => {}
        }
    }

    let (Some(width), Some(height), Some(fps)) = (width, height, fps) else {
        error!(%stdout, "unexpected ffprobe output, expected width, height and r_frame_rate");
        bail!("unexpected ffprobe output: {stdout}");
    };
    if width == 0 || height == 0 {
        bail!("invalid video dimensions: {width}x{height}");
    }
    if fps <= 0.0 {
        bail!("video reports a non-positive frame rate ({fps})");
    }

    let total_frames = match (nb_frames, duration) {
        (Some(n), _) if n > 0 => n,
        (_, Some(d)) if d > 0.0 => (d * fps).round() as u64,
        _ => bail!("video reports neither a frame count nor a duration"),
    };

    info!(width, height, fps, total_frames, "probe completed");
    Ok(ProbeResult {
        width,
        height,
        fps,
        total_frames,
    })
}

fn parse_frame_rate(value: &str) -> Result<f64> {
    if let Some((num, den)) = value.split_once('/') {
        let num: f64 = num.parse().context("failed to parse fps numerator")?;
        let den: f64 = den.parse().context("failed to parse fps denominator")?;
        Ok(if den > 0.0 { num / den } else { 0.0 })
    } else {
        value.parse().context("failed to parse fps")
    }
}

/// ffmpeg `select` filter passing only second-boundary frames, for a decoder
/// whose first frame is `start`.
///
/// Frame `i` is the boundary of second `round(i / fps)` exactly when
/// `round(round(i / fps) * fps) == i`, the same rounding `second_boundary` uses.
fn boundary_filter(start: FrameIndex, fps: f64) -> String {
    format!("select=eq(round(round((n+{start})/{fps})*{fps})\\,n+{start})")
}

/// Decodes video frames by piping raw RGB24 data from the ffmpeg CLI.
///
/// ffmpeg decodes every frame but passes only per-second boundary frames
/// through its `select` filter, so the pipe carries one frame per second of
/// video. Seeking restarts ffmpeg with an input-side `-ss`, so a handle only
/// ever moves forward between seeks.
pub struct FfmpegSource {
    input: String,
    info: ProbeResult,
    child: Option<Child>,
    frame_bytes: usize,
    buf: Vec<u8>,
    next_index: FrameIndex,
    grabbed: Option<FrameIndex>,
}

impl FfmpegSource {
    fn with_probe(input: &str, info: ProbeResult) -> Result<Self> {
        let frame_bytes = (info.width as usize) * (info.height as usize) * 3;
        let mut source = Self {
            input: input.to_string(),
            info,
            child: None,
            frame_bytes,
            buf: vec![0u8; frame_bytes],
            next_index: 0,
            grabbed: None,
        };
        source.spawn_at(0)?;
        Ok(source)
    }

    fn spawn_at(&mut self, frame_index: FrameIndex) -> Result<()> {
        self.kill_child();

        let mut command = Command::new("ffmpeg");
        command.args(["-v", "error"]);
        if frame_index > 0 {
            // Half a frame early, so rounding cannot push the start past the
            // target frame's timestamp.
            let start_seconds = (frame_index as f64 - 0.5) / self.info.fps;
            command.args(["-ss", &format!("{start_seconds:.6}")]);
        }
        command
            .arg("-i")
            .arg(&self.input)
            .args(["-an", "-sn"])
            .arg("-vf")
            .arg(boundary_filter(frame_index, self.info.fps))
            .args(["-fps_mode", "passthrough"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        debug!(input = %self.input, frame_index, "spawning ffmpeg decoder process");
        let child = command
            .spawn()
            .context("failed to spawn ffmpeg — is ffmpeg installed?")?;

        self.child = Some(child);
        self.next_index = frame_index;
        self.grabbed = None;
        Ok(())
    }

    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameSource for FfmpegSource {
    fn frame_rate(&self) -> f64 {
        self.info.fps
    }

    fn total_frames(&self) -> u64 {
        self.info.total_frames
    }

    fn seek(&mut self, frame_index: FrameIndex) -> Result<()> {
        if frame_index == self.next_index && self.grabbed.is_none() {
            return Ok(());
        }
        self.spawn_at(frame_index)
    }

    fn grab(&mut self) -> Result<Option<FrameIndex>> {
        let stdout = self
            .child
            .as_mut()
            .and_then(|c| c.stdout.as_mut())
            .context("ffmpeg stdout not available")?;

        let mut read = 0;
        while read < self.frame_bytes {
            match stdout.read(&mut self.buf[read..]) {
                Ok(0) => {
                    if read == 0 {
                        info!(next_index = self.next_index, "video stream ended");
                        self.grabbed = None;
                        return Ok(None);
                    }
                    error!(
                        read_bytes = read,
                        expected_bytes = self.frame_bytes,
                        frame_index = self.next_index,
                        "ffmpeg stream ended mid-frame"
                    );
                    bail!(
                        "ffmpeg stream ended mid-frame (read {read}/{} bytes)",
                        self.frame_bytes,
                    );
                }
                Ok(n) => read += n,
                Err(e) => {
                    warn!(frame_index = self.next_index, %e, "failed to read from ffmpeg pipe");
                    return Err(e).context("failed to read from ffmpeg pipe");
                }
            }
        }

        let index = next_boundary(self.next_index, self.info.fps);
        self.next_index = index + 1;
        self.grabbed = Some(index);
        Ok(Some(index))
    }

    fn retrieve(&mut self) -> Result<RawFrame> {
        let frame_index = self.grabbed.context("retrieve called before grab")?;
        let image = RgbImage::from_raw(self.info.width, self.info.height, self.buf.clone())
            .context("failed to create RgbImage from raw frame data")?;
        debug!(frame_index, "decoded frame");
        Ok(RawFrame::new(image, frame_index, self.info.fps))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        debug!(next_index = self.next_index, "closing video decoder");
        self.kill_child();
    }
}

/// Opens one ffmpeg process per handle, sharing a single probe of the input.
pub struct FfmpegSourceFactory {
    input: String,
    info: ProbeResult,
}

impl FfmpegSourceFactory {
    pub fn new(input: &str) -> Result<Self> {
        let info = probe(input)?;
        Ok(Self {
            input: input.to_string(),
            info,
        })
    }

    pub fn info(&self) -> ProbeResult {
        self.info
    }
}

impl FrameSourceFactory for FfmpegSourceFactory {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        let source = FfmpegSource::with_probe(&self.input, self.info)?;
        Ok(Box::new(source))
    }
}

use image::RgbImage;

/// Position of a frame within the full video's frame sequence (0-based).
pub type FrameIndex = u64;

/// A single decoded video frame with metadata.
pub struct RawFrame {
    /// The frame's image data.
    pub image: RgbImage,
    /// Absolute frame index from the start of the source.
    pub frame_index: FrameIndex,
    /// Elapsed seconds from the start of the source.
    pub offset_seconds: f64,
}

impl RawFrame {
    pub fn new(image: RgbImage, frame_index: FrameIndex, fps: f64) -> Self {
        let offset_seconds = if fps > 0.0 {
            frame_index as f64 / fps
        } else {
            0.0
        };
        Self {
            image,
            frame_index,
            offset_seconds,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Frame index nearest to a wall-clock offset: `round(offset_ms / 1000 * fps)`.
/// A rate that is not positive maps every offset to frame 0.
pub fn frame_index_at(offset_ms: u64, fps: f64) -> FrameIndex {
    (offset_ms as f64 / 1000.0 * fps.max(0.0)).round() as FrameIndex
}

/// Frame chosen to represent video second `second`: the one decoded nearest
/// the boundary.
pub fn second_boundary(second: u64, fps: f64) -> FrameIndex {
    frame_index_at(second.saturating_mul(1000), fps)
}

/// Smallest second whose boundary frame is at or after `frame_index`.
/// `fps` must be positive.
pub fn first_second(frame_index: FrameIndex, fps: f64) -> u64 {
    let mut second = (frame_index as f64 / fps).floor() as u64;
    while second > 0 && second_boundary(second - 1, fps) >= frame_index {
        second -= 1;
    }
    while second_boundary(second, fps) < frame_index {
        second += 1;
    }
    second
}

/// First second-boundary frame at or after `frame_index`.
pub fn next_boundary(frame_index: FrameIndex, fps: f64) -> FrameIndex {
    second_boundary(first_second(frame_index, fps), fps)
}

/// Wall-clock offset formatted `hhh:mm:ss`, truncating fractional seconds.
pub fn format_offset(offset_seconds: f64) -> String {
    let raw_seconds = offset_seconds.max(0.0) as u64;
    let hours = raw_seconds / 3600;
    let minutes = (raw_seconds / 60) % 60;
    let seconds = raw_seconds % 60;
    format!("{hours:03}:{minutes:02}:{seconds:02}")
}

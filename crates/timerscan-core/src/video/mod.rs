pub mod decoder;
pub mod frame;

use anyhow::Result;

use self::frame::{FrameIndex, RawFrame};

/// A seekable stream of decoded frames.
///
/// Frames are consumed in two steps: `grab` advances past the next frame
/// cheaply, and `retrieve` materialises the frame most recently grabbed.
/// Samplers call `retrieve` only for the frames they keep.
///
/// A source may deliver only some frames, such as one per second of video.
/// `grab` always reports the real index of the frame it lands on.
pub trait FrameSource: Send {
    fn frame_rate(&self) -> f64;

    fn total_frames(&self) -> u64;

    /// Position the stream so the next `grab` yields `frame_index`, or the
    /// first delivered frame after it.
    fn seek(&mut self, frame_index: FrameIndex) -> Result<()>;

    /// Advance to the next delivered frame, returning its index, or `None` at
    /// end of stream.
    fn grab(&mut self) -> Result<Option<FrameIndex>>;

    /// Build the frame most recently returned by `grab`.
    fn retrieve(&mut self) -> Result<RawFrame>;

    /// Grab and retrieve the next frame.
    fn decode_next(&mut self) -> Result<Option<RawFrame>> {
        match self.grab()? {
            Some(_) => self.retrieve().map(Some),
            None => Ok(None),
        }
    }
}

/// Opens independent handles onto the same stream, one per sampling task.
pub trait FrameSourceFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}

impl<F> FrameSourceFactory for F
where
    F: Fn() -> Result<Box<dyn FrameSource>> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        self()
    }
}

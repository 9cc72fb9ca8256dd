//! Decoded frames and the source trait the engine pulls them from.

/// Errors produced while fetching a frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("frame {index} out of range (source holds {len})")]
    OutOfRange { index: usize, len: usize },
    #[error("frame buffer holds {got} bytes, expected {expected}")]
    InvalidBuffer { expected: usize, got: usize },
    #[error("unsupported channel count {0} (expected 1 or 3)")]
    UnsupportedChannels(usize),
    #[error("failed to decode frame {index}: {reason}")]
    Decode { index: usize, reason: String },
}

/// Interleaved 8-bit frame with one (gray) or three (RGB) channels.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        if channels != 1 && channels != 3 {
            return Err(FrameError::UnsupportedChannels(channels));
        }
        let expected = width * height * channels;
        if data.len() != expected {
            return Err(FrameError::InvalidBuffer {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn gray(width: usize, height: usize, data: Vec<u8>) -> Result<Self, FrameError> {
        Self::new(width, height, 1, data)
    }

    pub fn rgb(width: usize, height: usize, data: Vec<u8>) -> Result<Self, FrameError> {
        Self::new(width, height, 3, data)
    }

    /// Grayscale frame from `f(x, y)`.
    pub fn gray_from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            channels: 1,
            data,
        }
    }

    #[inline]
    pub fn channel(&self, x: usize, y: usize, c: usize) -> u8 {
        self.data[(y * self.width + x) * self.channels + c]
    }
}

/// Random-access supplier of decoded frames.
///
/// Frames are pulled lazily, one pair at a time, possibly from several
/// worker threads; implementations must therefore be `Sync`.
pub trait FrameSource: Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn frame(&self, index: usize) -> Result<Frame, FrameError>;
}

impl FrameSource for [Frame] {
    fn len(&self) -> usize {
        <[Frame]>::len(self)
    }

    fn frame(&self, index: usize) -> Result<Frame, FrameError> {
        self.get(index).cloned().ok_or(FrameError::OutOfRange {
            index,
            len: <[Frame]>::len(self),
        })
    }
}

impl FrameSource for Vec<Frame> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn frame(&self, index: usize) -> Result<Frame, FrameError> {
        FrameSource::frame(self.as_slice(), index)
    }
}

use crate::error::FrameError;
use image::GrayImage;

/// Axis-aligned pixel rectangle within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check that this rectangle lies entirely within a width x height frame
    pub fn fits_in(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x + self.width <= frame_width && self.y + self.height <= frame_height
    }
}

/// Owned 8-bit pixel buffer with 1 to 4 interleaved channels
///
/// Pixel data is stored row-major, channels interleaved, matching the layout
/// the processing algorithms flatten frames into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl Frame {
    /// Create a frame from an existing pixel buffer
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self, FrameError> {
        if channels == 0 || channels > 4 {
            return Err(FrameError::UnsupportedChannels { channels });
        }

        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(FrameError::BufferMismatch {
                width,
                height,
                channels,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Create a zero-filled frame
    pub fn zeroed(width: u32, height: u32, channels: u8) -> Result<Self, FrameError> {
        if channels == 0 || channels > 4 {
            return Err(FrameError::UnsupportedChannels { channels });
        }

        Ok(Self {
            width,
            height,
            channels,
            data: vec![0u8; width as usize * height as usize * channels as usize],
        })
    }

    /// Wrap a grayscale image buffer as a single-channel frame
    pub fn from_gray(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            channels: 1,
            data: image.into_raw(),
        }
    }

    /// Convert a single-channel frame into a grayscale image buffer
    pub fn into_gray(self) -> Result<GrayImage, FrameError> {
        if self.channels != 1 {
            return Err(FrameError::NotGrayscale {
                channels: self.channels,
            });
        }

        // from_raw only fails on a length mismatch, which new() has excluded
        Ok(GrayImage::from_raw(self.width, self.height, self.data)
            .expect("frame buffer length invariant violated"))
    }

    /// Borrow the frame as a grayscale image (single-channel frames only)
    pub fn to_gray(&self) -> Result<GrayImage, FrameError> {
        self.clone().into_gray()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frame with no pixels (used as a corruption placeholder by sources)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw interleaved pixel data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the frame, returning the raw pixel buffer
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// Convert to single-channel luma using the standard BT.601 weights
    pub fn to_luma(&self) -> Frame {
        if self.channels == 1 {
            return self.clone();
        }

        let mut luma = Vec::with_capacity(self.width as usize * self.height as usize);
        let c = self.channels as usize;

        for pixel in self.data.chunks_exact(c) {
            let value = if c >= 3 {
                (0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32) as u8
            } else {
                pixel[0]
            };
            luma.push(value);
        }

        Frame {
            width: self.width,
            height: self.height,
            channels: 1,
            data: luma,
        }
    }

    /// Extract one channel as a single-channel frame
    pub fn extract_channel(&self, index: u8) -> Result<Frame, FrameError> {
        if index >= self.channels {
            return Err(FrameError::ChannelOutOfRange {
                index,
                channels: self.channels,
            });
        }

        let c = self.channels as usize;
        let data = self
            .data
            .chunks_exact(c)
            .map(|pixel| pixel[index as usize])
            .collect();

        Ok(Frame {
            width: self.width,
            height: self.height,
            channels: 1,
            data,
        })
    }

    /// Copy a sub-rectangle out into a new frame
    pub fn crop(&self, rect: PixelRect) -> Result<Frame, FrameError> {
        if !rect.fits_in(self.width, self.height) {
            return Err(FrameError::RectOutOfBounds {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                frame_width: self.width,
                frame_height: self.height,
            });
        }

        let c = self.channels as usize;
        let row_bytes = rect.width as usize * c;
        let stride = self.width as usize * c;
        let mut data = Vec::with_capacity(rect.height as usize * row_bytes);

        for row in rect.y..rect.y + rect.height {
            let start = row as usize * stride + rect.x as usize * c;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        Ok(Frame {
            width: rect.width,
            height: rect.height,
            channels: self.channels,
            data,
        })
    }

    /// Paste another frame's pixels at the given offset
    pub fn paste(&mut self, source: &Frame, x: u32, y: u32) -> Result<(), FrameError> {
        let rect = PixelRect::new(x, y, source.width, source.height);
        if !rect.fits_in(self.width, self.height) {
            return Err(FrameError::RectOutOfBounds {
                x,
                y,
                width: source.width,
                height: source.height,
                frame_width: self.width,
                frame_height: self.height,
            });
        }
        if source.channels != self.channels {
            return Err(FrameError::UnsupportedChannels {
                channels: source.channels,
            });
        }

        let c = self.channels as usize;
        let row_bytes = source.width as usize * c;
        let stride = self.width as usize * c;

        for row in 0..source.height as usize {
            let dst_start = (y as usize + row) * stride + x as usize * c;
            let src_start = row * row_bytes;
            self.data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&source.data[src_start..src_start + row_bytes]);
        }

        Ok(())
    }
}

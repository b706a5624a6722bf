//! Owned frame buffers.
//!
//! - `Frame`: pixel data plus dimensions, interleaved RGB or single-channel gray.
//! - `ChannelPolicy`: which plane of a captured frame is kept on disk.
//!
//! Channel order is RGB, so the red channel is always channel 0.

use anyhow::{anyhow, Result};

/// Index of the red channel in an `Rgb8` frame.
pub const RED_CHANNEL: usize = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb8,
    Gray8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Gray8 => 1,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(layout.channels()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                layout,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }

    pub fn rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, PixelLayout::Rgb8, data)
    }

    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, PixelLayout::Gray8, data)
    }

    /// Build a frame whose dimensions are already known to match `data`.
    pub(crate) fn from_parts(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * layout.channels()
        );
        Self {
            width,
            height,
            layout,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Channel values of the pixel at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let c = self.layout.channels();
        let offset = (y as usize * self.width as usize + x as usize) * c;
        Some(&self.data[offset..offset + c])
    }

    /// Copy one channel out as a gray frame. Gray frames return themselves.
    pub fn extract_channel(&self, channel: usize) -> Result<Frame> {
        let c = self.layout.channels();
        if channel >= c {
            return Err(anyhow!(
                "channel {} out of range for {:?} frame",
                channel,
                self.layout
            ));
        }
        if c == 1 {
            return Ok(self.clone());
        }
        let plane = self.data.iter().skip(channel).step_by(c).copied().collect();
        Ok(Frame::from_parts(
            self.width,
            self.height,
            PixelLayout::Gray8,
            plane,
        ))
    }
}

// Frames are large; Debug prints the shape only.
impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Post-processing applied to every captured frame before it is persisted.
///
/// The rig only keeps the red plane; there is no per-camera policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelPolicy {
    #[default]
    RedOnly,
}

impl ChannelPolicy {
    pub fn apply(self, frame: &Frame) -> Result<Frame> {
        match self {
            ChannelPolicy::RedOnly => frame.extract_channel(RED_CHANNEL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        assert!(Frame::rgb(2, 2, vec![0u8; 11]).is_err());
        assert!(Frame::gray(2, 2, vec![0u8; 4]).is_ok());
    }

    #[test]
    fn pixel_lookup_respects_bounds() -> Result<()> {
        let frame = Frame::rgb(2, 1, vec![1, 2, 3, 4, 5, 6])?;
        assert_eq!(frame.pixel(1, 0), Some(&[4u8, 5, 6][..]));
        assert_eq!(frame.pixel(2, 0), None);
        Ok(())
    }

    #[test]
    fn red_only_policy_keeps_first_plane() -> Result<()> {
        let frame = Frame::rgb(2, 1, vec![10, 20, 30, 40, 50, 60])?;
        let red = ChannelPolicy::RedOnly.apply(&frame)?;
        assert_eq!(red.layout(), PixelLayout::Gray8);
        assert_eq!(red.as_bytes(), &[10, 40]);
        Ok(())
    }

    #[test]
    fn extracting_from_gray_is_identity() -> Result<()> {
        let frame = Frame::gray(3, 1, vec![7, 8, 9])?;
        assert_eq!(frame.extract_channel(0)?, frame);
        assert!(frame.extract_channel(1).is_err());
        Ok(())
    }
}

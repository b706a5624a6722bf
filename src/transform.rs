//! Per-frame transforms used by the live preview.
//!
//! All functions are pure: they take a frame and return a new one. The only
//! shared state is `ExposureCheck`, which the operator can flip at any time and
//! the preview path reads once per frame.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::frame::{Frame, PixelLayout, RED_CHANNEL};

/// Color written over overexposed pixels (pure red).
pub const HIGHLIGHT_RGB: [u8; 3] = [255, 0, 0];

/// Default overexposure threshold on the red channel.
pub const DEFAULT_OVEREXPOSURE_THRESHOLD: u8 = 225;

// BT.601 luma in 14-bit fixed point.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

/// Rotate by 180 degrees when `rotate_180` is set, otherwise return a copy.
pub fn rotate(frame: &Frame, rotate_180: bool) -> Frame {
    if !rotate_180 {
        return frame.clone();
    }
    let c = frame.layout().channels();
    let mut out = Vec::with_capacity(frame.as_bytes().len());
    for px in frame.as_bytes().chunks_exact(c).rev() {
        out.extend_from_slice(px);
    }
    Frame::from_parts(frame.width(), frame.height(), frame.layout(), out)
}

pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = (r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B + (1 << (LUMA_SHIFT - 1)))
        >> LUMA_SHIFT;
    y.min(255) as u8
}

/// Standard luma conversion. Gray input is returned unchanged.
pub fn to_grayscale(frame: &Frame) -> Frame {
    match frame.layout() {
        PixelLayout::Gray8 => frame.clone(),
        PixelLayout::Rgb8 => {
            let gray = frame
                .as_bytes()
                .chunks_exact(3)
                .map(|px| luma(px[0], px[1], px[2]))
                .collect();
            Frame::from_parts(frame.width(), frame.height(), PixelLayout::Gray8, gray)
        }
    }
}

/// Render the frame as gray RGB, painting every pixel whose red value exceeds
/// `threshold` with `HIGHLIGHT_RGB`.
///
/// The red channel is the exposure proxy. For gray input the gray value is
/// used as red.
pub fn highlight_overexposed(frame: &Frame, threshold: u8) -> Frame {
    let c = frame.layout().channels();
    let mut out = Vec::with_capacity(frame.pixel_count() * 3);
    for px in frame.as_bytes().chunks_exact(c) {
        let (red, gray) = match frame.layout() {
            PixelLayout::Gray8 => (px[0], px[0]),
            PixelLayout::Rgb8 => (px[RED_CHANNEL], luma(px[0], px[1], px[2])),
        };
        if red > threshold {
            out.extend_from_slice(&HIGHLIGHT_RGB);
        } else {
            out.extend_from_slice(&[gray, gray, gray]);
        }
    }
    Frame::from_parts(frame.width(), frame.height(), PixelLayout::Rgb8, out)
}

/// Live overexposure settings shared between the operator and the preview.
///
/// Both fields are single atomics, so a threshold change is visible to the
/// very next frame without locking.
#[derive(Debug)]
pub struct ExposureCheck {
    enabled: AtomicBool,
    threshold: AtomicU8,
}

impl ExposureCheck {
    pub fn new(threshold: u8) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            threshold: AtomicU8::new(threshold),
        }
    }

    pub fn enable(&self, threshold: u8) {
        self.threshold.store(threshold, Ordering::Relaxed);
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn update_threshold(&self, threshold: u8) {
        self.threshold.store(threshold, Ordering::Relaxed);
    }

    pub fn threshold(&self) -> u8 {
        self.threshold.load(Ordering::Relaxed)
    }

    /// The threshold to apply to the next frame, or `None` when disabled.
    pub fn active_threshold(&self) -> Option<u8> {
        if self.enabled.load(Ordering::Acquire) {
            Some(self.threshold())
        } else {
            None
        }
    }
}

impl Default for ExposureCheck {
    fn default() -> Self {
        Self::new(DEFAULT_OVEREXPOSURE_THRESHOLD)
    }
}

/// The preview pipeline: rotate, grayscale, then optional highlighting.
///
/// Highlighting runs on the gray frame, so overexposure is judged on luma.
#[derive(Clone, Copy, Debug, Default)]
pub struct PreviewTransform {
    pub rotate_180: bool,
}

impl PreviewTransform {
    pub fn apply(&self, frame: &Frame, exposure: &ExposureCheck) -> Frame {
        let rotated = rotate(frame, self.rotate_180);
        match exposure.active_threshold() {
            Some(threshold) => highlight_overexposed(&to_grayscale(&rotated), threshold),
            None => to_grayscale(&rotated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_frame(rng: &mut StdRng, width: u32, height: u32) -> Frame {
        let data = (0..width * height * 3).map(|_| rng.gen::<u8>()).collect();
        Frame::rgb(width, height, data).unwrap()
    }

    #[test]
    fn rotation_reverses_pixel_order() {
        let frame = Frame::rgb(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let rotated = rotate(&frame, true);
        assert_eq!(rotated.as_bytes(), &[4, 5, 6, 1, 2, 3]);
        assert_eq!(rotate(&frame, false), frame);
        assert_eq!(rotate(&rotated, true), frame);
    }

    #[test]
    fn grayscale_uses_luma_weights() {
        let frame = Frame::rgb(3, 1, vec![255, 0, 0, 0, 255, 0, 255, 255, 255]).unwrap();
        let gray = to_grayscale(&frame);
        assert_eq!(gray.layout(), PixelLayout::Gray8);
        assert_eq!(gray.as_bytes(), &[76, 150, 255]);
    }

    #[test]
    fn threshold_splits_highlight_from_gray() {
        let frame = Frame::rgb(2, 1, vec![210, 10, 10, 190, 10, 10]).unwrap();
        let out = highlight_overexposed(&frame, 200);
        assert_eq!(out.pixel(0, 0), Some(&HIGHLIGHT_RGB[..]));
        let g = luma(190, 10, 10);
        assert_eq!(out.pixel(1, 0), Some(&[g, g, g][..]));
    }

    #[test]
    fn highlight_holds_for_random_grids() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..32 {
            let width = rng.gen_range(1..24);
            let height = rng.gen_range(1..24);
            let threshold: u8 = rng.gen();
            let frame = random_frame(&mut rng, width, height);
            let out = highlight_overexposed(&frame, threshold);
            for y in 0..height {
                for x in 0..width {
                    let src = frame.pixel(x, y).unwrap();
                    let dst = out.pixel(x, y).unwrap();
                    if src[RED_CHANNEL] > threshold {
                        assert_eq!(dst, &HIGHLIGHT_RGB[..]);
                    } else {
                        let g = luma(src[0], src[1], src[2]);
                        assert_eq!(dst, &[g, g, g][..]);
                    }
                }
            }
        }
    }

    #[test]
    fn threshold_at_value_is_not_overexposed() {
        let frame = Frame::gray(1, 1, vec![200]).unwrap();
        let out = highlight_overexposed(&frame, 200);
        assert_eq!(out.as_bytes(), &[200, 200, 200]);
    }

    #[test]
    fn preview_picks_up_threshold_changes_immediately() {
        let exposure = ExposureCheck::default();
        let preview = PreviewTransform::default();
        let frame = Frame::gray(1, 1, vec![210]).unwrap();

        assert_eq!(preview.apply(&frame, &exposure).layout(), PixelLayout::Gray8);

        exposure.enable(220);
        assert_eq!(preview.apply(&frame, &exposure).as_bytes(), &[210, 210, 210]);

        exposure.update_threshold(200);
        assert_eq!(
            preview.apply(&frame, &exposure).as_bytes(),
            &HIGHLIGHT_RGB[..]
        );

        exposure.disable();
        assert_eq!(preview.apply(&frame, &exposure).as_bytes(), &[210]);
    }

    #[test]
    fn preview_judges_exposure_on_luma() {
        let exposure = ExposureCheck::default();
        exposure.enable(200);
        // Saturated red is dark in luma; a bright cyan-ish pixel is not.
        let frame = Frame::rgb(2, 1, vec![255, 0, 0, 190, 255, 255]).unwrap();
        let out = PreviewTransform::default().apply(&frame, &exposure);
        assert_eq!(out.as_bytes(), &[76, 76, 76, 255, 0, 0]);

        let rotated = PreviewTransform { rotate_180: true }.apply(&frame, &exposure);
        assert_eq!(rotated.as_bytes(), &[255, 0, 0, 76, 76, 76]);
    }
}

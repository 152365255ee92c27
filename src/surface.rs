//! Player-owned pixels that the UI reads from

pub use imgref::{ImgRef, ImgVec};
pub use rgb::alt::BGRA8;

use crate::decoder::FrameSample;
use crate::PlayResult;
use rgb::RGBA8;
use std::io;

const TRANSPARENT: BGRA8 = BGRA8 { b: 0, g: 0, r: 0, a: 0 };

/// The image the viewer displays.
///
/// Allocated once per loaded file, and overwritten in place for every frame.
/// Pixels are in BGRA order, which is what most native surfaces expect.
pub struct DisplaySurface {
    pixels: ImgVec<BGRA8>,
}

impl DisplaySurface {
    /// Transparent black. Fails if there isn't enough memory for the image.
    pub fn new(width: u32, height: u32) -> PlayResult<Self> {
        let width = width as usize;
        let height = height as usize;
        let len = width.checked_mul(height).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, TRANSPARENT);
        Ok(Self {
            pixels: ImgVec::new(buf, width, height),
        })
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width() as u32
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height() as u32
    }

    #[inline]
    #[must_use]
    pub fn image(&self) -> ImgRef<'_, BGRA8> {
        self.pixels.as_ref()
    }

    /// Copies the sample into the surface, converting RGBA to BGRA.
    ///
    /// Takes the sample by value, so the decoder's buffer can't be touched after this returns.
    /// Samples that are bigger than the surface are cropped. Whatever a smaller sample
    /// doesn't cover becomes transparent. Returns `false` if the sample had no usable pixels.
    pub fn copy_from(&mut self, sample: FrameSample<'_>) -> bool {
        let src_width = sample.width as usize;
        let src_height = sample.height as usize;
        if src_width == 0 || src_height == 0 || sample.pixels.len() < src_width * src_height {
            return false;
        }

        let width = src_width.min(self.pixels.width());
        let mut src_rows = sample.pixels.chunks_exact(src_width).take(src_height);
        for dst_row in self.pixels.rows_mut() {
            let rest = match src_rows.next() {
                Some(src_row) => {
                    let (covered, rest) = dst_row.split_at_mut(width);
                    for (dst, src) in covered.iter_mut().zip(src_row) {
                        *dst = rgba_to_bgra(*src);
                    }
                    rest
                },
                None => dst_row,
            };
            rest.fill(TRANSPARENT);
        }
        true
    }
}

#[inline(always)]
fn rgba_to_bgra(px: RGBA8) -> BGRA8 {
    BGRA8 { b: px.b, g: px.g, r: px.r, a: px.a }
}

#[cfg(test)]
fn sample(pixels: &[RGBA8], width: u32, height: u32) -> FrameSample<'_> {
    FrameSample { pixels, width, height, delay_ms: 0 }
}

#[test]
fn swaps_channels_in_place() {
    let mut s = DisplaySurface::new(2, 1).unwrap();
    let buf_ptr = s.image().buf().as_ptr();
    let px = [RGBA8::new(1, 2, 3, 4), RGBA8::new(5, 6, 7, 8)];
    assert!(s.copy_from(sample(&px, 2, 1)));
    assert_eq!(buf_ptr, s.image().buf().as_ptr());
    let out: Vec<_> = s.image().pixels().collect();
    assert_eq!(out, [BGRA8 { b: 3, g: 2, r: 1, a: 4 }, BGRA8 { b: 7, g: 6, r: 5, a: 8 }]);
}

#[test]
fn rejects_short_buffers() {
    let mut s = DisplaySurface::new(2, 2).unwrap();
    let px = [RGBA8::new(1, 2, 3, 4); 3];
    assert!(!s.copy_from(sample(&px, 2, 2)));
    assert!(!s.copy_from(sample(&px, 0, 2)));
    assert!(s.image().pixels().all(|p| p.a == 0));
}

#[test]
fn crops_oversized_frames() {
    let mut s = DisplaySurface::new(1, 1).unwrap();
    let px = [RGBA8::new(9, 9, 9, 255), RGBA8::new(1, 1, 1, 1), RGBA8::new(2, 2, 2, 2), RGBA8::new(3, 3, 3, 3)];
    assert!(s.copy_from(sample(&px, 2, 2)));
    assert_eq!(s.image().pixels().collect::<Vec<_>>(), [BGRA8 { b: 9, g: 9, r: 9, a: 255 }]);
}

#[test]
fn smaller_frame_clears_the_rest() {
    let mut s = DisplaySurface::new(2, 2).unwrap();
    assert!(s.copy_from(sample(&[RGBA8::new(9, 9, 9, 9); 4], 2, 2)));
    assert!(s.copy_from(sample(&[RGBA8::new(1, 1, 1, 1)], 1, 1)));
    let out: Vec<_> = s.image().pixels().collect();
    assert_eq!(out, [BGRA8 { b: 1, g: 1, r: 1, a: 1 }, TRANSPARENT, TRANSPARENT, TRANSPARENT]);
}

#[test]
fn huge_surface_is_an_error() {
    assert!(matches!(DisplaySurface::new(u32::MAX, u32::MAX), Err(crate::Error::Io(_))));
}

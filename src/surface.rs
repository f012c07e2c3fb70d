//! The shared pixel surface.  Tiles write disjoint rectangles by
//! construction, so the surface never needs per-pixel locking; a single
//! mutex is taken once per tile blit to satisfy the borrow rules, never
//! once per pixel.

use std::sync::Mutex;
use tiles::Rect;

/// The shade every render starts from; the original canvas cleared to
/// white before painting.
pub const BACKGROUND: u8 = 0xff;

/// A square, shared, 8-bit grayscale drawing target.
pub struct PixelSurface {
    dim: usize,
    pixels: Mutex<Vec<u8>>,
}

impl PixelSurface {
    /// Create a `dim` by `dim` surface filled with the background shade.
    pub fn new(dim: usize) -> PixelSurface {
        PixelSurface {
            dim,
            pixels: Mutex::new(vec![BACKGROUND; dim * dim]),
        }
    }

    /// Side length of the surface in pixels.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Reset every pixel to the background shade.
    pub fn clear(&self) {
        let mut pixels = self.pixels.lock().unwrap();
        for pixel in pixels.iter_mut() {
            *pixel = BACKGROUND;
        }
    }

    /// Copy a finished tile into the surface.  `tile` is row-major and
    /// must hold exactly `rect.area()` pixels.
    pub fn blit(&self, rect: &Rect, tile: &[u8]) {
        debug_assert_eq!(tile.len(), rect.area());
        let mut pixels = self.pixels.lock().unwrap();
        for row in 0..rect.height {
            let src = row * rect.width;
            let dst = (rect.y + row) * self.dim + rect.x;
            pixels[dst..dst + rect.width].copy_from_slice(&tile[src..src + rect.width]);
        }
    }

    /// A copy of the surface contents, row-major.
    pub fn snapshot(&self) -> Vec<u8> {
        self.pixels.lock().unwrap().clone()
    }
}

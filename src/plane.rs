//! The render parameters tie a square pixel surface to a square region
//! of the complex plane.  They are validated once, at session
//! construction, and never mutated afterward; every task reads them
//! through a shared reference.

use num::Complex;
use tiles::Rect;

/// A parameter the session cannot be built from.  These surface at
/// startup and abort it; nothing on the compute path produces one.
#[derive(Debug, Fail)]
pub enum ConfigError {
    /// The pixel surface must be at least one pixel on a side.
    #[fail(display = "pixel dimension must be at least 1")]
    ZeroPixelDim,
    /// Leaf tiles must be at least one pixel on a side.
    #[fail(display = "minimum box size must be at least 1")]
    ZeroMinBox,
    /// The worker pool needs at least one worker.
    #[fail(display = "worker pool size must be at least 1")]
    ZeroPoolSize,
    /// The complex-plane region must have a positive, finite side.
    #[fail(display = "box size must be positive and finite, got {}", _0)]
    BadBoxSize(f64),
}

/// Immutable per-session configuration, shared by every task of every
/// render in the session.
#[derive(Copy, Clone, Debug)]
pub struct RenderParams {
    /// Upper-left corner of the rendered region on the complex plane.
    pub corner: Complex<f64>,
    /// Complex-plane distance covered by one pixel, derived as
    /// `box_size / pixel_dim`.
    pub scale: f64,
    /// Side length of the square pixel surface.
    pub pixel_dim: usize,
    /// Side length at or below which a rectangle becomes a leaf tile.
    pub min_box_size: usize,
    /// Number of workers in the bounded pool, when that policy is used.
    pub pool_size: usize,
}

impl RenderParams {
    /// Constructor.  Takes the upper-left corner of the region, the
    /// side length of the region on the complex plane, the side length
    /// of the surface in pixels, the minimum leaf tile side, and the
    /// worker pool size.  Rejects anything a render could not be run
    /// with.
    pub fn new(
        corner_x: f64,
        corner_y: f64,
        box_size: f64,
        pixel_dim: usize,
        min_box_size: usize,
        pool_size: usize,
    ) -> Result<RenderParams, ConfigError> {
        if pixel_dim == 0 {
            return Err(ConfigError::ZeroPixelDim);
        }
        if min_box_size == 0 {
            return Err(ConfigError::ZeroMinBox);
        }
        if pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if !box_size.is_finite() || box_size <= 0.0 {
            return Err(ConfigError::BadBoxSize(box_size));
        }

        Ok(RenderParams {
            corner: Complex::new(corner_x, corner_y),
            scale: box_size / (pixel_dim as f64),
            pixel_dim,
            min_box_size,
            pool_size,
        })
    }

    /// Map the pixel at column `i`, row `j` to its point on the complex
    /// plane.
    pub fn pixel_to_point(&self, i: usize, j: usize) -> Complex<f64> {
        Complex::new(
            self.corner.re + (i as f64) * self.scale,
            self.corner.im + (j as f64) * self.scale,
        )
    }

    /// The rectangle covering the whole pixel surface; the root of
    /// every render's partition tree.
    pub fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.pixel_dim, self.pixel_dim)
    }
}

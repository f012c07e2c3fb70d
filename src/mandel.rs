//! The per-pixel escape-time evaluation.  The engine treats the colorer
//! as an opaque pure function from a point on the complex plane to a
//! shade, which is what lets the tests substitute recording or stalling
//! colorers for the real thing.

use num::{clamp, Complex};

/// Maps a point on the complex plane to an 8-bit shade.  Implementations
/// must be pure: same point, same shade, no side effects.  The engine
/// calls it exactly once per pixel per render and caches nothing.
pub trait PixelColorer: Send + Sync {
    /// Color the point `(re, im)`.
    fn evaluate(&self, re: f64, im: f64) -> u8;
}

/// The classic Mandelbrot membership test: iterate `z = z*z + c` until
/// the orbit escapes the circle of radius two or the iteration budget
/// runs out.
pub struct Mandelbrot {
    limit: usize,
}

impl Mandelbrot {
    /// Constructor.  `limit` is the per-point iteration budget.
    pub fn new(limit: usize) -> Mandelbrot {
        Mandelbrot { limit }
    }
}

impl PixelColorer for Mandelbrot {
    fn evaluate(&self, re: f64, im: f64) -> u8 {
        let c = Complex::new(re, im);
        let mut z: Complex<f64> = Complex { re: 0.0, im: 0.0 };
        for i in 0..self.limit {
            z = z * z + c;
            if z.norm_sqr() >= 4.0 {
                // Early escapes stay bright, slow escapes fade toward
                // the black interior.
                return clamp(255 - (i * 255) / self.limit, 0, 255) as u8;
            }
        }
        0
    }
}

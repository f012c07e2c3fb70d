//! Rectangles on the pixel surface, and the quadrant arithmetic that
//! drives the recursive partition.  Rectangles are plain values; every
//! unit of work receives its own copy, so no two tasks ever share a
//! mutable rectangle.

/// A rectangle in pixel coordinates.  The origin is the upper-left
/// corner of the surface.  Width and height are always at least one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rect {
    /// Leftmost pixel column covered by the rectangle.
    pub x: usize,
    /// Topmost pixel row covered by the rectangle.
    pub y: usize,
    /// Number of pixel columns covered.
    pub width: usize,
    /// Number of pixel rows covered.
    pub height: usize,
}

impl Rect {
    /// Constructor.
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Rect {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// Number of pixels covered by the rectangle.
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// True when the pixel at `(px, py)` falls inside the rectangle.
    pub fn contains(&self, px: usize, py: usize) -> bool {
        px >= self.x && px < self.x + self.width && py >= self.y && py < self.y + self.height
    }

    /// Split the rectangle into its four quadrants.  Odd widths and
    /// heights cannot split evenly, so the leftover column goes to the
    /// right-hand quadrants and the leftover row to the bottom ones.
    /// The four children always tile the parent exactly, with no pixel
    /// omitted and none claimed twice.
    pub fn quadrants(&self) -> [Rect; 4] {
        let midw = self.width / 2;
        let wover = self.width % 2;
        let midh = self.height / 2;
        let hover = self.height % 2;

        [
            Rect::new(self.x, self.y, midw, midh),
            Rect::new(self.x + midw, self.y, midw + wover, midh),
            Rect::new(self.x, self.y + midh, midw, midh + hover),
            Rect::new(self.x + midw, self.y + midh, midw + wover, midh + hover),
        ]
    }
}

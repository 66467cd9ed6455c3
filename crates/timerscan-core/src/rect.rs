use std::fmt;

/// An axis-aligned rectangle in absolute pixel coordinates of a frame.
///
/// A box with zero width or height means "no region found".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub const ZERO: BoundingBox = BoundingBox { x: 0, y: 0, w: 0, h: 0 };

    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// Perimeter of the rectangle, `2w + 2h`.
    pub fn perimeter(&self) -> f64 {
        2.0 * self.w as f64 + 2.0 * self.h as f64
    }

    /// True if the box is non-empty and lies entirely inside a frame of the given size.
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        !self.is_empty()
            && self.x as u64 + self.w as u64 <= frame_width as u64
            && self.y as u64 + self.h as u64 <= frame_height as u64
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.w, self.h, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_box_is_empty() {
        assert!(BoundingBox::ZERO.is_empty());
        assert!(BoundingBox::new(10, 10, 0, 5).is_empty());
        assert!(!BoundingBox::new(0, 0, 1, 1).is_empty());
    }

    #[test]
    fn fits_within_frame() {
        let b = BoundingBox::new(100, 50, 200, 30);
        assert!(b.fits_within(300, 80));
        assert!(!b.fits_within(299, 80));
        assert!(!b.fits_within(300, 79));
        assert!(!BoundingBox::ZERO.fits_within(640, 360));
    }

    #[test]
    fn perimeter_and_area() {
        let b = BoundingBox::new(3, 6, 272, 157);
        assert_eq!(b.area(), 272 * 157);
        assert_eq!(b.perimeter(), 858.0);
        assert_eq!(b.to_string(), "272x157+3+6");
    }
}

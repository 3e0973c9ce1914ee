use serde::{Deserialize, Serialize};
use std::fmt;

/// A location in image coordinates, in pixels.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    /// Nearest pixel, for drawing.
    pub fn to_pixel(self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_pixel() {
        assert_eq!(Point { x: 2.4, y: 7.6 }.to_pixel(), (2, 8));
        assert_eq!(Point { x: 3.0, y: 4.5 }.to_string(), "(3.0, 4.5)");
    }
}

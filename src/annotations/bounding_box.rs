use crate::annotations::point::Point;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A struct representing a bounding box.
///
/// A bounding box is a rectangle used to annotate objects in images. Detection models output
/// bounding boxes along with a probability encoding their confidence in that box+category, and
/// labelled datasets store the ground truth in the same shape.
///
/// This project uses the standard convention of the left side of the image being x=0 and the top
/// of the image being y=0. Coordinates are in pixels of the original (un-letterboxed) image.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BoundingBox {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    class_id: usize,
    category: String,
}

impl BoundingBox {
    /// Checks if a box has valid parameters before constructing.
    pub fn new(
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
        class_id: usize,
        category: String,
    ) -> Result<Self, String> {
        if left.is_nan() || top.is_nan() || right.is_nan() || bottom.is_nan() {
            Err("Failed to create BoundingBox, a coordinate is NaN.".to_string())
        } else if left > right {
            Err(format!(
                "Failed to create BoundingBox, value for left > value for right ({} > {}).",
                left, right
            ))
        } else if top > bottom {
            Err(format!(
                "Failed to create BoundingBox, value for top > value for bottom ({} > {}).",
                top, bottom
            ))
        } else {
            Ok(BoundingBox {
                left,
                top,
                right,
                bottom,
                class_id,
                category,
            })
        }
    }

    /// Builds a box from its center and size, the layout YOLO models and label files use.
    pub fn from_center(
        center_x: f32,
        center_y: f32,
        width: f32,
        height: f32,
        class_id: usize,
        category: String,
    ) -> Result<Self, String> {
        BoundingBox::new(
            center_x - width / 2.0,
            center_y - height / 2.0,
            center_x + width / 2.0,
            center_y + height / 2.0,
            class_id,
            category,
        )
    }

    /// Clamps the box into an image of the given size.
    pub fn clamp_to(&mut self, width: f32, height: f32) {
        self.left = self.left.clamp(0.0, width);
        self.right = self.right.clamp(0.0, width);
        self.top = self.top.clamp(0.0, height);
        self.bottom = self.bottom.clamp(0.0, height);
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BoundingBox {{ {} ({}): [{:.1}, {:.1}, {:.1}, {:.1}] }}",
            self.category, self.class_id, self.left, self.top, self.right, self.bottom
        )
    }
}

/// Geometry shared by every box-shaped annotation.
pub trait BoundingBoxGeometry {
    fn left(&self) -> f32;
    fn top(&self) -> f32;
    fn right(&self) -> f32;
    fn bottom(&self) -> f32;
    fn class_id(&self) -> usize;
    fn category(&self) -> &str;

    fn width(&self) -> f32 {
        self.right() - self.left()
    }

    fn height(&self) -> f32 {
        self.bottom() - self.top()
    }

    fn area(&self) -> f32 {
        self.width() * self.height()
    }

    fn center(&self) -> Point {
        Point {
            x: (self.left() + self.right()) / 2.0,
            y: (self.top() + self.bottom()) / 2.0,
        }
    }

    fn as_xyxy(&self) -> (f32, f32, f32, f32) {
        (self.left(), self.top(), self.right(), self.bottom())
    }

    /// Area of overlap divided by area of union. Zero when the boxes are disjoint.
    fn intersection_over_union<U: BoundingBoxGeometry>(&self, other: &U) -> f32 {
        let inter_width =
            (self.right().min(other.right()) - self.left().max(other.left())).max(0.0);
        let inter_height =
            (self.bottom().min(other.bottom()) - self.top().max(other.top())).max(0.0);
        let intersection = inter_width * inter_height;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

impl BoundingBoxGeometry for BoundingBox {
    fn left(&self) -> f32 {
        self.left
    }

    fn top(&self) -> f32 {
        self.top
    }

    fn right(&self) -> f32 {
        self.right
    }

    fn bottom(&self) -> f32 {
        self.bottom
    }

    fn class_id(&self) -> usize {
        self.class_id
    }

    fn category(&self) -> &str {
        &self.category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(left: f32, top: f32, right: f32, bottom: f32) -> BoundingBox {
        BoundingBox::new(left, top, right, bottom, 0, "test".to_string()).unwrap()
    }

    #[test]
    fn rejects_inverted_boxes() {
        assert!(BoundingBox::new(2.0, 0.0, 1.0, 1.0, 0, "test".to_string()).is_err());
        assert!(BoundingBox::new(0.0, 2.0, 1.0, 1.0, 0, "test".to_string()).is_err());
        assert!(BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0, 0, "test".to_string()).is_err());
    }

    #[test]
    fn from_center_matches_corners() {
        let from_center =
            BoundingBox::from_center(5.0, 5.0, 4.0, 2.0, 3, "car".to_string()).unwrap();
        assert_eq!(
            from_center,
            BoundingBox::new(3.0, 4.0, 7.0, 6.0, 3, "car".to_string()).unwrap()
        );
        assert_eq!(from_center.center(), Point { x: 5.0, y: 5.0 });
        assert_eq!(from_center.area(), 8.0);
    }

    #[test]
    fn iou_identical_and_disjoint() {
        let a = bbox(0.0, 0.0, 2.0, 2.0);
        assert_eq!(a.intersection_over_union(&a), 1.0);
        assert_eq!(a.intersection_over_union(&bbox(3.0, 3.0, 4.0, 4.0)), 0.0);
    }

    #[test]
    fn iou_partial_overlap() {
        // 2x2 boxes offset by one unit share a 1x2 strip: 2 / (4 + 4 - 2).
        let iou = bbox(0.0, 0.0, 2.0, 2.0).intersection_over_union(&bbox(1.0, 0.0, 3.0, 2.0));
        assert!((iou - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn clamp_keeps_box_inside_image() {
        let mut b = bbox(-5.0, -1.0, 12.0, 7.0);
        b.clamp_to(10.0, 5.0);
        assert_eq!(b.as_xyxy(), (0.0, 0.0, 10.0, 5.0));
    }
}

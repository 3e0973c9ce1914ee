use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Grey used by YOLO models for letterbox padding.
pub const LETTERBOX_FILL: Rgb<u8> = Rgb([114, 114, 114]);

/// How an image was placed inside the model's input canvas.
///
/// Needed to map detections from canvas coordinates back to the original image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub original_width: u32,
    pub original_height: u32,
}

impl Letterbox {
    /// Computes the placement of an image inside a target canvas, preserving aspect ratio and
    /// centring the padding.
    pub fn fit(
        original_width: u32,
        original_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Self {
        let scale = (target_width as f32 / original_width as f32)
            .min(target_height as f32 / original_height as f32);
        let (new_width, new_height) = scaled_size(original_width, original_height, scale);
        Letterbox {
            scale,
            pad_x: target_width.saturating_sub(new_width) as f32 / 2.0,
            pad_y: target_height.saturating_sub(new_height) as f32 / 2.0,
            original_width,
            original_height,
        }
    }

    /// Maps a canvas x coordinate back into the original image.
    pub fn unmap_x(&self, x: f32) -> f32 {
        (x - self.pad_x) / self.scale
    }

    /// Maps a canvas y coordinate back into the original image.
    pub fn unmap_y(&self, y: f32) -> f32 {
        (y - self.pad_y) / self.scale
    }
}

fn scaled_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
    (
        ((width as f32 * scale).round() as u32).max(1),
        ((height as f32 * scale).round() as u32).max(1),
    )
}

/// Resizes an rgb8 image into a `target_width` x `target_height` canvas without distorting it,
/// padding the leftover border with `LETTERBOX_FILL`.
pub fn letterbox_rgb8(
    original_image: &RgbImage,
    target_width: u32,
    target_height: u32,
) -> (RgbImage, Letterbox) {
    let letterbox = Letterbox::fit(
        original_image.width(),
        original_image.height(),
        target_width,
        target_height,
    );
    let (new_width, new_height) = scaled_size(
        original_image.width(),
        original_image.height(),
        letterbox.scale,
    );
    let resized = imageops::resize(original_image, new_width, new_height, FilterType::Triangle);
    let mut padded_image = RgbImage::from_pixel(target_width, target_height, LETTERBOX_FILL);
    imageops::overlay(
        &mut padded_image,
        &resized,
        letterbox.pad_x.floor() as i64,
        letterbox.pad_y.floor() as i64,
    );
    (padded_image, letterbox)
}

use image::RgbImage;
use ndarray::Array4;

/// Converts an rgb8 image into a (1, 3, height, width) array scaled to [0, 1].
pub fn convert_rgb_image_to_owned_array(rgb_image: &RgbImage) -> Array4<f32> {
    let mut image_array = Array4::zeros((
        1,
        3,
        rgb_image.height() as usize,
        rgb_image.width() as usize,
    ));
    for (x, y, pixel) in rgb_image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        image_array[[0, 0, y, x]] = (r as f32) / 255.;
        image_array[[0, 1, y, x]] = (g as f32) / 255.;
        image_array[[0, 2, y, x]] = (b as f32) / 255.;
    }
    image_array
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn non_square_image_keeps_row_column_layout() {
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(3, 1, Rgb([255, 0, 51]));
        let arr = convert_rgb_image_to_owned_array(&img);
        assert_eq!(arr.shape(), &[1, 3, 2, 4]);
        assert_eq!(arr[[0, 0, 1, 3]], 1.0);
        assert_eq!(arr[[0, 1, 1, 3]], 0.0);
        assert!((arr[[0, 2, 1, 3]] - 0.2).abs() < 1e-6);
        assert_eq!(arr[[0, 0, 0, 0]], 0.0);
    }
}

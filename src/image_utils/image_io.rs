use crate::error::Result;
use image::{self, DynamicImage};
use std::path::Path;

/// File extensions treated as images when walking directories.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

pub fn is_image_file(filepath: &Path) -> bool {
    filepath
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

pub fn read_image(filepath: &Path) -> Result<DynamicImage> {
    Ok(image::open(filepath)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_utils::image_conversion::convert_rgb_image_to_owned_array;
    use image::{Rgb, RgbImage};

    fn write_test_image(dir: &Path) -> std::path::PathBuf {
        // 3x3 image: black row, red/green/blue row, white row.
        let mut img = RgbImage::new(3, 3);
        let rows = [
            [[0, 0, 0], [0, 0, 0], [0, 0, 0]],
            [[255, 0, 0], [0, 255, 0], [0, 0, 255]],
            [[255, 255, 255], [255, 255, 255], [255, 255, 255]],
        ];
        for (y, row) in rows.iter().enumerate() {
            for (x, px) in row.iter().enumerate() {
                img.put_pixel(x as u32, y as u32, Rgb(*px));
            }
        }
        let path = dir.join("test_image.png");
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn read_test_data_as_rgb8() {
        let dir = tempfile::tempdir().unwrap();
        let img = read_image(&write_test_image(dir.path()))
            .unwrap()
            .into_rgb8();
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(0, 1), &Rgb([255, 0, 0]));
        assert_eq!(img.get_pixel(1, 1), &Rgb([0, 255, 0]));
        assert_eq!(img.get_pixel(2, 1), &Rgb([0, 0, 255]));
        assert_eq!(img.get_pixel(2, 2), &Rgb([255, 255, 255]));
    }

    #[test]
    fn read_test_data_as_array4() {
        let dir = tempfile::tempdir().unwrap();
        let rgb = read_image(&write_test_image(dir.path()))
            .unwrap()
            .into_rgb8();
        let img = convert_rgb_image_to_owned_array(&rgb);
        // The dimensions encode (image, channel, row, column).
        assert_eq!(img.shape(), &[1, 3, 3, 3]);
        assert_eq!(
            (img[[0, 0, 1, 0]], img[[0, 1, 1, 0]], img[[0, 2, 1, 0]]),
            (1.0, 0.0, 0.0)
        );
        assert_eq!(
            (img[[0, 0, 1, 2]], img[[0, 1, 1, 2]], img[[0, 2, 1, 2]]),
            (0.0, 0.0, 1.0)
        );
        assert_eq!(
            (img[[0, 0, 2, 1]], img[[0, 1, 2, 1]], img[[0, 2, 2, 1]]),
            (1.0, 1.0, 1.0)
        );
    }

    #[test]
    fn missing_image_is_an_error() {
        assert!(read_image(Path::new("./does/not/exist.png")).is_err());
    }

    #[test]
    fn image_extensions_are_case_insensitive() {
        assert!(is_image_file(Path::new("frames/0001.JPG")));
        assert!(is_image_file(Path::new("frames/0001.webp")));
        assert!(!is_image_file(Path::new("labels/0001.txt")));
        assert!(!is_image_file(Path::new("README")));
    }
}

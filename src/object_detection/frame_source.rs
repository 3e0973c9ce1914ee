use crate::error::{ModelError, Result};
use crate::image_utils::image_io::{is_image_file, read_image};
use crate::object_detection::object_detection_model::Frame;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Plays the images of a directory as a stream, in lexical file order.
///
/// Frames are decoded lazily, one per `next()`.
#[derive(Debug)]
pub struct DirectoryFrameSource {
    paths: std::vec::IntoIter<PathBuf>,
    index: usize,
}

impl DirectoryFrameSource {
    /// Lists the images directly inside `dir`. Subdirectories are not visited.
    pub fn new(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(ModelError::Config(format!(
                "Frame directory does not exist: {}",
                dir.display()
            )));
        }
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| ModelError::Io(e.into()))?;
            if entry.file_type().is_file() && is_image_file(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        tracing::info!("Found {} frames in {}", paths.len(), dir.display());
        Ok(DirectoryFrameSource {
            paths: paths.into_iter(),
            index: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl Iterator for DirectoryFrameSource {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        let index = self.index;
        self.index += 1;
        Some(read_image(&path).map(|image| Frame {
            index,
            source: path.display().to_string(),
            image,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn yields_images_in_lexical_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, width) in [("b.png", 2), ("a.png", 1), ("c.jpg", 3)] {
            RgbImage::new(width, 1).save(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let source = DirectoryFrameSource::new(dir.path()).unwrap();
        assert_eq!(source.remaining(), 3);
        let frames: Vec<Frame> = source.collect::<Result<_>>().unwrap();
        assert_eq!(
            frames
                .iter()
                .map(|f| (f.index, f.image.width()))
                .collect::<Vec<_>>(),
            vec![(0, 1), (1, 2), (2, 3)]
        );
        assert!(frames[0].source.ends_with("a.png"));
    }

    #[test]
    fn missing_directory_is_a_config_error() {
        assert!(matches!(
            DirectoryFrameSource::new(Path::new("./no/such/frames")),
            Err(ModelError::Config(_))
        ));
    }
}

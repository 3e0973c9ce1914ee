use crate::annotations::bounding_box::BoundingBox;
use crate::error::{ModelError, Result};
use crate::image_utils::image_io::is_image_file;
use crate::object_detection::object_detection_utils::class_label;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// File looked up when the dataset path is a directory.
pub const DESCRIPTOR_FILE_NAME: &str = "data.json";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassNames {
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl ClassNames {
    fn into_vec(self) -> Result<Vec<String>> {
        match self {
            ClassNames::List(names) => Ok(names),
            ClassNames::Map(map) => {
                let mut by_id: BTreeMap<usize, String> = BTreeMap::new();
                for (key, name) in map {
                    let id = key.trim().parse::<usize>().map_err(|_| {
                        ModelError::Dataset(format!("Class id '{}' is not a number.", key))
                    })?;
                    by_id.insert(id, name);
                }
                if by_id
                    .keys()
                    .enumerate()
                    .any(|(expected, id)| expected != *id)
                {
                    return Err(ModelError::Dataset(
                        "Class ids in 'names' must run from 0 without gaps.".to_string(),
                    ));
                }
                Ok(by_id.into_values().collect())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct DatasetDescriptor {
    path: Option<PathBuf>,
    val: Option<PathBuf>,
    names: ClassNames,
}

/// One normalized YOLO label: class, then center and size as fractions of the image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroundTruth {
    pub class_id: usize,
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
}

impl GroundTruth {
    /// Converts into a pixel box for an image of the given size.
    pub fn to_bounding_box(
        &self,
        image_width: u32,
        image_height: u32,
        class_names: &[String],
    ) -> Result<BoundingBox> {
        let (w, h) = (image_width as f32, image_height as f32);
        BoundingBox::from_center(
            self.center_x * w,
            self.center_y * h,
            self.width * w,
            self.height * h,
            self.class_id,
            class_label(class_names, self.class_id),
        )
        .map_err(ModelError::Dataset)
    }
}

/// An evaluation image and where its labels should be.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub image_path: PathBuf,
    pub label_path: PathBuf,
}

impl Sample {
    /// Reads the labels of this sample. A missing label file means no objects.
    pub fn read_labels(&self) -> Result<Vec<GroundTruth>> {
        if !self.label_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.label_path)?;
        parse_labels(&content).map_err(|e| match e {
            ModelError::Dataset(msg) => {
                ModelError::Dataset(format!("{}: {}", self.label_path.display(), msg))
            }
            other => other,
        })
    }
}

/// Parses YOLO label text, one `class cx cy w h` line per object.
pub fn parse_labels(content: &str) -> Result<Vec<GroundTruth>> {
    let mut labels = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ModelError::Dataset(format!(
                "line {}: expected 5 fields, found {}",
                line_number + 1,
                fields.len()
            )));
        }
        let class_id = fields[0].parse::<usize>().map_err(|_| {
            ModelError::Dataset(format!(
                "line {}: bad class id '{}'",
                line_number + 1,
                fields[0]
            ))
        })?;
        let mut values = [0f32; 4];
        for (value, field) in values.iter_mut().zip(&fields[1..]) {
            *value = field.parse::<f32>().map_err(|_| {
                ModelError::Dataset(format!("line {}: bad number '{}'", line_number + 1, field))
            })?;
        }
        if values.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(ModelError::Dataset(format!(
                "line {}: coordinates must be normalized to [0, 1]",
                line_number + 1
            )));
        }
        let [center_x, center_y, width, height] = values;
        labels.push(GroundTruth {
            class_id,
            center_x,
            center_y,
            width,
            height,
        });
    }
    Ok(labels)
}

/// The label file for an image: the last `images` directory swapped for `labels`, and the
/// extension swapped for `txt`.
pub fn label_path_for(image_path: &Path) -> PathBuf {
    let components: Vec<Component> = image_path.components().collect();
    let images_index = components
        .iter()
        .rposition(|c| c.as_os_str() == OsStr::new("images"));
    let mut label_path: PathBuf = components
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if Some(i) == images_index {
                OsStr::new("labels")
            } else {
                c.as_os_str()
            }
        })
        .collect();
    label_path.set_extension("txt");
    label_path
}

/// A labelled dataset described by a JSON descriptor.
#[derive(Clone, Debug)]
pub struct Dataset {
    images_dir: PathBuf,
    names: Vec<String>,
}

impl Dataset {
    /// Opens a descriptor file, or `data.json` inside a directory.
    pub fn open(dataset_path: &Path) -> Result<Self> {
        let descriptor_path = if dataset_path.is_dir() {
            dataset_path.join(DESCRIPTOR_FILE_NAME)
        } else {
            dataset_path.to_path_buf()
        };
        let file = File::open(&descriptor_path).map_err(|e| {
            ModelError::Dataset(format!(
                "Cannot open dataset descriptor {}: {e}",
                descriptor_path.display()
            ))
        })?;
        let descriptor: DatasetDescriptor = serde_json::from_reader(BufReader::new(file))?;
        let base = descriptor_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let root = match descriptor.path {
            Some(path) if path.is_absolute() => path,
            Some(path) => base.join(path),
            None => base,
        };
        let images_dir = root.join(descriptor.val.unwrap_or_else(|| PathBuf::from("images")));
        if !images_dir.is_dir() {
            return Err(ModelError::Dataset(format!(
                "Evaluation image directory does not exist: {}",
                images_dir.display()
            )));
        }
        Ok(Dataset {
            images_dir,
            names: descriptor.names.into_vec()?,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Every image under the evaluation directory, recursively, in lexical order.
    pub fn samples(&self) -> Result<Vec<Sample>> {
        let mut samples = Vec::new();
        for entry in WalkDir::new(&self.images_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| ModelError::Io(e.into()))?;
            if entry.file_type().is_file() && is_image_file(entry.path()) {
                let image_path = entry.into_path();
                samples.push(Sample {
                    label_path: label_path_for(&image_path),
                    image_path,
                });
            }
        }
        Ok(samples)
    }
}

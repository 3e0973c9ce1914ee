use crate::annotations::bounding_box::{BoundingBox, BoundingBoxGeometry};
use crate::annotations::detection::Detection;
use crate::config::DetectionThresholds;
use crate::error::{ModelError, Result};
use crate::image_utils::padding::Letterbox;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Reads a file with the class names into a vector so that the number ids
/// which come directly from the ORT inference session can be given meaning.
/// Blank lines are skipped.
pub fn read_classes_txt_file(filepath: &Path) -> io::Result<Vec<String>> {
    let lines: Vec<String> = BufReader::new(File::open(filepath)?)
        .lines()
        .collect::<io::Result<_>>()?;
    Ok(lines
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

/// Parses the `names` entry ultralytics writes into exported ONNX metadata,
/// e.g. `{0: 'person', 1: 'bicycle'}`. Returns None if it isn't in that shape.
pub fn parse_names_metadata(raw: &str) -> Option<Vec<String>> {
    let inner = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut names: BTreeMap<usize, String> = BTreeMap::new();
    for entry in split_top_level(inner) {
        let (key, value) = entry.split_once(':')?;
        let id: usize = key.trim().parse().ok()?;
        let name = value
            .trim()
            .trim_matches(|c| c == '\'' || c == '"')
            .to_string();
        names.insert(id, name);
    }
    // Ids must be dense, otherwise indexing by class id would be wrong.
    if names
        .keys()
        .enumerate()
        .any(|(expected, id)| expected != *id)
    {
        return None;
    }
    Some(names.into_values().collect())
}

/// Splits on commas that are not inside quotes.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), _) if q == c => quote = None,
            (None, ',') => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if !s[start..].trim().is_empty() {
        parts.push(&s[start..]);
    }
    parts
}

/// Name for a class id, falling back to the id itself.
pub fn class_label(class_names: &[String], class_id: usize) -> String {
    match class_names.get(class_id) {
        Some(v) => v.clone(),
        None => class_id.to_string(),
    }
}

/// Non maxmimum suppression is a way of removing duplicate detections.
///
/// Only detections of the same category suppress each other. The output is sorted by
/// descending confidence.
pub fn non_maximum_suppression<T: BoundingBoxGeometry>(
    mut detections: Vec<Detection<T>>,
    iou_threshold: f32,
) -> Vec<Detection<T>> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut detections_to_remove: Vec<bool> = vec![false; detections.len()];
    for (current_index, current_det) in detections.iter().enumerate() {
        if detections_to_remove[current_index] {
            continue;
        }
        for (other_index, other_det) in detections[current_index + 1..].iter().enumerate() {
            if detections_to_remove[current_index + other_index + 1] {
                continue;
            }
            if current_det.annotation.category() != other_det.annotation.category() {
                continue;
            }
            let iou = current_det
                .annotation
                .intersection_over_union(&other_det.annotation);
            if iou > iou_threshold {
                detections_to_remove[current_index + other_index + 1] = true;
            }
        }
    }
    let mut drop_iter = detections_to_remove.into_iter();
    detections.retain(|_| !drop_iter.next().unwrap_or(false));
    detections
}

/// Turns a raw YOLO detection head output into detections in original image coordinates.
///
/// The output has shape (1, 4 + num_classes, num_anchors): for every anchor a box as
/// center x, center y, width, height in letterboxed canvas pixels, followed by one score per
/// class.
pub fn decode_yolo_output(
    data: &[f32],
    shape: &[usize],
    letterbox: &Letterbox,
    class_names: &[String],
    thresholds: &DetectionThresholds,
) -> Result<Vec<Detection<BoundingBox>>> {
    let (rows, anchors) = match shape {
        [1, rows, anchors] if *rows > 4 => (*rows, *anchors),
        _ => {
            return Err(ModelError::Inference(format!(
                "Unexpected YOLO output shape {:?}, expected [1, 4 + classes, anchors].",
                shape
            )));
        }
    };
    if data.len() != rows * anchors {
        return Err(ModelError::Inference(format!(
            "YOLO output has {} values but shape {:?} needs {}.",
            data.len(),
            shape,
            rows * anchors
        )));
    }
    let value = |row: usize, anchor: usize| data[row * anchors + anchor];
    let width = letterbox.original_width as f32;
    let height = letterbox.original_height as f32;

    let mut detections: Vec<Detection<BoundingBox>> = Vec::new();
    for anchor in 0..anchors {
        let (class_id, prob) = (4..rows)
            .map(|row| (row - 4, value(row, anchor)))
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
            .unwrap_or((0, 0.0));
        if prob < thresholds.confidence {
            continue;
        }
        let x = value(0, anchor);
        let y = value(1, anchor);
        let w = value(2, anchor);
        let h = value(3, anchor);
        let bbox = BoundingBox::new(
            letterbox.unmap_x(x - w / 2.0),
            letterbox.unmap_y(y - h / 2.0),
            letterbox.unmap_x(x + w / 2.0),
            letterbox.unmap_y(y + h / 2.0),
            class_id,
            class_label(class_names, class_id),
        );
        // Degenerate boxes from the model are dropped rather than failing the image.
        let Ok(mut bbox) = bbox else {
            continue;
        };
        bbox.clamp_to(width, height);
        detections.push(Detection {
            annotation: bbox,
            confidence: prob,
        });
    }
    let mut detections = non_maximum_suppression(detections, thresholds.iou);
    detections.truncate(thresholds.max_detections);
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled(class_id: usize, name: &str, xyxy: [f32; 4], confidence: f32) -> Detection {
        let [left, top, right, bottom] = xyxy;
        Detection {
            annotation: BoundingBox::new(left, top, right, bottom, class_id, name.to_string())
                .unwrap(),
            confidence,
        }
    }

    fn det(
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
        class: &str,
        confidence: f32,
    ) -> Detection {
        labelled(0, class, [left, top, right, bottom], confidence)
    }

    #[test]
    fn nms_no_overlap() {
        let dets = vec![
            det(0.0, 0.0, 1.0, 1.0, "test", 0.6),
            det(2.0, 2.0, 3.0, 3.0, "test", 0.6),
        ];
        let nms_result = non_maximum_suppression(dets.clone(), 0.5);
        assert_eq!(dets, nms_result);
    }

    #[test]
    fn nms_standard_usage() {
        let dets = vec![
            det(0.0, 0.0, 4.0, 4.0, "test", 0.6),
            det(0.0, 0.0, 5.0, 5.0, "test", 0.55),
            det(6.0, 6.0, 10.0, 10.0, "test", 0.75),
        ];
        let nms_result = non_maximum_suppression(dets, 0.5);
        let true_dets = vec![
            det(6.0, 6.0, 10.0, 10.0, "test", 0.75),
            det(0.0, 0.0, 4.0, 4.0, "test", 0.6),
        ];
        assert_eq!(true_dets, nms_result);
    }

    #[test]
    fn nms_overlap_but_different_classes() {
        let dets = vec![
            det(0.0, 0.0, 4.5, 4.5, "test", 0.6),
            det(0.0, 0.0, 5.0, 5.0, "test_different_class", 0.55),
            det(0.5, 0.5, 4.0, 4.0, "test", 0.8),
            det(6.0, 6.0, 10.0, 10.0, "test", 0.75),
        ];
        let nms_result = non_maximum_suppression(dets, 0.5);
        let true_dets = vec![
            det(0.5, 0.5, 4.0, 4.0, "test", 0.8),
            det(6.0, 6.0, 10.0, 10.0, "test", 0.75),
            det(0.0, 0.0, 5.0, 5.0, "test_different_class", 0.55),
        ];
        assert_eq!(true_dets, nms_result);
    }

    #[test]
    fn parses_ultralytics_names() {
        assert_eq!(
            parse_names_metadata("{0: 'person', 1: 'traffic light', 2: \"a, b\"}"),
            Some(vec![
                "person".to_string(),
                "traffic light".to_string(),
                "a, b".to_string()
            ])
        );
        assert_eq!(parse_names_metadata("{1: 'person'}"), None);
        assert_eq!(parse_names_metadata("person, car"), None);
        assert_eq!(parse_names_metadata("{}"), Some(vec![]));
    }

    #[test]
    fn reads_classes_file_skipping_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.txt");
        std::fs::write(&path, "person\n\ncar \n").unwrap();
        assert_eq!(
            read_classes_txt_file(&path).unwrap(),
            vec!["person".to_string(), "car".to_string()]
        );
    }

    #[test]
    fn decodes_and_unletterboxes() {
        // Two classes, three anchors, laid out row-major as (1, 6, 3).
        #[rustfmt::skip]
        let data = vec![
            // cx
            100.0, 300.0, 50.0,
            // cy
            260.0, 320.0, 50.0,
            // w
            40.0, 20.0, 10.0,
            // h
            40.0, 20.0, 10.0,
            // class 0 scores
            0.9, 0.1, 0.05,
            // class 1 scores
            0.2, 0.7, 0.1,
        ];
        // 1280x640 image letterboxed into 640x640: scale 0.5, 160 px of padding on top.
        let letterbox = Letterbox::fit(1280, 640, 640, 640);
        let names = vec!["person".to_string(), "car".to_string()];
        let dets = decode_yolo_output(
            &data,
            &[1, 6, 3],
            &letterbox,
            &names,
            &DetectionThresholds::default(),
        )
        .unwrap();
        assert_eq!(
            dets,
            vec![
                labelled(0, "person", [160.0, 160.0, 240.0, 240.0], 0.9),
                labelled(1, "car", [580.0, 300.0, 620.0, 340.0], 0.7),
            ]
        );
    }

    #[test]
    fn decode_rejects_bad_shapes() {
        let letterbox = Letterbox::fit(10, 10, 10, 10);
        let thresholds = DetectionThresholds::default();
        assert!(decode_yolo_output(&[0.0; 4], &[1, 4, 1], &letterbox, &[], &thresholds).is_err());
        assert!(decode_yolo_output(&[0.0; 5], &[1, 6, 1], &letterbox, &[], &thresholds).is_err());
    }

    #[test]
    fn decode_truncates_to_max_detections() {
        // One class, three far-apart anchors all above threshold.
        #[rustfmt::skip]
        let data = vec![
            10.0, 50.0, 90.0,
            10.0, 50.0, 90.0,
            4.0, 4.0, 4.0,
            4.0, 4.0, 4.0,
            0.5, 0.9, 0.7,
        ];
        let letterbox = Letterbox::fit(100, 100, 100, 100);
        let thresholds = DetectionThresholds {
            max_detections: 2,
            ..DetectionThresholds::default()
        };
        let dets = decode_yolo_output(&data, &[1, 5, 3], &letterbox, &[], &thresholds).unwrap();
        assert_eq!(
            dets.iter().map(|d| d.confidence).collect::<Vec<_>>(),
            vec![0.9, 0.7]
        );
        assert_eq!(dets[0].annotation.category(), "0");
    }
}

use crate::annotations::bounding_box::{BoundingBox, BoundingBoxGeometry};
use crate::annotations::detection::Detection;
use crate::config::MatrixFormat;
use crate::error::Result;
use itertools::Itertools;
use ndarray::{Array2, Axis};
use serde_json::json;

const BACKGROUND: &str = "background";

/// Counts of predicted class against true class over an evaluation set.
///
/// Rows are predicted classes and columns are true classes. The extra last row and column stand
/// for background: a ground truth nothing matched lands in the background row, a detection that
/// matched nothing lands in the background column.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfusionMatrix {
    names: Vec<String>,
    counts: Array2<u64>,
    confidence: f32,
    iou: f32,
}

impl ConfusionMatrix {
    pub fn new(names: Vec<String>, confidence: f32, iou: f32) -> Self {
        let size = names.len() + 1;
        ConfusionMatrix {
            names,
            counts: Array2::zeros((size, size)),
            confidence,
            iou,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index of the background row and column.
    pub fn background(&self) -> usize {
        self.names.len()
    }

    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    pub fn get(&self, predicted: usize, actual: usize) -> u64 {
        self.counts[[predicted, actual]]
    }

    /// Adds one image worth of detections and ground truth boxes.
    ///
    /// Detections below the confidence threshold are ignored, as are detections and ground truth
    /// boxes whose class id is outside the matrix.
    pub fn process_image(&mut self, detections: &[Detection], ground_truth: &[BoundingBox]) {
        let nc = self.num_classes();
        let background = self.background();
        let detections: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.confidence >= self.confidence && d.annotation.class_id() < nc)
            .collect();
        let ground_truth: Vec<&BoundingBox> = ground_truth
            .iter()
            .filter(|gt| gt.class_id() < nc)
            .collect();

        let mut candidates: Vec<(usize, usize, f32)> = Vec::new();
        for (gt_index, gt) in ground_truth.iter().enumerate() {
            for (det_index, det) in detections.iter().enumerate() {
                let iou = gt.intersection_over_union(&det.annotation);
                if iou > self.iou {
                    candidates.push((gt_index, det_index, iou));
                }
            }
        }
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut gt_matched = vec![false; ground_truth.len()];
        let mut det_matched = vec![false; detections.len()];
        for (gt_index, det_index, _) in candidates {
            if gt_matched[gt_index] || det_matched[det_index] {
                continue;
            }
            gt_matched[gt_index] = true;
            det_matched[det_index] = true;
            let predicted = detections[det_index].annotation.class_id();
            let actual = ground_truth[gt_index].class_id();
            self.counts[[predicted, actual]] += 1;
        }
        for (gt, matched) in ground_truth.iter().zip(&gt_matched) {
            if !matched {
                self.counts[[background, gt.class_id()]] += 1;
            }
        }
        for (det, matched) in detections.iter().zip(&det_matched) {
            if !matched {
                self.counts[[det.annotation.class_id(), background]] += 1;
            }
        }
    }

    /// Each column divided by its sum, so a column shows where the objects of one true class
    /// ended up. Empty columns stay zero.
    pub fn normalized(&self) -> Array2<f64> {
        let mut normalized = self.counts.mapv(|c| c as f64);
        for mut column in normalized.axis_iter_mut(Axis(1)) {
            let total: f64 = column.sum();
            if total > 0.0 {
                column.mapv_inplace(|c| c / total);
            }
        }
        normalized
    }

    /// Correct detections per class.
    pub fn true_positives(&self) -> Vec<u64> {
        (0..self.num_classes())
            .map(|i| self.counts[[i, i]])
            .collect()
    }

    /// Detections per class that were another class or nothing at all.
    pub fn false_positives(&self) -> Vec<u64> {
        (0..self.num_classes())
            .map(|i| self.counts.row(i).sum() - self.counts[[i, i]])
            .collect()
    }

    /// Objects per class that were detected as another class or missed.
    pub fn false_negatives(&self) -> Vec<u64> {
        (0..self.num_classes())
            .map(|i| self.counts.column(i).sum() - self.counts[[i, i]])
            .collect()
    }

    fn labels(&self) -> Vec<&str> {
        self.names
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(BACKGROUND))
            .collect()
    }

    fn rows(&self) -> Vec<Vec<u64>> {
        self.counts
            .axis_iter(Axis(0))
            .map(|row| row.to_vec())
            .collect()
    }

    pub fn render(&self, format: MatrixFormat) -> Result<String> {
        match format {
            MatrixFormat::Json => self.render_json(),
            MatrixFormat::Csv => Ok(self.render_csv()),
            MatrixFormat::Text => Ok(self.render_text()),
        }
    }

    fn render_json(&self) -> Result<String> {
        let normalized: Vec<Vec<f64>> = self
            .normalized()
            .axis_iter(Axis(0))
            .map(|row| row.to_vec())
            .collect();
        let value = json!({
            "names": self.labels(),
            "rows": "predicted",
            "columns": "true",
            "confidence": self.confidence,
            "iou": self.iou,
            "counts": self.rows(),
            "normalized": normalized,
        });
        Ok(serde_json::to_string_pretty(&value)?)
    }

    fn render_csv(&self) -> String {
        let labels = self.labels();
        let header = std::iter::once("predicted\\true".to_string())
            .chain(labels.iter().map(|l| csv_field(l)))
            .join(",");
        let body = labels
            .iter()
            .zip(self.rows())
            .map(|(label, row)| {
                std::iter::once(csv_field(label))
                    .chain(row.iter().map(u64::to_string))
                    .join(",")
            })
            .join("\n");
        format!("{}\n{}\n", header, body)
    }

    fn render_text(&self) -> String {
        let labels = self.labels();
        let label_width = labels.iter().map(|l| l.len()).max().unwrap_or(0);
        let cell_width = self
            .counts
            .iter()
            .map(|c| c.to_string().len())
            .chain(labels.iter().map(|l| l.len()))
            .max()
            .unwrap_or(1);
        let header = format!(
            "{:<label_width$}  {}",
            "",
            labels
                .iter()
                .map(|l| format!("{:>cell_width$}", l))
                .join(" ")
        );
        let body = labels
            .iter()
            .zip(self.rows())
            .map(|(label, row)| {
                format!(
                    "{:<label_width$}  {}",
                    label,
                    row.iter().map(|c| format!("{:>cell_width$}", c)).join(" ")
                )
            })
            .join("\n");
        format!("{}\n{}\n", header, body)
    }
}

fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["person".to_string(), "car".to_string()]
    }

    fn gt(left: f32, top: f32, right: f32, bottom: f32, class_id: usize) -> BoundingBox {
        BoundingBox::new(left, top, right, bottom, class_id, class_id.to_string()).unwrap()
    }

    fn det(
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
        class_id: usize,
        confidence: f32,
    ) -> Detection {
        Detection {
            annotation: gt(left, top, right, bottom, class_id),
            confidence,
        }
    }

    #[test]
    fn correct_detection_lands_on_diagonal() {
        let mut matrix = ConfusionMatrix::new(names(), 0.25, 0.45);
        matrix.process_image(
            &[det(0.0, 0.0, 10.0, 10.0, 1, 0.9)],
            &[gt(0.0, 0.0, 10.0, 10.0, 1)],
        );
        assert_eq!(matrix.get(1, 1), 1);
        assert_eq!(matrix.counts().sum(), 1);
        assert_eq!(matrix.true_positives(), vec![0, 1]);
    }

    #[test]
    fn wrong_class_is_confusion_not_miss() {
        let mut matrix = ConfusionMatrix::new(names(), 0.25, 0.45);
        matrix.process_image(
            &[det(0.0, 0.0, 10.0, 10.0, 0, 0.9)],
            &[gt(1.0, 1.0, 10.0, 10.0, 1)],
        );
        assert_eq!(matrix.get(0, 1), 1);
        assert_eq!(matrix.false_positives(), vec![1, 0]);
        assert_eq!(matrix.false_negatives(), vec![0, 1]);
    }

    #[test]
    fn misses_and_spurious_detections_use_background() {
        let mut matrix = ConfusionMatrix::new(names(), 0.25, 0.45);
        let bg = matrix.background();
        matrix.process_image(
            &[
                det(50.0, 50.0, 60.0, 60.0, 1, 0.8),
                // Below the confidence threshold, ignored.
                det(0.0, 0.0, 10.0, 10.0, 0, 0.1),
            ],
            &[gt(0.0, 0.0, 10.0, 10.0, 0)],
        );
        assert_eq!(matrix.get(bg, 0), 1);
        assert_eq!(matrix.get(1, bg), 1);
        assert_eq!(matrix.counts().sum(), 2);
    }

    #[test]
    fn each_box_matches_at_most_once() {
        let mut matrix = ConfusionMatrix::new(names(), 0.25, 0.45);
        let bg = matrix.background();
        // Two detections on one object: the better overlap matches, the other is spurious.
        matrix.process_image(
            &[
                det(1.0, 1.0, 10.0, 10.0, 0, 0.7),
                det(0.0, 0.0, 10.0, 10.0, 0, 0.6),
            ],
            &[gt(0.0, 0.0, 10.0, 10.0, 0)],
        );
        assert_eq!(matrix.get(0, 0), 1);
        assert_eq!(matrix.get(0, bg), 1);
    }

    #[test]
    fn normalizes_columns() {
        let mut matrix = ConfusionMatrix::new(names(), 0.25, 0.45);
        matrix.process_image(
            &[
                det(0.0, 0.0, 10.0, 10.0, 0, 0.9),
                det(20.0, 20.0, 30.0, 30.0, 1, 0.9),
            ],
            &[
                gt(0.0, 0.0, 10.0, 10.0, 0),
                gt(20.0, 20.0, 30.0, 30.0, 0),
                gt(40.0, 40.0, 50.0, 50.0, 0),
                gt(60.0, 60.0, 70.0, 70.0, 0),
            ],
        );
        let normalized = matrix.normalized();
        assert_eq!(normalized[[0, 0]], 0.25);
        assert_eq!(normalized[[1, 0]], 0.25);
        assert_eq!(normalized[[2, 0]], 0.5);
        assert_eq!(normalized[[0, 1]], 0.0);
    }

    #[test]
    fn renders_csv_and_text() {
        let mut matrix = ConfusionMatrix::new(names(), 0.25, 0.45);
        matrix.process_image(
            &[det(0.0, 0.0, 10.0, 10.0, 1, 0.9)],
            &[gt(0.0, 0.0, 10.0, 10.0, 1)],
        );
        assert_eq!(
            matrix.render(MatrixFormat::Csv).unwrap(),
            "predicted\\true,person,car,background\n\
             person,0,0,0\n\
             car,0,1,0\n\
             background,0,0,0\n"
        );
        let text = matrix.render(MatrixFormat::Text).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].trim_start().starts_with("person"));
        assert!(lines[2].starts_with("car"));
        assert!(lines[2].trim_end().ends_with('0'));
    }

    #[test]
    fn renders_json() {
        let matrix = ConfusionMatrix::new(names(), 0.25, 0.45);
        let rendered = matrix.render(MatrixFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["names"], json!(["person", "car", "background"]));
        assert_eq!(value["counts"][2], json!([0, 0, 0]));
    }

    #[test]
    fn csv_quotes_awkward_names() {
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("plain"), "plain");
    }
}

use crate::annotations::bounding_box::BoundingBoxGeometry;
use crate::annotations::detection::Detection;
use crate::error::Result;
use crate::object_detection::object_detection_model::{DetectionSink, Frame};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([255, 56, 56]),
    Rgb([255, 157, 151]),
    Rgb([255, 112, 31]),
    Rgb([255, 178, 29]),
    Rgb([72, 249, 10]),
    Rgb([26, 147, 52]),
    Rgb([0, 194, 255]),
    Rgb([132, 56, 255]),
];

pub fn class_color(class_id: usize) -> Rgb<u8> {
    PALETTE[class_id % PALETTE.len()]
}

/// Draws detection boxes on a copy of the image. Boxes are drawn `thickness` pixels wide,
/// growing inwards, and each box centre gets a small cross.
pub fn draw_detections(image: &RgbImage, detections: &[Detection], thickness: u32) -> RgbImage {
    let mut canvas = image.clone();
    for detection in detections {
        let (left, top, right, bottom) = detection.annotation.as_xyxy();
        let color = class_color(detection.annotation.class_id());
        let (center_x, center_y) = detection.annotation.center().to_pixel();
        draw_cross_mut(&mut canvas, color, center_x, center_y);
        for inset in 0..thickness as i32 {
            let x = left.round() as i32 + inset;
            let y = top.round() as i32 + inset;
            let width = (right.round() as i32 - inset) - x;
            let height = (bottom.round() as i32 - inset) - y;
            if width <= 0 || height <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                &mut canvas,
                Rect::at(x, y).of_size(width as u32, height as u32),
                color,
            );
        }
    }
    canvas
}

/// Writes every frame with its detections drawn into an output directory.
#[derive(Debug)]
pub struct RenderBoxesSink {
    output_dir: PathBuf,
    thickness: u32,
    written: usize,
}

impl RenderBoxesSink {
    pub fn new(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir)?;
        Ok(RenderBoxesSink {
            output_dir: output_dir.to_path_buf(),
            thickness: 2,
            written: 0,
        })
    }

    pub fn with_thickness(mut self, thickness: u32) -> Self {
        self.thickness = thickness.max(1);
        self
    }

    pub fn written(&self) -> usize {
        self.written
    }

    fn output_path(&self, frame: &Frame) -> PathBuf {
        self.output_dir
            .join(format!("frame_{:06}.png", frame.index))
    }
}

impl DetectionSink for RenderBoxesSink {
    fn on_frame(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
        let rendered = draw_detections(&frame.image.to_rgb8(), detections, self.thickness);
        rendered.save(self.output_path(frame))?;
        self.written += 1;
        Ok(())
    }
}

/// Counts frames and detections per class, and logs a summary when the stream finishes.
#[derive(Debug)]
pub struct StatisticsSink {
    frames: usize,
    detections: usize,
    per_class: BTreeMap<String, usize>,
    started: Option<Instant>,
}

impl Default for StatisticsSink {
    fn default() -> Self {
        StatisticsSink::new()
    }
}

impl StatisticsSink {
    pub fn new() -> Self {
        StatisticsSink {
            frames: 0,
            detections: 0,
            per_class: BTreeMap::new(),
            started: None,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn detections(&self) -> usize {
        self.detections
    }

    pub fn per_class(&self) -> &BTreeMap<String, usize> {
        &self.per_class
    }

    pub fn frames_per_second(&self) -> f64 {
        match self.started {
            Some(started) => {
                let seconds = started.elapsed().as_secs_f64();
                if seconds > 0.0 {
                    self.frames as f64 / seconds
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    /// One-line summary, e.g. `3 frames, 5 detections (car: 2, person: 3)`.
    pub fn summary(&self) -> String {
        let classes = self
            .per_class
            .iter()
            .map(|(name, count)| format!("{}: {}", name, count))
            .join(", ");
        format!(
            "{} frames, {} detections ({})",
            self.frames, self.detections, classes
        )
    }
}

impl DetectionSink for StatisticsSink {
    fn on_frame(&mut self, _frame: &Frame, detections: &[Detection]) -> Result<()> {
        self.started.get_or_insert_with(Instant::now);
        self.frames += 1;
        self.detections += detections.len();
        for detection in detections {
            *self
                .per_class
                .entry(detection.annotation.category().to_string())
                .or_insert(0) += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        tracing::info!(
            "Stream finished: {} at {:.1} fps",
            self.summary(),
            self.frames_per_second()
        );
        Ok(())
    }
}

use crate::annotations::detection::Detection;
use crate::config::DetectionThresholds;
use crate::error::Result;
use image::DynamicImage;
use std::time::{Duration, Instant};

/// Single-image and batched inference.
///
/// Every backend the handle can drive implements this. Images go in untouched; any resizing the
/// model needs happens inside the implementation, and the returned boxes are in the coordinates
/// of the image that was passed in.
pub trait BatchDetector {
    fn detect(
        &mut self,
        image: &DynamicImage,
        thresholds: &DetectionThresholds,
    ) -> Result<Vec<Detection>>;

    fn detect_batch(
        &mut self,
        images: &[DynamicImage],
        thresholds: &DetectionThresholds,
    ) -> Result<Vec<Vec<Detection>>> {
        images
            .iter()
            .map(|image| self.detect(image, thresholds))
            .collect()
    }

    /// Class names indexed by class id.
    fn class_names(&self) -> &[String];
}

/// One frame of a stream.
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: usize,
    /// Where the frame came from, a file path for directory sources.
    pub source: String,
    pub image: DynamicImage,
}

/// Receives the detections of every frame of a stream.
pub trait DetectionSink {
    fn on_frame(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl DetectionSink for Vec<Box<dyn DetectionSink>> {
    fn on_frame(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
        for sink in self.iter_mut() {
            sink.on_frame(frame, detections)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        for sink in self.iter_mut() {
            sink.finish()?;
        }
        Ok(())
    }
}

impl<F> DetectionSink for F
where
    F: FnMut(&Frame, &[Detection]) -> Result<()>,
{
    fn on_frame(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
        self(frame, detections)
    }
}

/// Totals for one run over a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StreamSummary {
    pub frames: usize,
    pub detections: usize,
    pub elapsed: Duration,
}

impl StreamSummary {
    pub fn frames_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.frames as f64 / seconds
    }
}

/// Continuous inference over a sequence of frames.
///
/// Kept separate from `BatchDetector` so a backend can offer either capability alone.
pub trait StreamDetector {
    fn run_stream<S, K>(
        &mut self,
        source: S,
        sink: &mut K,
        thresholds: &DetectionThresholds,
    ) -> Result<StreamSummary>
    where
        S: IntoIterator<Item = Result<Frame>>,
        K: DetectionSink + ?Sized;
}

/// Runs a batch detector frame by frame over a source. Source, detector and sink errors all stop
/// the stream; `finish` is only called when every frame went through.
pub fn drive_stream<D, S, K>(
    detector: &mut D,
    source: S,
    sink: &mut K,
    thresholds: &DetectionThresholds,
) -> Result<StreamSummary>
where
    D: BatchDetector + ?Sized,
    S: IntoIterator<Item = Result<Frame>>,
    K: DetectionSink + ?Sized,
{
    let start = Instant::now();
    let mut summary = StreamSummary::default();
    for frame in source {
        let frame = frame?;
        let detections = detector.detect(&frame.image, thresholds)?;
        tracing::debug!(
            "Frame {} ({}): {} detections",
            frame.index,
            frame.source,
            detections.len()
        );
        sink.on_frame(&frame, &detections)?;
        summary.frames += 1;
        summary.detections += detections.len();
    }
    sink.finish()?;
    summary.elapsed = start.elapsed();
    Ok(summary)
}

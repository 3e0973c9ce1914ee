use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vision_pipeline::object_detection::frame_source::DirectoryFrameSource;
use vision_pipeline::object_detection::object_detection_model::DetectionSink;
use vision_pipeline::object_detection::sinks::{RenderBoxesSink, StatisticsSink};
use vision_pipeline::{HandleConfig, InferenceSettings, ModelHandle, YoloLoader};

#[derive(Parser)]
#[command(name = "vision-pipeline")]
#[command(about = "Load, train, run and evaluate YOLO detection models")]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model weights, overrides the configuration file
    #[arg(long)]
    weights: Option<String>,

    /// Minimum detection confidence, overrides the configuration file
    #[arg(long)]
    confidence: Option<f32>,

    /// NMS and matching IoU threshold, overrides the configuration file
    #[arg(long)]
    iou: Option<f32>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the flow selected by the configured mode
    Run,
    /// Detect objects in one image and print them as JSON
    Infer {
        #[arg(long)]
        image: PathBuf,
    },
    /// Detect objects in every image of a directory, in file name order
    Stream {
        #[arg(long)]
        frames: PathBuf,
        /// Write annotated frames here
        #[arg(long)]
        render_dir: Option<PathBuf>,
        /// Box outline width in pixels for rendered frames
        #[arg(long, default_value_t = 2)]
        thickness: u32,
    },
    /// Build the confusion matrix for the configured dataset
    Evaluate {
        /// Write the matrix here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn load_config(args: &Args) -> Result<HandleConfig> {
    let mut config = match &args.config {
        Some(path) => HandleConfig::from_json_file(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => match &args.weights {
            Some(weights) => HandleConfig::new(weights.clone()),
            None => bail!("either --config or --weights is required"),
        },
    };
    if let Some(weights) = &args.weights {
        config.model_weights = weights.clone();
    }
    if args.confidence.is_some() || args.iou.is_some() {
        let inference = InferenceSettings {
            confidence: args.confidence.unwrap_or(config.inference.confidence),
            iou: args.iou.unwrap_or(config.inference.iou),
            ..config.inference.clone()
        };
        config = config.with_inference(inference);
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    let config = load_config(&args)?;
    let loader = YoloLoader::new(config.inference.clone());
    let mut handle = ModelHandle::new(config, loader);
    handle.load_model()?;

    match args.command {
        Command::Run => {
            let summary = handle.run()?;
            tracing::info!(
                "Run finished (mode {:?}, trained: {})",
                summary.mode,
                summary.trained
            );
            if let Some(version) = summary.output_weights_version {
                tracing::info!("Saved weights version {}", version);
            }
            if let Some(matrix) = summary.confusion_matrix {
                let format = handle.config().mat_format.unwrap_or_default();
                tracing::info!("Confusion matrix ({})", format);
                println!("{}", matrix.render(format)?);
            }
        }
        Command::Infer { image } => {
            let detections = handle.infer_file(&image)?;
            tracing::info!("{} detections in {}", detections.len(), image.display());
            for detection in &detections {
                tracing::debug!("{}", detection);
            }
            println!("{}", serde_json::to_string_pretty(&detections)?);
        }
        Command::Stream {
            frames,
            render_dir,
            thickness,
        } => {
            let source = DirectoryFrameSource::new(&frames)?;
            let mut sinks: Vec<Box<dyn DetectionSink>> = vec![Box::new(StatisticsSink::new())];
            if let Some(render_dir) = render_dir {
                let sink = RenderBoxesSink::new(&render_dir)?.with_thickness(thickness);
                sinks.push(Box::new(sink));
            }
            handle.infer_stream(source, &mut sinks)?;
        }
        Command::Evaluate { output } => {
            let rendered = handle.export_confusion_matrix()?;
            match output {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("writing {}", path.display()))?;
                    let format = handle.config().mat_format.unwrap_or_default();
                    tracing::info!(
                        "Confusion matrix ({}) written to {}",
                        format,
                        path.display()
                    );
                }
                None => println!("{}", rendered),
            }
        }
    }
    Ok(())
}

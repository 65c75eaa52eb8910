//! Training CLI Tool
//!
//! Trains and evaluates a U-Net segmenter or a ResNet/DenseNet classifier on a
//! directory of medical images, then writes weights, run metadata and an
//! optional demo video.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use burn::{
    backend::{Autodiff, NdArray},
    module::Module,
    tensor::backend::{AutodiffBackend, Backend},
};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use med_core::{
    load_toml_config, resolve_device, setup_cli_logging, DeviceKind, ModelKind, ResNetDepth,
    RunConfig,
};
use med_dataset::ClassIndex;
use med_training::{
    checkpoint::weights_file, load_model, save_model, ClassificationTrainer, ClassifierNet,
    RunMetadata, SegmentationTrainer, Trainer, UNetConfig,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    /// U-Net segmentation
    Unet,
    /// DenseNet classification
    Densenet,
    /// ResNet classification
    Resnet,
}

impl From<ModelArg> for ModelKind {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Unet => ModelKind::Unet,
            ModelArg::Densenet => ModelKind::Densenet,
            ModelArg::Resnet => ModelKind::Resnet,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DeviceArg {
    Cpu,
    Gpu,
}

impl From<DeviceArg> for DeviceKind {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Cpu => DeviceKind::Cpu,
            DeviceArg::Gpu => DeviceKind::Gpu,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResNetArg {
    R18,
    R34,
    R50,
    R101,
    R152,
}

impl From<ResNetArg> for ResNetDepth {
    fn from(arg: ResNetArg) -> Self {
        match arg {
            ResNetArg::R18 => ResNetDepth::R18,
            ResNetArg::R34 => ResNetDepth::R34,
            ResNetArg::R50 => ResNetDepth::R50,
            ResNetArg::R101 => ResNetDepth::R101,
            ResNetArg::R152 => ResNetDepth::R152,
        }
    }
}

/// Medical image training tool
#[derive(Parser, Debug)]
#[command(
    name = "med-train",
    about = "Train and evaluate medical image segmentation and classification models",
    long_about = "Train a U-Net segmenter or a ResNet/DenseNet classifier, evaluate it on a \
                  test directory and render a side-by-side demo video."
)]
struct Args {
    /// Model to train
    #[arg(value_enum)]
    model: ModelArg,

    /// Training directory (image/ and mask/ for unet, one folder per class otherwise)
    #[arg(long, value_name = "DIR")]
    train_dir: Option<PathBuf>,

    /// Test directory with the same layout as the training directory
    #[arg(long, value_name = "DIR")]
    test_dir: Option<PathBuf>,

    /// Run name used for weights, metadata and video files
    #[arg(short = 'n', long, value_name = "NAME")]
    model_name: Option<String>,

    /// Weights to start from (loaded when the file exists)
    #[arg(short, long, value_name = "FILE")]
    weights: Option<PathBuf>,

    /// Evaluate only
    #[arg(long)]
    skip_training: bool,

    /// Compute device
    #[arg(long, value_enum)]
    device: Option<DeviceArg>,

    /// Number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Learning rate
    #[arg(short, long, value_name = "LR")]
    lr: Option<f64>,

    /// Positive-class weight of the segmentation BCE term
    #[arg(long, value_name = "W")]
    bce_weight: Option<f64>,

    /// ResNet depth
    #[arg(long, value_enum)]
    resnet_version: Option<ResNetArg>,

    /// Do not write a demo video
    #[arg(long)]
    no_video: bool,

    /// Demo video frame rate
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,

    /// Times each demo frame is repeated
    #[arg(long, value_name = "N")]
    hold: Option<u32>,

    /// Progress bar width in characters
    #[arg(long, value_name = "N")]
    bar_width: Option<usize>,

    /// Base configuration file (TOML); flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for weights, metadata and video
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Shuffle each epoch with this seed instead of using sorted order
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "[ERROR]".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    setup_cli_logging(args.verbose)?;

    let mut config: RunConfig = match &args.config {
        Some(path) => load_toml_config(path).context("Failed to load configuration file")?,
        None => RunConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("Failed to create output directory {}", config.output_dir.display())
    })?;

    print_config_summary(&config);

    match resolve_device(config.device, cfg!(feature = "wgpu")) {
        #[cfg(feature = "wgpu")]
        DeviceKind::Gpu => {
            run_with_backend::<Autodiff<burn::backend::Wgpu>>(&config, Default::default())
        }
        _ => run_with_backend::<Autodiff<NdArray>>(&config, Default::default()),
    }
}

fn apply_overrides(config: &mut RunConfig, args: &Args) {
    config.model = args.model.into();
    if let Some(dir) = &args.train_dir {
        config.train_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.test_dir {
        config.test_dir = Some(dir.clone());
    }
    if let Some(name) = &args.model_name {
        config.run_name = Some(name.clone());
    }
    if let Some(weights) = &args.weights {
        config.weights = Some(weights.clone());
    }
    if args.skip_training {
        config.skip_training = true;
    }
    if let Some(device) = args.device {
        config.device = device.into();
    }
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(lr) = args.lr {
        config.learning_rate = lr;
    }
    if let Some(weight) = args.bce_weight {
        config.bce_pos_weight = weight;
    }
    if let Some(depth) = args.resnet_version {
        config.resnet_depth = depth.into();
    }
    if args.no_video {
        config.video.enabled = false;
    }
    if let Some(fps) = args.fps {
        config.video.fps = fps;
    }
    if let Some(hold) = args.hold {
        config.video.hold_frames = hold;
    }
    if let Some(width) = args.bar_width {
        config.progress_bar_width = width;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(seed) = args.seed {
        config.shuffle_seed = Some(seed);
    }
}

fn print_config_summary(config: &RunConfig) {
    let path_or_none = |p: &Option<PathBuf>| {
        p.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    };

    println!("{}", "Medical Image Training".cyan().bold());
    println!("  Model:       {}", config.model);
    if config.model == ModelKind::Resnet {
        println!("  Depth:       {}", config.resnet_depth);
    }
    println!("  Run name:    {}", config.run_name());
    println!("  Train dir:   {}", path_or_none(&config.train_dir));
    println!("  Test dir:    {}", path_or_none(&config.test_dir));
    println!("  Input size:  {}", config.input_size());
    if config.skip_training {
        println!("  Training:    {}", "skipped".yellow());
    } else {
        println!("  Epochs:      {}", config.epochs);
        println!("  LR:          {}", config.learning_rate);
    }
    println!(
        "  Video:       {}",
        if config.video.enabled {
            format!("{} fps, hold {}", config.video.fps, config.video.hold_frames)
        } else {
            "off".to_string()
        }
    );
    println!("  Output dir:  {}", config.output_dir.display());
    println!();
}

/// Loads `config.weights` into `model` when that file exists.
fn load_initial_weights<B: Backend, M: Module<B>>(
    model: M,
    config: &RunConfig,
    device: &B::Device,
) -> Result<M> {
    let Some(path) = &config.weights else {
        return Ok(model);
    };
    if !weights_file(path).is_file() {
        warn!("Weights {} not found; starting from fresh weights", path.display());
        return Ok(model);
    }
    Ok(load_model::<B, M>(model, path, device)?)
}

fn run_with_backend<B: AutodiffBackend>(config: &RunConfig, device: B::Device) -> Result<()> {
    info!("Using {} backend", std::any::type_name::<B>());

    match config.model {
        ModelKind::Unet => {
            let model = UNetConfig::new().init::<B>(&device);
            let mut model = load_initial_weights(model, config, &device)?;
            let mut trainer = SegmentationTrainer::open(&mut model, config, device.clone())?;

            if !config.skip_training {
                let summary = trainer.train()?;
                println!("{}", "Training complete".green().bold());
                save_model::<B, _>(trainer.model(), &config.weights_output_path())?;
                let metadata = RunMetadata::new(
                    config.model,
                    config.run_name(),
                    summary.epochs,
                    config.learning_rate,
                );
                metadata.save(&config.metadata_path())?;
            }

            let report = trainer.evaluate()?;
            println!("{report}");
        }
        ModelKind::Densenet | ModelKind::Resnet => {
            let train_dir = config
                .train_dir
                .as_deref()
                .context("Classification requires --train-dir")?;
            let classes = ClassIndex::discover(train_dir)?;
            let model =
                ClassifierNet::<B>::new(config.model, config.resnet_depth, classes.len(), &device)?;
            let mut model = load_initial_weights(model, config, &device)?;
            let mut trainer = ClassificationTrainer::open(&mut model, config, device.clone())?;

            if !config.skip_training {
                let summary = trainer.train()?;
                println!("{}", "Training complete".green().bold());
                save_model::<B, _>(trainer.model(), &config.weights_output_path())?;

                let mut metadata = RunMetadata::new(
                    config.model,
                    config.run_name(),
                    summary.epochs,
                    config.learning_rate,
                )
                .with_classes(classes.names().to_vec());
                if config.model == ModelKind::Resnet {
                    metadata = metadata.with_resnet_depth(config.resnet_depth);
                }
                metadata.save(&config.metadata_path())?;
            }

            let report = trainer.evaluate()?;
            println!("{report}");
        }
    }

    Ok(())
}

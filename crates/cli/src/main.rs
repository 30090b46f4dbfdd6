//! QLeNet CLI
//!
//! Runs the fixed-point LeNet-5 engine on MNIST data and manages weight files.
//!
//! # Usage
//!
//! ```bash
//! # Accuracy of the quantized network on the MNIST test split
//! qlenet evaluate --weights lenet.safetensors --mnist-dir ./mnist
//!
//! # Classify one image
//! qlenet predict --weights poids.json digit.pgm
//!
//! # Convert a Keras JSON dump to the raw format
//! qlenet convert poids.json lenet.raw
//!
//! # Topology and quantization summary
//! qlenet info --weights lenet.raw --scale 10
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use qlenet_fixed_point::DEFAULT_SCALE;
use qlenet_harness::{evaluate_dataset, EvalConfig, QLeNetPipeline};
use qlenet_model::{
    load_pgm, load_weights, save_weights, topology, FloatParams, LeNet, MnistDataset,
    Normalization,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "qlenet")]
#[command(version)]
#[command(about = "Fixed-point LeNet-5 inference for MNIST digits")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure fixed-point and float accuracy on the MNIST test split
    Evaluate {
        /// Weight file (.raw, .bin, .safetensors, .json) [env: QLENET_WEIGHTS]
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Directory with the IDX test files [env: QLENET_MNIST_DIR]
        #[arg(short, long)]
        mnist_dir: Option<PathBuf>,

        /// Evaluate only the first N images [env: QLENET_LIMIT]
        #[arg(short, long)]
        limit: Option<usize>,

        /// Worker threads [env: QLENET_THREADS]
        #[arg(short, long)]
        threads: Option<usize>,

        /// Pixel scaling: unit-range or raw [env: QLENET_NORMALIZE]
        #[arg(short, long)]
        normalize: Option<Normalization>,

        /// Fractional bits (8, 10 or 16)
        #[arg(short, long, default_value_t = DEFAULT_SCALE)]
        scale: u32,

        /// Seed for random weights when no weight file is given
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Classify a single PGM image or one MNIST test image
    Predict {
        /// 28x28 PGM image
        #[arg(required_unless_present = "index")]
        image: Option<PathBuf>,

        /// Index into the MNIST test split instead of a PGM file
        #[arg(short, long, conflicts_with = "image")]
        index: Option<usize>,

        /// Weight file [env: QLENET_WEIGHTS]
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Directory with the IDX test files [env: QLENET_MNIST_DIR]
        #[arg(short, long)]
        mnist_dir: Option<PathBuf>,

        /// Pixel scaling: unit-range or raw [env: QLENET_NORMALIZE]
        #[arg(short, long)]
        normalize: Option<Normalization>,

        /// Fractional bits (8, 10 or 16)
        #[arg(short, long, default_value_t = DEFAULT_SCALE)]
        scale: u32,

        /// Also report per-layer error against the float reference
        #[arg(long)]
        trace: bool,

        /// Seed for random weights when no weight file is given
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Convert weights between formats (chosen by extension)
    Convert {
        /// Source weight file
        input: PathBuf,

        /// Destination (.raw, .bin or .safetensors)
        output: PathBuf,
    },

    /// Show the topology and, given weights, their quantization summary
    Info {
        /// Weight file [env: QLENET_WEIGHTS]
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Fractional bits (8, 10 or 16)
        #[arg(short, long, default_value_t = DEFAULT_SCALE)]
        scale: u32,
    },
}

/// Call `$f` monomorphized for the requested Q format
macro_rules! with_scale {
    ($scale:expr, $f:ident ( $($arg:expr),* $(,)? )) => {
        match $scale {
            8 => $f::<8>($($arg),*),
            10 => $f::<10>($($arg),*),
            16 => $f::<16>($($arg),*),
            other => bail!("unsupported scale {} (expected 8, 10 or 16)", other),
        }
    };
}

fn load_params(weights: Option<&Path>, seed: u64) -> Result<FloatParams> {
    match weights {
        Some(path) => {
            load_weights(path).with_context(|| format!("loading weights from {}", path.display()))
        }
        None => {
            warn!(seed, "No weight file given, using random weights");
            Ok(FloatParams::random(&mut ChaCha8Rng::seed_from_u64(seed)))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_evaluate<const S: u32>(config: &EvalConfig, seed: u64, json: bool) -> Result<()> {
    let params = load_params(config.weights.as_deref(), seed)?;
    let pipeline = QLeNetPipeline::<S>::new(params);

    let mut dataset = MnistDataset::load(&config.mnist_dir, config.normalization)
        .with_context(|| format!("loading MNIST from {}", config.mnist_dir.display()))?;
    if let Some(limit) = config.limit {
        dataset.truncate(limit);
    }
    info!(images = dataset.len(), scale = S, "Evaluating");

    let report = evaluate_dataset(&pipeline, &dataset, config.threads)?;
    if json {
        return print_json(&report);
    }

    println!("=== QLeNet Evaluation (Q{}) ===", S);
    println!("Images:           {}", report.total);
    println!(
        "Fixed accuracy:   {:.2}% ({}/{})",
        report.fixed_accuracy() * 100.0,
        report.fixed_correct,
        report.total
    );
    println!(
        "Float accuracy:   {:.2}% ({}/{})",
        report.float_accuracy() * 100.0,
        report.float_correct,
        report.total
    );
    println!("Argmax agreement: {:.2}%", report.agreement_rate() * 100.0);
    println!("Max |p_fixed - p_float|:  {:.6}", report.max_prob_diff);
    println!("Mean |p_fixed - p_float|: {:.6}", report.mean_prob_diff);
    println!(
        "Throughput:       {:.1} images/s on {} threads ({} ms)",
        report.images_per_sec(),
        report.threads,
        report.elapsed_ms
    );
    Ok(())
}

struct PredictArgs {
    image: Option<PathBuf>,
    index: Option<usize>,
    mnist_dir: PathBuf,
    normalization: Normalization,
    trace: bool,
}

fn run_predict<const S: u32>(args: &PredictArgs, params: FloatParams, json: bool) -> Result<()> {
    let (image, label) = match (&args.image, args.index) {
        (Some(path), _) => {
            let image = load_pgm(path, args.normalization)
                .with_context(|| format!("reading {}", path.display()))?;
            (image, None)
        }
        (None, Some(index)) => {
            let dataset = MnistDataset::load(&args.mnist_dir, args.normalization)
                .with_context(|| format!("loading MNIST from {}", args.mnist_dir.display()))?;
            let Some(sample) = dataset.get(index) else {
                bail!("index {} out of range ({} images)", index, dataset.len());
            };
            (sample.image, Some(sample.label))
        }
        (None, None) => bail!("either an image path or --index is required"),
    };

    let pipeline = QLeNetPipeline::<S>::new(params);
    let result = pipeline.run(&image);
    let layers = if args.trace {
        pipeline.compare_layers(&image)
    } else {
        Vec::new()
    };

    if json {
        #[derive(Serialize)]
        struct Output<'a> {
            label: Option<usize>,
            #[serde(flatten)]
            result: &'a qlenet_harness::InferenceResult,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            layers: Vec<qlenet_harness::LayerDivergence>,
        }
        return print_json(&Output {
            label,
            result: &result,
            layers,
        });
    }

    println!(
        "Predicted digit: {} ({:.2}%)",
        result.fixed.class,
        result.fixed.confidence * 100.0
    );
    if let Some(label) = label {
        println!("Label:           {}", label);
    }
    println!(
        "Float reference: {} ({:.2}%)",
        result.reference.class,
        result.reference.confidence * 100.0
    );
    for (digit, (p, r)) in result
        .fixed
        .probabilities
        .iter()
        .zip(&result.reference.probabilities)
        .enumerate()
    {
        println!("  {}: {:.6}  (float {:.6})", digit, p, r);
    }
    for l in &layers {
        println!(
            "  {:<8} max err {:.6}  mean err {:.6}",
            l.layer, l.max_abs_error, l.mean_abs_error
        );
    }
    Ok(())
}

fn run_info<const S: u32>(params: Option<&FloatParams>, json: bool) -> Result<()> {
    let layers = topology();
    let report = params.map(|p| *LeNet::<S>::from_float(p).quantization_report());

    if json {
        #[derive(Serialize)]
        struct Output {
            scale: u32,
            parameters: usize,
            layers: Vec<qlenet_model::LayerSpec>,
            quantization: Option<qlenet_fixed_point::QuantizationReport>,
        }
        return print_json(&Output {
            scale: S,
            parameters: FloatParams::PARAMETER_COUNT,
            layers,
            quantization: report,
        });
    }

    println!("=== LeNet-5 (Q{}) ===", S);
    for l in &layers {
        println!(
            "  {:<8} {:>14} -> {:<14} {:>8} params",
            l.name,
            format!("{:?}", l.input),
            format!("{:?}", l.output),
            l.parameters
        );
    }
    println!("Total parameters: {}", FloatParams::PARAMETER_COUNT);
    if let Some(report) = report {
        println!("Quantized elements: {}", report.elements);
        println!("Saturated:          {}", report.saturated);
        println!("Max rounding error: {:.3e}", report.max_abs_error);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qlenet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Evaluate {
            weights,
            mnist_dir,
            limit,
            threads,
            normalize,
            scale,
            seed,
        } => {
            let mut config = EvalConfig::from_env()?;
            if weights.is_some() {
                config.weights = weights;
            }
            if let Some(dir) = mnist_dir {
                config.mnist_dir = dir;
            }
            if limit.is_some() {
                config.limit = limit;
            }
            if threads.is_some() {
                config.threads = threads;
            }
            if let Some(n) = normalize {
                config.normalization = n;
            }
            config.validate()?;
            with_scale!(scale, run_evaluate(&config, seed, cli.json))
        }

        Commands::Predict {
            image,
            index,
            weights,
            mnist_dir,
            normalize,
            scale,
            trace,
            seed,
        } => {
            let env = EvalConfig::inputs_from_env()?;
            let params = load_params(weights.or(env.weights).as_deref(), seed)?;
            let args = PredictArgs {
                image,
                index,
                mnist_dir: mnist_dir.unwrap_or(env.mnist_dir),
                normalization: normalize.unwrap_or(env.normalization),
                trace,
            };
            with_scale!(scale, run_predict(&args, params, cli.json))
        }

        Commands::Convert { input, output } => {
            let params = load_weights(&input)
                .with_context(|| format!("loading weights from {}", input.display()))?;
            save_weights(&params, &output)
                .with_context(|| format!("writing {}", output.display()))?;
            info!(from = %input.display(), to = %output.display(), "Converted weights");
            Ok(())
        }

        Commands::Info { weights, scale } => {
            let weights = weights.or(EvalConfig::inputs_from_env()?.weights);
            let params = match weights {
                Some(path) => Some(
                    load_weights(&path)
                        .with_context(|| format!("loading weights from {}", path.display()))?,
                ),
                None => None,
            };
            with_scale!(scale, run_info(params.as_ref(), cli.json))
        }
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use scenecap::{
    AdaptiveVideoProcessor, AppConfig, CacheOptions, CaptionBackend, ContentAddressedCache,
    ContentKey, DecodeErrorPolicy, EmbeddingCollection, EmbeddingStore, FfmpegLogLevel,
    OperationType, ProgressCallback, ProgressInfo, ScanOptions, SceneChangeDetector, SceneSaver,
    VideoCaptioner, VideoFile, build_engine, derive_key, normalize, reconstruct,
};

const CLI_AFTER_HELP: &str = "Examples:\n  scenecap scenes input.mp4 --out scenes --progress\n  scenecap caption input.mp4 --endpoint http://localhost:8000/caption --json\n  scenecap key scenes/scene_0001.jpg\n  scenecap inspect 3f2b8c1e-6a4d-4f0e-9b7a-1c2d3e4f5a6b\n  scenecap completions zsh > _scenecap";

#[derive(Debug, Parser)]
#[command(
    name = "scenecap",
    version,
    about = "Find the scenes of a video, caption them, and index captions by content",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long, global = true)]
    progress: bool,

    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Detect scene changes and save one frame per scene.
    #[command(
        about = "Detect and save scene frames",
        after_help = "Examples:\n  scenecap scenes input.mp4 --out scenes\n  scenecap scenes input.mp4 --out scenes --num-diffs 20 --min-gap 45 --json"
    )]
    Scenes {
        /// Input video path.
        input: PathBuf,
        /// Directory scene frames are written to.
        #[arg(long)]
        out: PathBuf,
        /// Rolling window size of the detector.
        #[arg(long)]
        num_diffs: Option<usize>,
        /// Minimum decoded frames between saved scenes.
        #[arg(long)]
        min_gap: Option<u64>,
        /// Stop quietly at the first undecodable frame instead of failing.
        #[arg(long)]
        lenient: bool,
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Caption a video and index the scene captions.
    #[command(
        about = "Caption a video",
        after_help = "Examples:\n  scenecap caption input.mp4 --endpoint http://localhost:8000/caption\n  scenecap caption input.mp4 --backend llava --store ./store --json"
    )]
    Caption {
        /// Input video path.
        input: PathBuf,
        /// Caption server endpoint.
        #[arg(long)]
        endpoint: Option<String>,
        /// Caption backend: vit_gpt2 | blip2 | llava.
        #[arg(long)]
        backend: Option<String>,
        /// Model id override.
        #[arg(long)]
        model: Option<String>,
        /// Embedding store root.
        #[arg(long)]
        store: Option<PathBuf>,
        /// Collection name.
        #[arg(long)]
        collection: Option<String>,
        /// Temporary scene directory.
        #[arg(long)]
        scene_dir: Option<PathBuf>,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the content key of an image.
    #[command(about = "Compute an image's content key")]
    Key {
        /// Image path.
        image: PathBuf,
        /// Print the key and tensor shape as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Look up a stored record and reconstruct its tensor.
    #[command(about = "Inspect a stored record")]
    Inspect {
        /// Content key (hyphenated UUID).
        key: String,
        /// Embedding store root.
        #[arg(long)]
        store: Option<PathBuf>,
        /// Collection name.
        #[arg(long)]
        collection: Option<String>,
        /// Print the record summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if global.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let level = match &global.log_level {
        Some(level) => {
            parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?
        }
        None => FfmpegLogLevel::for_verbosity(global.verbose),
    };
    scenecap::set_ffmpeg_log_level(level);
    Ok(())
}

fn load_config(global: &GlobalOptions) -> Result<AppConfig, Box<dyn std::error::Error>> {
    match &global.config {
        Some(path) => Ok(AppConfig::load(path)?),
        None => Ok(AppConfig::default()),
    }
}

fn ensure_output_dir(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if !path.is_dir() {
            return Err(format!("output is not a directory: {}", path.display()).into());
        }
        if fs::read_dir(path)?.next().is_some() {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("writing into non-empty directory {}", path.display()).yellow()
            );
        }
    }
    Ok(())
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style =
            ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        let stage = match info.operation {
            OperationType::SceneScan => "scanning",
            OperationType::Captioning => "captioning",
            _ => "working",
        };
        if let Some(total) = info.total {
            self.bar.set_length(total);
        }
        self.bar.set_position(info.current);
        self.bar
            .set_message(format!("{stage} ({} scenes)", info.scenes_captured));
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn scan_options(global: &GlobalOptions, config: &AppConfig) -> Result<ScanOptions, Box<dyn std::error::Error>> {
    let mut options = ScanOptions::from(&config.scan);
    if global.progress {
        options = options
            .with_progress(Arc::new(TerminalProgress::new()?))
            .with_batch_size(25);
    }
    Ok(options)
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;
    let mut config = load_config(&cli.global)?;

    match cli.command {
        Commands::Scenes {
            input,
            out,
            num_diffs,
            min_gap,
            lenient,
            json,
        } => {
            if let Some(num_diffs) = num_diffs {
                config.scan.num_diffs = num_diffs;
            }
            if let Some(min_gap) = min_gap {
                config.scan.min_frames_between_saves = min_gap;
            }
            if lenient {
                config.scan.decode_errors = DecodeErrorPolicy::EndOfStream;
            }
            config.validate()?;
            ensure_output_dir(&out)?;

            let mut video = VideoFile::open(&input)?;
            let mut saver = SceneSaver::new(&out);
            let mut processor =
                AdaptiveVideoProcessor::new(SceneChangeDetector::new(config.scan.num_diffs))
                    .with_options(scan_options(&cli.global, &config)?);
            let summary = processor.process(&mut video, &mut saver)?;

            if json {
                let payload = json!({
                    "video": video.metadata(),
                    "summary": summary,
                    "scenes": saver.scenes().iter().map(|scene| json!({
                        "number": scene.number,
                        "frame_index": scene.frame_index,
                        "path": scene.path,
                    })).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "{} {:.2}s, every {} of {} frames sampled",
                    "scanned".green().bold(),
                    summary.duration,
                    summary.skip_rate,
                    summary.frames_decoded
                );
                for scene in saver.scenes() {
                    println!(
                        "{} scene {} at frame {} -> {}",
                        "saved".green().bold(),
                        scene.number,
                        scene.frame_index,
                        scene.path.display()
                    );
                }
                if summary.boundaries_suppressed > 0 {
                    println!(
                        "{}",
                        format!(
                            "{} changes closer than {} frames were skipped",
                            summary.boundaries_suppressed, config.scan.min_frames_between_saves
                        )
                        .dimmed()
                    );
                }
            }
        }
        Commands::Caption {
            input,
            endpoint,
            backend,
            model,
            store,
            collection,
            scene_dir,
            json,
        } => {
            if let Some(endpoint) = endpoint {
                config.inference.endpoint = Some(endpoint);
            }
            if let Some(backend) = backend {
                config.inference.backend = backend.parse::<CaptionBackend>()?;
            }
            if model.is_some() {
                config.inference.model = model;
            }
            if let Some(store) = store {
                config.cache.store_path = store;
            }
            if let Some(collection) = collection {
                config.cache.collection = collection;
            }
            if let Some(scene_dir) = scene_dir {
                config.scan.scene_dir = scene_dir;
            }
            config.validate()?;

            let store = EmbeddingStore::open(&config.cache.store_path)?;
            let collection = store.collection(&config.cache.collection)?;
            let cache = ContentAddressedCache::new(collection, CacheOptions::from(&config.cache))?;
            let engine = build_engine(&config.inference)?;

            let processor =
                AdaptiveVideoProcessor::new(SceneChangeDetector::new(config.scan.num_diffs))
                    .with_options(scan_options(&cli.global, &config)?);
            let mut captioner = VideoCaptioner::from_config(engine, cache, &config)
                .with_processor(processor);

            let mut video = VideoFile::open(&input)?;
            let report = captioner.caption_video(&mut video)?;
            let persisted = captioner.finish();

            if json {
                let payload = json!({
                    "caption": report.caption,
                    "scenes": report.scenes,
                    "summary": report.summary,
                    "persisted": persisted,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                for scene in &report.scenes {
                    println!(
                        "{} {} (frame {}): {}",
                        "scene".cyan().bold(),
                        scene.number,
                        scene.frame_index,
                        scene.caption
                    );
                }
                println!("{} {}", "caption".green().bold(), report.caption);
                println!(
                    "{}",
                    format!(
                        "indexed {} new, {} already known, {} failed",
                        persisted.inserted, persisted.skipped, persisted.failed
                    )
                    .dimmed()
                );
            }
        }
        Commands::Key { image: path, json } => {
            let frame = image::open(&path)?.to_rgb8();
            let tensor = normalize(&frame, &config.normalization)?;
            let key = derive_key(&tensor);
            if json {
                let payload = json!({
                    "key": key,
                    "image_tensor_shape": tensor.shape_descriptor(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("{key}");
            }
        }
        Commands::Inspect {
            key,
            store,
            collection,
            json,
        } => {
            let key: ContentKey = key.parse()?;
            let root = store.unwrap_or(config.cache.store_path);
            let name = collection.unwrap_or(config.cache.collection);
            let collection = EmbeddingStore::open(&root)?.collection(&name)?;

            let record = collection
                .get(&key)?
                .ok_or(format!("no record {key} in collection {name}"))?;
            let tensor = reconstruct(&record.embedding, &record.metadata.image_tensor_shape)?;
            let values = tensor.values();
            let (min, max) = values
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len().max(1) as f64;

            if json {
                let payload = json!({
                    "key": key,
                    "caption": record.metadata.caption,
                    "shape": tensor.shape(),
                    "min": min,
                    "max": max,
                    "mean": mean,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Key: {key}");
                println!("Caption: {}", record.metadata.caption);
                println!("Shape: {}", tensor.shape_descriptor());
                println!("Values: min {min:.4}, max {max:.4}, mean {mean:.4}");
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "scenecap", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

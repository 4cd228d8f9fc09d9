use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use animcard::{
    CacheStage, FrameCache, FrameRenderer, GifOptions, OperationType, ProgressCallback,
    ProgressInfo, RenderJob, RenderOptions, RenderOutput, ResizeFilter, save_gif,
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use tempfile::TempDir;

const CLI_AFTER_HELP: &str = "Examples:\n  animcard probe avatar.gif --json\n  animcard render avatar.gif --out frames --width 256 --height 256 --progress\n  animcard render banner.gif --out frames --overlay logo.png --alpha 0.6 --gif card.gif\n  animcard cache /tmp/animcard-cache --clear\n  animcard completions zsh > _animcard";

#[derive(Debug, Parser)]
#[command(
    name = "animcard",
    version,
    about = "Resize, watermark, and re-encode animated images frame by frame",
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
    /// Show additional logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long, global = true)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long, global = true)]
    overwrite: bool,

    /// Default worker count for commands that render.
    #[arg(long, global = true)]
    threads: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print canvas size, format, and frame count for an image.
    #[command(
        about = "Probe a source image",
        visible_alias = "info",
        after_help = "Examples:\n  animcard probe avatar.gif\n  animcard probe avatar.gif --json"
    )]
    Probe {
        /// Input image path.
        input: PathBuf,

        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Render every sampled frame to PNG files.
    #[command(
        about = "Render an animated card",
        after_help = "Examples:\n  animcard render avatar.gif --out frames --width 256 --height 256\n  animcard render banner.gif --out frames --skip 2 --overlay logo.png --alpha 0.5 --cache-dir .cache"
    )]
    Render {
        /// Input image path.
        input: PathBuf,
        /// Output directory for `frame-<index>.png` files.
        #[arg(long)]
        out: PathBuf,
        /// Canvas width in pixels.
        #[arg(long, default_value_t = 512)]
        width: u32,
        /// Canvas height in pixels.
        #[arg(long, default_value_t = 512)]
        height: u32,
        /// Keep every Nth source frame.
        #[arg(long, default_value_t = 1)]
        skip: u64,
        /// Overlay image composited onto every frame.
        #[arg(long)]
        overlay: Option<PathBuf>,
        /// Overlay opacity between 0 and 1.
        #[arg(long, default_value_t = 1.0)]
        alpha: f32,
        /// Worker count (overrides --threads).
        #[arg(long)]
        workers: Option<usize>,
        /// Persistent cache directory; reruns resume from it. A temporary
        /// directory is used and removed when omitted.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Resize filter (nearest, triangle, catmull-rom, gaussian, lanczos3).
        #[arg(long, default_value = "lanczos3")]
        filter: String,
        /// Also reassemble the frames into an animated GIF at this path.
        #[arg(long)]
        gif: Option<PathBuf>,
        /// Print statistics as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear a render cache directory.
    #[command(
        about = "Inspect a render cache",
        after_help = "Examples:\n  animcard cache .cache\n  animcard cache .cache --clear"
    )]
    Cache {
        /// Cache directory.
        dir: PathBuf,
        /// Remove the cache directory and everything in it.
        #[arg(long)]
        clear: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let level = if global.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)?;
    Ok(())
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

/// Without `--cache-dir` the job caches into a scratch directory that is
/// removed when the returned guard drops, whether or not the render succeeded.
fn render_job(
    source: Vec<u8>,
    cache_dir: Option<PathBuf>,
) -> std::io::Result<(RenderJob, Option<TempDir>)> {
    match cache_dir {
        Some(dir) => Ok((RenderJob::new(source, dir), None)),
        None => {
            let scratch = tempfile::Builder::new().prefix("animcard-").tempdir()?;
            let job = RenderJob::new(source, scratch.path());
            Ok((job, Some(scratch)))
        }
    }
}

fn frame_file_name(index: u64) -> String {
    format!("frame-{index}.png")
}

/// Drives an indicatif bar from pipeline progress callbacks.
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
            OperationType::FrameExtraction => "extracting",
            OperationType::FrameEncoding => "encoding",
            OperationType::GifExport => "assembling",
            _ => "working",
        };
        if let Some(total) = info.total {
            self.bar.set_length(total);
        }
        self.bar.set_position(info.current);
        self.bar.set_message(stage);
    }
}

struct RenderArgs {
    width: u32,
    height: u32,
    skip: u64,
    overlay: Option<PathBuf>,
    alpha: f32,
    workers: Option<usize>,
    filter: String,
}

fn render_options(
    args: &RenderArgs,
    global: &GlobalOptions,
    progress: Option<Arc<TerminalProgress>>,
) -> Result<RenderOptions, Box<dyn std::error::Error>> {
    let filter: ResizeFilter = args.filter.parse()?;
    let mut options = RenderOptions::new()
        .with_canvas(args.width, args.height)
        .with_frame_skip(args.skip)
        .with_resize_filter(filter);

    if let Some(workers) = args.workers.or(global.threads) {
        options = options.with_workers(workers);
    }
    if let Some(path) = &args.overlay {
        options = options.with_overlay(fs::read(path)?, args.alpha);
    }
    if let Some(progress) = progress {
        options = options.with_progress(progress);
    }
    options.validate()?;
    Ok(options)
}

fn print_stats(output: &RenderOutput, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let stats = &output.stats;
    if json {
        let payload = json!({
            "requested": stats.requested,
            "produced": stats.produced,
            "skipped": stats.skipped,
            "extract_cache_hits": stats.extract_cache_hits,
            "encode_cache_hits": stats.encode_cache_hits,
            "frames_decoded": stats.frames_decoded,
            "frames_encoded": stats.frames_encoded,
            "cache_write_failures": stats.cache_write_failures,
            "workers": stats.workers,
            "elapsed_seconds": stats.elapsed.as_secs_f64(),
            "duration_ms": output.duration().as_millis() as u64,
            "peak_rss_kb": stats.peak_rss_kb,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "Frames: {}/{} ({} skipped)",
            stats.produced, stats.requested, stats.skipped
        );
        println!(
            "Cache hits: {} extract, {} encode",
            stats.extract_cache_hits, stats.encode_cache_hits
        );
        println!("Workers: {}", stats.workers);
        println!("Elapsed: {:?}", stats.elapsed);
        if stats.cache_write_failures > 0 {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("{} cache write(s) failed", stats.cache_write_failures).yellow()
            );
        }
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.global)?;

    match cli.command {
        Commands::Probe { input, json } => {
            let source = fs::read(&input)?;
            let info = FrameRenderer::new(RenderOptions::new()).probe(&source)?;
            if json {
                let payload = json!({
                    "format": format!("{:?}", info.format),
                    "width": info.width,
                    "height": info.height,
                    "frame_count": info.frame_count(),
                    "animated": info.is_animated(),
                    "frame_delays_ms": info.frame_delays_ms,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Format: {:?}", info.format);
                println!("Canvas: {}x{}", info.width, info.height);
                println!("Frames: {}", info.frame_count());
            }
        }
        Commands::Render {
            input,
            out,
            width,
            height,
            skip,
            overlay,
            alpha,
            workers,
            cache_dir,
            filter,
            gif,
            json,
        } => {
            let args = RenderArgs {
                width,
                height,
                skip,
                overlay,
                alpha,
                workers,
                filter,
            };
            let progress = if cli.global.progress {
                Some(Arc::new(TerminalProgress::new()?))
            } else {
                None
            };
            let options = render_options(&args, &cli.global, progress.clone())?;

            let source = fs::read(&input)?;
            let (job, _scratch) = render_job(source, cache_dir)?;

            let output = FrameRenderer::new(options).render(&job)?;
            if let Some(progress) = &progress {
                progress.bar.finish_with_message("done");
            }

            fs::create_dir_all(&out)?;
            for frame in &output.frames {
                let path = out.join(frame_file_name(frame.index));
                ensure_writable_path(&path, cli.global.overwrite)?;
                fs::write(&path, &frame.buffer)?;
                if cli.global.verbose {
                    eprintln!("saved frame {} -> {}", frame.index, path.display());
                }
            }

            if let Some(path) = gif {
                ensure_writable_path(&path, cli.global.overwrite)?;
                let mut gif_options = GifOptions::new();
                if let Some(progress) = &progress {
                    progress.bar.reset();
                    gif_options = gif_options.with_progress(progress.clone());
                }
                save_gif(&path, &output, &gif_options)?;
                if let Some(progress) = &progress {
                    progress.bar.finish_with_message("done");
                }
                println!("{} {}", "saved".green().bold(), path.display());
            }

            print_stats(&output, json)?;
            println!(
                "{} {}",
                "success:".green().bold(),
                format!(
                    "Rendered {} frame(s) to {}",
                    output.frames.len(),
                    out.display()
                )
                .green()
            );
        }
        Commands::Cache { dir, clear } => {
            let cache = FrameCache::open_existing(&dir)?;
            if clear {
                cache.clear()?;
                println!("{} {}", "cleared".green().bold(), dir.display());
            } else {
                for stage in CacheStage::ALL {
                    let indices = cache.cached_indices(stage)?;
                    println!("{stage}: {} frame(s) {:?}", indices.len(), indices);
                }
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "animcard", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use animcard::{FrameRenderer, RenderOptions};
    use clap::Parser;

    use super::{Cli, Commands, frame_file_name, render_job};

    #[test]
    fn render_defaults() {
        let cli = Cli::try_parse_from(["animcard", "render", "in.gif", "--out", "frames"]).unwrap();
        match cli.command {
            Commands::Render {
                width,
                height,
                skip,
                alpha,
                filter,
                ..
            } => {
                assert_eq!((width, height), (512, 512));
                assert_eq!(skip, 1);
                assert_eq!(alpha, 1.0);
                assert_eq!(filter, "lanczos3");
            }
            other => panic!("Expected render command, got: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["animcard", "probe", "in.gif", "--verbose", "--threads", "3"])
            .unwrap();
        assert!(cli.global.verbose);
        assert_eq!(cli.global.threads, Some(3));
    }

    #[test]
    fn frame_files_match_cache_layout() {
        assert_eq!(frame_file_name(0), "frame-0.png");
        assert_eq!(frame_file_name(42), "frame-42.png");
    }

    // ── Scratch cache ──────────────────────────────────────────────────

    #[test]
    fn scratch_cache_is_removed_after_failed_render() {
        let (job, scratch) =
            render_job(b"not an image".to_vec(), None).expect("Failed to create scratch cache");
        let root = job.cache_dir().to_path_buf();
        assert!(root.is_dir());

        assert!(FrameRenderer::new(RenderOptions::new()).render(&job).is_err());
        drop(scratch);
        assert!(!root.exists());
    }

    #[test]
    fn explicit_cache_dir_is_kept() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let (job, scratch) = render_job(Vec::new(), Some(directory.path().join("cache")))
            .expect("Failed to build job");
        assert!(scratch.is_none());
        assert_eq!(job.cache_dir(), directory.path().join("cache"));
    }
}

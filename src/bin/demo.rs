//! demo - end-to-end synthetic run of the boundary-crossing recorder

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;

use tripwire::config::CompressionBackend;
use tripwire::ui::Ui;
use tripwire::{ClipManifest, ClipSummary, Orchestrator, TripwireConfig};

const FRAME_WIDTH: u32 = 320;
const FRAME_HEIGHT: u32 = 480;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds of synthetic footage.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Frames per second for the synthetic sources.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Output directory for clips and manifests.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Number of synthetic cameras.
    #[arg(long, default_value_t = 1)]
    cameras: usize,
    /// Compress finished clips with ffmpeg.
    #[arg(long)]
    compress: bool,
    /// Output style: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if args.cameras == 0 {
        return Err(anyhow!("cameras must be >= 1"));
    }
    let ui = Ui::from_args(
        args.ui.as_deref(),
        std::io::stderr().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    );

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let cfg = demo_config(&args, &out_dir)?;
    let total_ticks = args.seconds.saturating_mul(args.fps as u64);

    let mut orchestrator = {
        let _stage = ui.stage("open synthetic cameras");
        Orchestrator::from_config(&cfg)?
    };

    let mut clips: Vec<ClipSummary> = Vec::new();
    let mut crossings = 0u64;
    {
        let _stage = ui.stage("run pipeline");
        let mut progress = ui.ticks(total_ticks);
        for _ in 0..total_ticks {
            if !orchestrator.is_running() {
                break;
            }
            let result = orchestrator.tick();
            if result.boundary_crossed {
                crossings += 1;
            }
            clips.extend(result.completed_clips);
            progress.advance(&format!("crossings={} clips={}", crossings, clips.len()));
        }
    }

    {
        let _stage = ui.stage("finalize sessions");
        clips.extend(orchestrator.shutdown());
    }

    println!(
        "demo: {} tick(s), {} crossing tick(s), {} clip(s)",
        total_ticks,
        crossings,
        clips.len()
    );
    for clip in &clips {
        let digest = ClipManifest::read(&tripwire::record::storage::manifest_path_for(&clip.path))
            .map(|m| m.sha256)
            .unwrap_or_else(|_| "-".to_string());
        println!(
            "  [{}] {} pre={} live={} early={} sha256={}",
            clip.camera,
            clip.path.display(),
            clip.pre_event_frames,
            clip.live_frames,
            clip.finalized_early,
            digest
        );
        if let Some(compressed) = &clip.compressed_path {
            println!("        compressed -> {}", compressed.display());
        }
    }
    Ok(())
}

fn demo_config(args: &Args, out_dir: &std::path::Path) -> Result<TripwireConfig> {
    let mut cfg = TripwireConfig::default();
    cfg.sources = (0..args.cameras)
        .map(|i| {
            format!(
                "stub://demo{}?width={}&height={}&period={}&frames={}",
                i,
                FRAME_WIDTH,
                FRAME_HEIGHT,
                args.fps.max(2),
                args.seconds.saturating_mul(args.fps as u64)
            )
        })
        .collect();
    cfg.frame_width = FRAME_WIDTH;
    cfg.target_fps = args.fps;
    cfg.buffer_seconds = 1;
    cfg.post_crossing_frames = None;
    cfg.storage.output_dir = out_dir.join("clips");
    cfg.storage.compressed_dir = out_dir.join("compressed");
    cfg.compression.backend = if args.compress {
        CompressionBackend::Ffmpeg
    } else {
        CompressionBackend::None
    };
    cfg.runtime.boundary_y = (FRAME_HEIGHT / 2) as i32;
    cfg.validate()?;
    Ok(cfg)
}

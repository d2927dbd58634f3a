//! tripwired - boundary-crossing clip recorder daemon
//!
//! This daemon:
//! 1. Opens every configured camera (unavailable ones are skipped)
//! 2. Runs detection, tracking and boundary evaluation per camera per tick
//! 3. Records a pre/post-event clip for every crossing
//! 4. Hands finished clips to the compression service
//! 5. Finalizes open sessions on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tripwire::{CameraStats, Orchestrator, TripwireConfig};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML by extension).
    #[arg(long, env = "TRIPWIRE_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many ticks (0 = run until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    max_ticks: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = TripwireConfig::load_from(args.config.as_deref())?;
    log::info!(
        "tripwired {}: {} source(s), boundary_y={}, {} fps, clips in {}",
        env!("CARGO_PKG_VERSION"),
        cfg.sources.len(),
        cfg.runtime.boundary_y,
        cfg.target_fps,
        cfg.storage.output_dir.display()
    );

    let mut orchestrator = Orchestrator::from_config(&cfg)?;
    let control = orchestrator.control_handle();
    ctrlc::set_handler(move || {
        let _ = control.shutdown();
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {e}"))?;
    log::info!(
        "tripwired running with cameras {:?} (Ctrl-C to stop)",
        orchestrator.camera_names()
    );

    let interval = cfg.tick_interval();
    let mut health: BTreeMap<String, CameraStats> = BTreeMap::new();
    let mut last_health_log = Instant::now();
    let mut clips_completed = 0usize;

    while orchestrator.is_running() {
        let started = Instant::now();
        let result = orchestrator.tick();

        for clip in &result.completed_clips {
            clips_completed += 1;
            log::info!(
                "[{}] clip ready: {} ({} pre-event + {} live frames)",
                clip.camera,
                clip.path.display(),
                clip.pre_event_frames,
                clip.live_frames
            );
        }
        for report in &result.cameras {
            health.insert(report.camera.clone(), report.stats);
        }

        if last_health_log.elapsed() >= HEALTH_INTERVAL {
            for (camera, stats) in &health {
                log::info!(
                    "[{}] health frames={} read_failures={} inference_failures={} crossings={} sessions={}/{} aborted",
                    camera,
                    stats.frames,
                    stats.read_failures,
                    stats.inference_failures,
                    stats.crossings,
                    stats.sessions_completed,
                    stats.sessions_aborted
                );
            }
            last_health_log = Instant::now();
        }

        if args.max_ticks > 0 && result.tick >= args.max_ticks {
            log::info!("reached {} ticks", args.max_ticks);
            break;
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let finalized = orchestrator.shutdown();
    for clip in &finalized {
        log::info!(
            "[{}] clip finalized at shutdown: {}",
            clip.camera,
            clip.path.display()
        );
    }
    log::info!(
        "tripwired stopped: {} clip(s) recorded",
        clips_completed + finalized.len()
    );
    Ok(())
}

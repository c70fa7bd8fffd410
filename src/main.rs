// src/main.rs
mod actions;
mod cli;
mod config;
mod data;
mod dispatch;
mod effector;
mod error;
mod gesture;
mod landmarks;
mod mediapipe_bridge;
mod trigger;
mod video;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::actions::ActionRegistry;
use crate::cli::{Cli, Commands, RunArgs};
use crate::config::Config;
use crate::data::SessionRecorder;
use crate::dispatch::{CancelToken, DispatchLoop};
use crate::error::RegistryError;
use crate::effector::{AdbDevice, DeviceCommand, DryRunEffector, Effector, QueuedEffector};
use crate::mediapipe_bridge::ProcessDetector;
use crate::video::{list_cameras, CameraSource, ReplaySource};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Commands::Init { force } = cli.command {
        return run_init(cli.config.as_deref(), force);
    }

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_default().context("Failed to load default config")?,
    };

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            config.validate().context("Invalid settings")?;
            run_dispatch(config, args).await
        }
        Commands::Probe { send, serial } => {
            if serial.is_some() {
                config.device.serial = serial;
            }
            run_probe(&config, send)
        }
        Commands::Init { .. } => Ok(()),
    }
}

async fn run_dispatch(config: Config, args: RunArgs) -> Result<()> {
    let cancel = CancelToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            on_signal.cancel();
        }
    });
    watch_for_quit(cancel.clone());

    let run_id = Uuid::new_v4();
    // The camera handle is not guaranteed to be Send, so the whole loop lives on one
    // blocking thread and builds its source there.
    let task = tokio::task::spawn_blocking(move || {
        let span = info_span!("run", id = %run_id);
        let _guard = span.enter();
        dispatch_blocking(&config, args.replay.as_deref(), args.replay_fps, &cancel)
    });

    task.await.context("Dispatch thread panicked")?
}

fn dispatch_blocking(
    config: &Config,
    replay: Option<&Path>,
    replay_fps: u32,
    cancel: &CancelToken,
) -> Result<()> {
    let registry = build_registry(config).context("Failed to bind gestures to actions")?;
    let mut dispatcher = DispatchLoop::new(registry, config.dispatch.trigger);
    if config.output.export_csv {
        dispatcher = dispatcher.with_recorder(SessionRecorder::new(&config.output.directory, None));
    }

    info!(
        "Dispatching with {:?} trigger{}; enter `q` or press Ctrl-C to stop",
        config.dispatch.trigger,
        if config.dispatch.dry_run { " (dry run)" } else { "" }
    );

    let result = match replay {
        Some(path) => {
            let mut source = ReplaySource::open(path)?;
            if replay_fps > 0 {
                source = source.with_frame_interval(Duration::from_secs_f64(1.0 / replay_fps as f64));
            }
            dispatcher.run(source, cancel)
        }
        None => {
            let detector = ProcessDetector::spawn(&config.detector)
                .context("Failed to start the landmark detector")?;
            let source = CameraSource::open(&config.camera, Box::new(detector))
                .context("Failed to open the camera")?;
            dispatcher.run(source, cancel)
        }
    };

    dispatcher.log_summary();

    if let Some(recorder) = dispatcher.recorder() {
        match recorder.export_csv() {
            Ok(path) => info!("Dispatch log written to {}", path.display()),
            Err(e) => warn!("Failed to export dispatch log: {:#}", e),
        }
    }

    let reason = result.context("Perception failed")?;
    info!("Dispatch loop finished: {:?}", reason);
    Ok(())
}

/// Standard bindings wired to the configured effector flavour.
fn build_registry(config: &Config) -> Result<ActionRegistry, RegistryError> {
    let device = AdbDevice::new(&config.device);
    let make = |command: DeviceCommand| -> Box<dyn Effector> {
        if config.dispatch.dry_run {
            Box::new(DryRunEffector::new(command))
        } else {
            Box::new(device.effector(command))
        }
    };

    ActionRegistry::standard(|command| -> Box<dyn Effector> {
        if !config.dispatch.fire_and_forget {
            return make(command);
        }
        match QueuedEffector::spawn(command.as_str(), make(command)) {
            Ok(queued) => Box::new(queued),
            Err(e) => {
                warn!("Could not start worker for {}, running it inline: {}", command.as_str(), e);
                make(command)
            }
        }
    })
}

/// Cancels on a `q` line from stdin. Detached; it dies with the process.
fn watch_for_quit(cancel: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("quit-watch".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                        info!("Quit requested");
                        cancel.cancel();
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });

    if let Err(e) = spawned {
        warn!("Could not watch stdin for quit: {}", e);
    }
}

fn run_probe(config: &Config, send: Option<DeviceCommand>) -> Result<()> {
    match list_cameras() {
        Ok(cameras) => {
            info!("Found {} camera(s)", cameras.len());
            for camera in cameras {
                info!("  {}", camera);
            }
        }
        Err(e) => warn!("Failed to query cameras: {}", e),
    }

    let device = AdbDevice::new(&config.device);
    match device.list_devices() {
        Ok(serials) if serials.is_empty() => warn!("No adb devices attached"),
        Ok(serials) => {
            info!("Found {} adb device(s)", serials.len());
            for serial in serials {
                info!("  {}", serial);
            }
        }
        Err(e) => warn!("Failed to list adb devices: {}", e),
    }

    if let Some(command) = send {
        device
            .run(command)
            .with_context(|| format!("Failed to send {}", command.as_str()))?;
        info!("{}", command.label());
    }

    Ok(())
}

fn run_init(path: Option<&Path>, force: bool) -> Result<()> {
    let path: PathBuf = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path().context("Could not determine a config directory")?,
    };

    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    Config::default()
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote default config to {}", path.display());
    Ok(())
}

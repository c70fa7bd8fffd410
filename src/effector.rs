// src/effector.rs - Device command effectors (adb, dry run, fire-and-forget worker)
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::EffectorFailure;

/// Commands the target device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCommand {
    ZoomIn,
    ZoomOut,
    TakeScreenshot,
    FlashlightOn,
    FlashlightOff,
}

impl DeviceCommand {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ZoomIn => "Zooming In",
            Self::ZoomOut => "Zooming Out",
            Self::TakeScreenshot => "Screenshot Taken",
            Self::FlashlightOn => "Flashlight On",
            Self::FlashlightOff => "Flashlight Off",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZoomIn => "zoom_in",
            Self::ZoomOut => "zoom_out",
            Self::TakeScreenshot => "take_screenshot",
            Self::FlashlightOn => "flashlight_on",
            Self::FlashlightOff => "flashlight_off",
        }
    }

    /// `adb shell` argument lists, run in order.
    pub fn shell_steps(&self) -> Vec<Vec<&'static str>> {
        match self {
            Self::ZoomIn => vec![vec!["input", "keyevent", "KEYCODE_VOLUME_UP"]],
            Self::ZoomOut => vec![vec!["input", "keyevent", "KEYCODE_VOLUME_DOWN"]],
            Self::FlashlightOn => vec![vec!["cmd", "flashlight", "on"]],
            Self::FlashlightOff => vec![vec!["cmd", "flashlight", "off"]],
            // Power + volume down, then a second volume down after a short pause.
            Self::TakeScreenshot => vec![
                vec!["input", "keyevent", "KEYCODE_VOLUME_DOWN", "KEYCODE_POWER"],
                vec!["input", "keyevent", "KEYCODE_VOLUME_DOWN"],
            ],
        }
    }
}

/// A zero-argument side effect the dispatcher can fire.
pub trait Effector: Send {
    fn invoke(&self) -> Result<(), EffectorFailure>;
}

impl<F> Effector for F
where
    F: Fn() -> Result<(), EffectorFailure> + Send,
{
    fn invoke(&self) -> Result<(), EffectorFailure> {
        self()
    }
}

/// Target device reached through the `adb` binary.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb_path: String,
    serial: Option<String>,
    press_delay: Duration,
}

impl AdbDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            adb_path: config.adb_path.clone(),
            serial: config.serial.clone(),
            press_delay: Duration::from_millis(config.screenshot_press_delay_ms),
        }
    }

    /// Full argv after the program name for one shell step.
    pub fn shell_args(&self, step: &[&str]) -> Vec<String> {
        let mut args = Vec::with_capacity(step.len() + 3);
        if let Some(serial) = &self.serial {
            args.push("-s".to_string());
            args.push(serial.clone());
        }
        args.push("shell".to_string());
        args.extend(step.iter().map(|s| s.to_string()));
        args
    }

    pub fn run(&self, command: DeviceCommand) -> Result<(), EffectorFailure> {
        let steps = command.shell_steps();
        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                std::thread::sleep(self.press_delay);
            }
            self.run_step(step)?;
        }
        Ok(())
    }

    fn run_step(&self, step: &[&str]) -> Result<(), EffectorFailure> {
        let args = self.shell_args(step);
        debug!("{} {}", self.adb_path, args.join(" "));

        let output = Command::new(&self.adb_path)
            .args(&args)
            .output()
            .map_err(|source| EffectorFailure::Spawn {
                program: self.adb_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EffectorFailure::ExitStatus {
                command: format!("{} {}", self.adb_path, args.join(" ")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Serials of attached devices in the `device` state.
    pub fn list_devices(&self) -> Result<Vec<String>, EffectorFailure> {
        let output = Command::new(&self.adb_path)
            .arg("devices")
            .output()
            .map_err(|source| EffectorFailure::Spawn {
                program: self.adb_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EffectorFailure::ExitStatus {
                command: format!("{} devices", self.adb_path),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }

    pub fn effector(&self, command: DeviceCommand) -> AdbEffector {
        AdbEffector {
            device: self.clone(),
            command,
        }
    }
}

fn parse_device_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

pub struct AdbEffector {
    device: AdbDevice,
    command: DeviceCommand,
}

impl Effector for AdbEffector {
    fn invoke(&self) -> Result<(), EffectorFailure> {
        self.device.run(self.command)?;
        info!("{}", self.command.label());
        Ok(())
    }
}

/// Logs the command instead of running it.
pub struct DryRunEffector {
    command: DeviceCommand,
}

impl DryRunEffector {
    pub fn new(command: DeviceCommand) -> Self {
        Self { command }
    }
}

impl Effector for DryRunEffector {
    fn invoke(&self) -> Result<(), EffectorFailure> {
        info!("[dry run] {} ({})", self.command.label(), self.command.as_str());
        Ok(())
    }
}

/// Runs the wrapped effector on its own worker thread.
///
/// `invoke` only enqueues, so the caller never waits on the device. At most one
/// invocation runs and one waits; requests arriving while one is already waiting are
/// folded into it. Dropping the effector discards whatever is still waiting.
pub struct QueuedEffector {
    name: String,
    sender: Option<SyncSender<()>>,
    stopped: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl QueuedEffector {
    pub fn spawn(name: impl Into<String>, inner: Box<dyn Effector>) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::sync_channel::<()>(1);
        let stopped = Arc::new(AtomicBool::new(false));
        let worker_stopped = Arc::clone(&stopped);
        let worker_name = name.clone();

        let worker = std::thread::Builder::new()
            .name(format!("effector-{}", name))
            .spawn(move || {
                for () in receiver {
                    if worker_stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = inner.invoke() {
                        warn!("{} failed: {}", worker_name, e);
                    }
                }
                debug!("Effector worker {} stopped", worker_name);
            })?;

        Ok(Self {
            name,
            sender: Some(sender),
            stopped,
            worker: Some(worker),
        })
    }
}

impl Effector for QueuedEffector {
    fn invoke(&self) -> Result<(), EffectorFailure> {
        let Some(sender) = &self.sender else {
            return Err(EffectorFailure::WorkerGone(self.name.clone()));
        };

        match sender.try_send(()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(())) => {
                debug!("{} already pending, request folded", self.name);
                Ok(())
            }
            Err(TrySendError::Disconnected(())) => {
                Err(EffectorFailure::WorkerGone(self.name.clone()))
            }
        }
    }
}

impl Drop for QueuedEffector {
    fn drop(&mut self) {
        // Pending requests are skipped; only an invocation already running is waited for.
        self.stopped.store(true, Ordering::SeqCst);
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Effector worker {} panicked", self.name);
            }
        }
    }
}

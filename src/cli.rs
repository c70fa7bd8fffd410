//! Command-Line Interface

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Config;
use crate::effector::DeviceCommand;
use crate::trigger::TriggerPolicy;

/// Gesture Remote - drive an Android phone with hand gestures in front of a webcam
#[derive(Parser, Debug)]
#[command(name = "gesture_remote")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the camera (or a replay) and fire device actions
    Run(RunArgs),

    /// List cameras and adb devices, optionally sending one command
    Probe {
        /// Command to send to the device
        #[arg(long, value_enum)]
        send: Option<DeviceCommand>,

        /// adb device serial
        #[arg(short, long)]
        serial: Option<String>,
    },

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Camera index
    #[arg(long)]
    pub camera: Option<u32>,

    /// Replay recorded landmarks (JSON lines) instead of using the camera
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,

    /// Pace replayed frames at this rate (0 = as fast as possible)
    #[arg(long, default_value = "0")]
    pub replay_fps: u32,

    /// Log device commands instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Run device commands on background workers
    #[arg(long)]
    pub fire_and_forget: bool,

    /// When a held gesture fires its action
    #[arg(long, value_enum)]
    pub trigger: Option<TriggerMode>,

    /// Window for `--trigger cooldown`
    #[arg(long, default_value = "500")]
    pub cooldown_ms: u64,

    /// Write the per-cycle dispatch log as CSV on exit
    #[arg(long)]
    pub export_csv: bool,

    /// adb device serial
    #[arg(short, long)]
    pub serial: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    EveryCycle,
    OnChange,
    Cooldown,
}

impl TriggerMode {
    pub fn policy(self, cooldown_ms: u64) -> TriggerPolicy {
        match self {
            TriggerMode::EveryCycle => TriggerPolicy::EveryCycle,
            TriggerMode::OnChange => TriggerPolicy::OnChange,
            TriggerMode::Cooldown => TriggerPolicy::Cooldown { cooldown_ms },
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl RunArgs {
    /// Folds the flags that were given into `config`; absent flags keep the file's values.
    pub fn apply(&self, config: &mut Config) {
        if let Some(index) = self.camera {
            config.camera.index = index;
        }
        if let Some(mode) = self.trigger {
            config.dispatch.trigger = mode.policy(self.cooldown_ms);
        }
        if let Some(serial) = &self.serial {
            config.device.serial = Some(serial.clone());
        }
        config.dispatch.dry_run |= self.dry_run;
        config.dispatch.fire_and_forget |= self.fire_and_forget;
        config.output.export_csv |= self.export_csv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["gesture_remote", "run"]).unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert!(args.camera.is_none());
                assert!(args.replay.is_none());
                assert_eq!(args.replay_fps, 0);
                assert!(!args.dry_run);
                assert!(args.trigger.is_none());
                assert_eq!(args.cooldown_ms, 500);
            }
            _ => panic!("Expected Run command"),
        }
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_run_with_all_options() {
        let cli = Cli::try_parse_from([
            "gesture_remote",
            "--verbose",
            "run",
            "--camera", "1",
            "--replay", "session.jsonl",
            "--replay-fps", "30",
            "--dry-run",
            "--fire-and-forget",
            "--trigger", "cooldown",
            "--cooldown-ms", "750",
            "--export-csv",
            "--serial", "emulator-5554",
            "--config", "/tmp/remote.json",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/remote.json")));
        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        assert_eq!(args.camera, Some(1));
        assert_eq!(args.replay, Some(PathBuf::from("session.jsonl")));
        assert_eq!(args.replay_fps, 30);
        assert!(args.dry_run && args.fire_and_forget && args.export_csv);
        assert_eq!(args.trigger, Some(TriggerMode::Cooldown));
        assert_eq!(args.serial.as_deref(), Some("emulator-5554"));
    }

    #[test]
    fn test_trigger_names() {
        let cli = Cli::try_parse_from(["gesture_remote", "run", "--trigger", "on-change"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        assert_eq!(args.trigger, Some(TriggerMode::OnChange));

        assert!(Cli::try_parse_from(["gesture_remote", "run", "--trigger", "sometimes"]).is_err());
    }

    #[test]
    fn test_probe_send() {
        let cli =
            Cli::try_parse_from(["gesture_remote", "probe", "--send", "flashlight-off"]).unwrap();
        match cli.command {
            Commands::Probe { send, serial } => {
                assert_eq!(send, Some(DeviceCommand::FlashlightOff));
                assert!(serial.is_none());
            }
            _ => panic!("Expected Probe command"),
        }
    }

    #[test]
    fn test_init_force() {
        let cli = Cli::try_parse_from(["gesture_remote", "init", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Init { force: true }));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["gesture_remote"]).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        config.dispatch.dry_run = true;

        let args = RunArgs {
            camera: Some(3),
            trigger: Some(TriggerMode::Cooldown),
            cooldown_ms: 250,
            serial: Some("abc123".to_string()),
            export_csv: true,
            ..RunArgs::default()
        };
        args.apply(&mut config);

        assert_eq!(config.camera.index, 3);
        assert_eq!(config.dispatch.trigger, TriggerPolicy::Cooldown { cooldown_ms: 250 });
        assert_eq!(config.device.serial.as_deref(), Some("abc123"));
        assert!(config.output.export_csv);
        // A flag that is off does not clear a value set in the file.
        assert!(config.dispatch.dry_run);
    }

    #[test]
    fn test_apply_without_flags_keeps_config() {
        let mut config = Config::default();
        config.dispatch.trigger = TriggerPolicy::OnChange;
        RunArgs::default().apply(&mut config);
        assert_eq!(config.dispatch.trigger, TriggerPolicy::OnChange);
        assert_eq!(config.camera.index, 0);
    }
}

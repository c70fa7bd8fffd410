// src/mediapipe_bridge.rs - Hand landmark detection through an external MediaPipe helper
//
// Wire format: the helper first prints {"ready":true}, then one exchange per frame:
//   -> {"width":W,"height":H}\n followed by W*H*3 raw RGB bytes
//   <- {"hands":[[[x,y,z], ...21 points], ...]}\n
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DetectorConfig;
use crate::error::PerceptionError;
use crate::landmarks::{LandmarkFrame, HAND_LANDMARK_COUNT};

/// Turns one camera image into at most one hand.
pub trait LandmarkDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<LandmarkFrame>, PerceptionError>;
}

#[derive(Debug, Serialize)]
struct FrameHeader {
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct ReadyLine {
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct DetectorReply {
    #[serde(default)]
    hands: Vec<Vec<[f64; 3]>>,
}

pub fn write_frame<W: Write>(writer: &mut W, image: &RgbImage) -> Result<(), PerceptionError> {
    let header = FrameHeader {
        width: image.width(),
        height: image.height(),
    };
    let header = serde_json::to_string(&header)
        .map_err(|e| PerceptionError::Detector(format!("encode header: {}", e)))?;
    writer.write_all(header.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.write_all(image.as_raw())?;
    writer.flush()?;
    Ok(())
}

/// Waits for the helper's startup line so a broken helper fails at spawn, not mid-run.
pub fn wait_ready<R: BufRead>(reader: &mut R) -> Result<(), PerceptionError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(PerceptionError::Detector(
            "helper exited before it was ready; check detector.command and that mediapipe is installed"
                .to_string(),
        ));
    }

    match serde_json::from_str::<ReadyLine>(line.trim()) {
        Ok(ReadyLine { ready: true }) => Ok(()),
        Ok(ReadyLine { ready: false }) => {
            Err(PerceptionError::Detector("helper reported it is not ready".to_string()))
        }
        Err(_) => Err(PerceptionError::Detector(format!(
            "unexpected helper greeting: {}",
            line.trim()
        ))),
    }
}

/// Reads one reply line. Only the first reported hand is kept.
pub fn read_reply<R: BufRead>(reader: &mut R) -> Result<Option<LandmarkFrame>, PerceptionError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(PerceptionError::Detector("helper closed its output".to_string()));
    }

    let reply: DetectorReply = serde_json::from_str(line.trim())
        .map_err(|e| PerceptionError::Detector(format!("bad reply: {}", e)))?;

    if reply.hands.len() > 1 {
        debug!("{} hands detected, using the first", reply.hands.len());
    }

    Ok(reply.hands.first().map(|hand| {
        if hand.len() != HAND_LANDMARK_COUNT {
            debug!("Hand has {} landmarks, expected {}", hand.len(), HAND_LANDMARK_COUNT);
        }
        LandmarkFrame::from_indexed(hand)
    }))
}

/// MediaPipe Hands running in a child process, fed frames over stdin.
pub struct ProcessDetector {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ProcessDetector {
    pub fn spawn(config: &DetectorConfig) -> Result<Self, PerceptionError> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| PerceptionError::Detector("empty detector command".to_string()))?;

        info!("Starting landmark detector: {}", config.command.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .arg("--min-detection-confidence")
            .arg(config.min_detection_confidence.to_string())
            .arg("--min-tracking-confidence")
            .arg(config.min_tracking_confidence.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PerceptionError::Detector(format!("failed to start `{}`: {}", program, e)))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PerceptionError::Detector("helper pipes unavailable".to_string()));
        };

        let mut detector = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        // On failure `detector` is dropped, which kills and reaps the helper.
        wait_ready(&mut detector.stdout)?;
        info!("Landmark detector ready");
        Ok(detector)
    }
}

impl LandmarkDetector for ProcessDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<LandmarkFrame>, PerceptionError> {
        write_frame(&mut self.stdin, image)?;
        read_reply(&mut self.stdout)
    }
}

impl Drop for ProcessDetector {
    fn drop(&mut self) {
        debug!("Stopping landmark detector");
        if let Err(e) = self.child.kill() {
            debug!("Detector already exited: {}", e);
        }
        if let Err(e) = self.child.wait() {
            warn!("Failed to reap detector process: {}", e);
        }
    }
}

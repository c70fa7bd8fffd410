// src/video.rs - Frame sources: live camera through a landmark detector, or a recorded replay
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbImage;
use nalgebra::Vector3;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::CameraConfig;
use crate::error::PerceptionError;
use crate::landmarks::{Landmark, LandmarkFrame, Observation};
use crate::mediapipe_bridge::LandmarkDetector;

/// Yields one observation per cycle; `Ok(None)` once exhausted.
pub trait FrameSource {
    fn next_observation(&mut self) -> Result<Option<Observation>, PerceptionError>;
}

/// Names of the cameras the platform backend can see.
pub fn list_cameras() -> Result<Vec<String>, PerceptionError> {
    let cameras = nokhwa::query(ApiBackend::Auto)
        .map_err(|e| PerceptionError::Camera(format!("query failed: {}", e)))?;
    Ok(cameras
        .iter()
        .enumerate()
        .map(|(i, camera)| format!("[{}] {}", i, camera.human_name()))
        .collect())
}

pub struct CameraSource {
    camera: Camera,
    detector: Box<dyn LandmarkDetector>,
    mirror: bool,
}

impl CameraSource {
    pub fn open(
        config: &CameraConfig,
        detector: Box<dyn LandmarkDetector>,
    ) -> Result<Self, PerceptionError> {
        debug!("Opening camera index {}", config.index);

        let format = CameraFormat::new(
            Resolution::new(config.width, config.height),
            FrameFormat::MJPEG,
            config.fps,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Exact(format));

        let mut camera = Camera::new(CameraIndex::Index(config.index), requested)
            .map_err(|e| PerceptionError::Camera(format!("failed to open camera {}: {}", config.index, e)))?;
        camera
            .open_stream()
            .map_err(|e| PerceptionError::Camera(format!("failed to open camera stream: {}", e)))?;

        let resolution = camera.resolution();
        info!(
            "Camera {} streaming at {}x{} @ {} fps",
            config.index,
            resolution.width(),
            resolution.height(),
            camera.frame_rate()
        );

        Ok(Self {
            camera,
            detector,
            mirror: config.mirror,
        })
    }

    fn capture(&mut self) -> Result<RgbImage, PerceptionError> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| PerceptionError::Camera(format!("failed to capture frame: {}", e)))?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| PerceptionError::Camera(format!("failed to decode frame: {}", e)))?;

        let (width, height) = (decoded.width(), decoded.height());
        let image = RgbImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| PerceptionError::Camera("failed to create image buffer".to_string()))?;

        if self.mirror {
            Ok(image::imageops::flip_horizontal(&image))
        } else {
            Ok(image)
        }
    }
}

impl FrameSource for CameraSource {
    fn next_observation(&mut self) -> Result<Option<Observation>, PerceptionError> {
        let image = self.capture()?;
        let observation = match self.detector.detect(&image)? {
            Some(frame) => Observation::Hand(frame),
            None => Observation::NoHand,
        };
        Ok(Some(observation))
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            debug!("Failed to stop camera stream: {}", e);
        }
    }
}

/// One line of a replay file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Indexed(Vec<[f64; 3]>),
    Named(HashMap<String, Vec<f64>>),
}

/// Recorded landmarks, one JSON value per line (`null` for no hand).
pub struct ReplaySource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: usize,
    frame_interval: Option<Duration>,
}

impl ReplaySource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PerceptionError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| PerceptionError::Replay {
            path: path.clone(),
            line: 0,
            message: e.to_string(),
        })?;
        info!("Replaying landmarks from {}", path.display());

        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_number: 0,
            frame_interval: None,
        })
    }

    /// Sleeps between frames to mimic a live source.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    fn replay_error(&self, message: impl Into<String>) -> PerceptionError {
        PerceptionError::Replay {
            path: self.path.clone(),
            line: self.line_number,
            message: message.into(),
        }
    }
}

pub fn parse_replay_line(line: &str) -> Result<Observation, String> {
    let value: Option<ReplayLine> = serde_json::from_str(line).map_err(|e| e.to_string())?;

    match value {
        None => Ok(Observation::NoHand),
        Some(ReplayLine::Indexed(points)) => Ok(Observation::Hand(LandmarkFrame::from_indexed(&points))),
        Some(ReplayLine::Named(points)) => {
            let mut frame = Vec::with_capacity(points.len());
            for (name, coords) in points {
                let landmark =
                    Landmark::from_name(&name).ok_or_else(|| format!("unknown landmark `{}`", name))?;
                let point = match coords.as_slice() {
                    [x, y] => Vector3::new(*x, *y, 0.0),
                    [x, y, z] => Vector3::new(*x, *y, *z),
                    _ => {
                        return Err(format!(
                            "landmark `{}` needs 2 or 3 coordinates, got {}",
                            name,
                            coords.len()
                        ))
                    }
                };
                frame.push((landmark, point));
            }
            Ok(Observation::Hand(LandmarkFrame::from_points(frame)))
        }
    }
}

impl FrameSource for ReplaySource {
    fn next_observation(&mut self) -> Result<Option<Observation>, PerceptionError> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            self.line_number += 1;

            let line = line.map_err(|e| self.replay_error(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }

            let observation = parse_replay_line(line.trim()).map_err(|e| self.replay_error(e))?;
            if let Some(interval) = self.frame_interval {
                std::thread::sleep(interval);
            }
            return Ok(Some(observation));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn replay_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_null_is_no_hand() {
        assert_eq!(parse_replay_line("null").unwrap(), Observation::NoHand);
    }

    #[test]
    fn test_parse_named_points() {
        let observation = parse_replay_line(
            r#"{"WRIST":[0.5,0.5],"THUMB_TIP":[0.6,0.6,0.01],"index_finger_tip":[0.45,0.3]}"#,
        )
        .unwrap();
        let frame = observation.hand().unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.get(Landmark::ThumbTip).unwrap().z, 0.01);
        assert_eq!(frame.get(Landmark::IndexFingerTip).unwrap().y, 0.3);
    }

    #[test]
    fn test_parse_indexed_points() {
        let points: Vec<[f64; 3]> = vec![[0.5, 0.5, 0.0]; 21];
        let line = serde_json::to_string(&points).unwrap();
        let observation = parse_replay_line(&line).unwrap();
        assert_eq!(observation.hand().unwrap().len(), 21);
    }

    #[test]
    fn test_parse_rejects_unknown_landmark() {
        let err = parse_replay_line(r#"{"ELBOW":[0.5,0.5]}"#).unwrap_err();
        assert!(err.contains("ELBOW"));
    }

    #[test]
    fn test_parse_rejects_bad_arity() {
        assert!(parse_replay_line(r#"{"WRIST":[0.5]}"#).is_err());
        assert!(parse_replay_line("not json").is_err());
    }

    #[test]
    fn test_replay_source_sequence() {
        let file = replay_file(
            "{\"WRIST\":[0.5,0.5]}\n\nnull\n{\"WRIST\":[0.5,0.4]}\n",
        );
        let mut source = ReplaySource::open(file.path()).unwrap();

        assert!(matches!(source.next_observation().unwrap(), Some(Observation::Hand(_))));
        assert_eq!(source.next_observation().unwrap(), Some(Observation::NoHand));
        assert!(matches!(source.next_observation().unwrap(), Some(Observation::Hand(_))));
        assert_eq!(source.next_observation().unwrap(), None);
        assert_eq!(source.next_observation().unwrap(), None);
    }

    #[test]
    fn test_replay_error_names_line() {
        let file = replay_file("null\n{broken\n");
        let mut source = ReplaySource::open(file.path()).unwrap();

        assert_eq!(source.next_observation().unwrap(), Some(Observation::NoHand));
        match source.next_observation() {
            Err(PerceptionError::Replay { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected replay error, got {:?}", other),
        }
    }

    #[test]
    fn test_replay_missing_file() {
        let result = ReplaySource::open("/tmp/gesture_remote_missing_replay_4242.jsonl");
        assert!(matches!(result, Err(PerceptionError::Replay { .. })));
    }
}

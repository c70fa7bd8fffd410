// src/data.rs - Per-cycle dispatch log and CSV export
use anyhow::{Context, Result};
use chrono::Local;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::gesture::Gesture;

/// What the dispatcher did with one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// No gesture this cycle.
    Idle,
    Fired,
    Failed,
    /// Gesture held back by the trigger policy.
    Suppressed,
    Unregistered,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub cycle: u64,
    pub elapsed_secs: f64,
    pub hand_present: bool,
    pub gesture: Gesture,
    pub action: Option<String>,
    pub outcome: Outcome,
}

pub struct SessionRecorder {
    output_dir: PathBuf,
    session_name: String,
    records: Vec<DispatchRecord>,
}

impl SessionRecorder {
    pub fn new(output_dir: impl AsRef<Path>, session_name: Option<String>) -> Self {
        let session_name = session_name.unwrap_or_else(|| {
            format!("session_{}", Local::now().format("%Y%m%d_%H%M%S"))
        });

        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            session_name,
            records: Vec::new(),
        }
    }

    pub fn add(&mut self, record: DispatchRecord) {
        self.records.push(record);
    }

    #[cfg(test)]
    pub fn records(&self) -> &[DispatchRecord] {
        &self.records
    }

    pub fn export_csv(&self) -> Result<PathBuf> {
        let csv_path = self
            .output_dir
            .join(&self.session_name)
            .join("dispatch_log.csv");

        if let Some(parent) = csv_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = File::create(&csv_path)
            .with_context(|| format!("Failed to create {}", csv_path.display()))?;
        let mut writer = Writer::from_writer(file);

        for record in &self.records {
            writer.serialize(record)?;
        }

        writer.flush()?;
        Ok(csv_path)
    }
}

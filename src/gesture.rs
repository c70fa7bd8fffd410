// src/gesture.rs - Single-frame gesture classification
use serde::Serialize;
use tracing::debug;

use crate::landmarks::{Landmark, LandmarkFrame};

/// Maximum index/middle fingertip height difference for the screenshot pose.
pub const SCREENSHOT_TOLERANCE: f64 = 0.05;

/// Landmarks the decision policy reads.
pub const REQUIRED_LANDMARKS: [Landmark; 4] = [
    Landmark::Wrist,
    Landmark::ThumbTip,
    Landmark::IndexFingerTip,
    Landmark::MiddleFingerTip,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Fist,
    Palm,
    Screenshot,
    Flash,
    None,
}

impl Gesture {
    /// Gestures that can be bound to an action.
    pub const ACTIONABLE: [Gesture; 4] = [
        Gesture::Fist,
        Gesture::Palm,
        Gesture::Screenshot,
        Gesture::Flash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fist => "fist",
            Self::Palm => "palm",
            Self::Screenshot => "screenshot",
            Self::Flash => "flash",
            Self::None => "none",
        }
    }

    pub fn is_none(&self) -> bool {
        *self == Gesture::None
    }
}

impl std::fmt::Display for Gesture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies one observation. `None` means no hand was detected this frame.
///
/// Rules are checked in order and the first match wins; the postures overlap in
/// coordinate space so the order is part of the behaviour. Image y grows downward,
/// so "above the wrist" means a smaller y.
pub fn classify(frame: Option<&LandmarkFrame>) -> Gesture {
    let Some(frame) = frame else {
        return Gesture::None;
    };

    let (Some(wrist), Some(thumb_tip), Some(index_tip), Some(middle_tip)) = (
        frame.get(Landmark::Wrist),
        frame.get(Landmark::ThumbTip),
        frame.get(Landmark::IndexFingerTip),
        frame.get(Landmark::MiddleFingerTip),
    ) else {
        debug!(
            "Malformed frame: {} of {} required landmarks present",
            REQUIRED_LANDMARKS.iter().filter(|lm| frame.contains(**lm)).count(),
            REQUIRED_LANDMARKS.len()
        );
        return Gesture::None;
    };

    let wrist = wrist.y;
    let thumb_tip = thumb_tip.y;
    let index_tip = index_tip.y;
    let middle_tip = middle_tip.y;

    if index_tip < wrist {
        return Gesture::Fist;
    }

    if index_tip > wrist && thumb_tip < wrist {
        return Gesture::Palm;
    }

    if (index_tip - middle_tip).abs() < SCREENSHOT_TOLERANCE {
        return Gesture::Screenshot;
    }

    if thumb_tip < wrist {
        return Gesture::Flash;
    }

    Gesture::None
}

#[cfg(test)]
pub(crate) fn hand(wrist: f64, index_tip: f64, thumb_tip: f64, middle_tip: f64) -> LandmarkFrame {
    use nalgebra::Vector3;

    LandmarkFrame::from_points([
        (Landmark::Wrist, Vector3::new(0.5, wrist, 0.0)),
        (Landmark::IndexFingerTip, Vector3::new(0.45, index_tip, 0.0)),
        (Landmark::ThumbTip, Vector3::new(0.6, thumb_tip, 0.0)),
        (Landmark::MiddleFingerTip, Vector3::new(0.5, middle_tip, 0.0)),
    ])
}

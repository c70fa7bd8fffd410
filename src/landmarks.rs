// src/landmarks.rs - Hand landmark names and per-frame landmark sets
use nalgebra::Vector3;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Number of points in the MediaPipe hand topology.
pub const HAND_LANDMARK_COUNT: usize = 21;

/// Named hand points, in MediaPipe index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Landmark {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

impl Landmark {
    pub const ALL: [Landmark; HAND_LANDMARK_COUNT] = [
        Landmark::Wrist,
        Landmark::ThumbCmc,
        Landmark::ThumbMcp,
        Landmark::ThumbIp,
        Landmark::ThumbTip,
        Landmark::IndexFingerMcp,
        Landmark::IndexFingerPip,
        Landmark::IndexFingerDip,
        Landmark::IndexFingerTip,
        Landmark::MiddleFingerMcp,
        Landmark::MiddleFingerPip,
        Landmark::MiddleFingerDip,
        Landmark::MiddleFingerTip,
        Landmark::RingFingerMcp,
        Landmark::RingFingerPip,
        Landmark::RingFingerDip,
        Landmark::RingFingerTip,
        Landmark::PinkyMcp,
        Landmark::PinkyPip,
        Landmark::PinkyDip,
        Landmark::PinkyTip,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Upper-case name as emitted by MediaPipe (`INDEX_FINGER_TIP`).
    pub fn name(self) -> &'static str {
        match self {
            Landmark::Wrist => "WRIST",
            Landmark::ThumbCmc => "THUMB_CMC",
            Landmark::ThumbMcp => "THUMB_MCP",
            Landmark::ThumbIp => "THUMB_IP",
            Landmark::ThumbTip => "THUMB_TIP",
            Landmark::IndexFingerMcp => "INDEX_FINGER_MCP",
            Landmark::IndexFingerPip => "INDEX_FINGER_PIP",
            Landmark::IndexFingerDip => "INDEX_FINGER_DIP",
            Landmark::IndexFingerTip => "INDEX_FINGER_TIP",
            Landmark::MiddleFingerMcp => "MIDDLE_FINGER_MCP",
            Landmark::MiddleFingerPip => "MIDDLE_FINGER_PIP",
            Landmark::MiddleFingerDip => "MIDDLE_FINGER_DIP",
            Landmark::MiddleFingerTip => "MIDDLE_FINGER_TIP",
            Landmark::RingFingerMcp => "RING_FINGER_MCP",
            Landmark::RingFingerPip => "RING_FINGER_PIP",
            Landmark::RingFingerDip => "RING_FINGER_DIP",
            Landmark::RingFingerTip => "RING_FINGER_TIP",
            Landmark::PinkyMcp => "PINKY_MCP",
            Landmark::PinkyPip => "PINKY_PIP",
            Landmark::PinkyDip => "PINKY_DIP",
            Landmark::PinkyTip => "PINKY_TIP",
        }
    }

    /// Case-insensitive lookup by MediaPipe name.
    pub fn from_name(name: &str) -> Option<Self> {
        static BY_NAME: Lazy<HashMap<&'static str, Landmark>> =
            Lazy::new(|| Landmark::ALL.iter().map(|lm| (lm.name(), *lm)).collect());

        BY_NAME.get(name.to_ascii_uppercase().as_str()).copied()
    }
}

/// One detected hand in one frame. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkFrame {
    points: HashMap<Landmark, Vector3<f64>>,
}

impl LandmarkFrame {
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (Landmark, Vector3<f64>)>,
    {
        Self {
            points: points.into_iter().collect(),
        }
    }

    /// Builds a frame from detector output in MediaPipe index order.
    /// Extra entries past the hand topology are ignored; short input leaves the
    /// trailing landmarks absent.
    pub fn from_indexed(landmarks: &[[f64; 3]]) -> Self {
        Self::from_points(
            landmarks
                .iter()
                .take(HAND_LANDMARK_COUNT)
                .enumerate()
                .filter_map(|(i, lm)| {
                    Landmark::from_index(i).map(|name| (name, Vector3::new(lm[0], lm[1], lm[2])))
                }),
        )
    }

    pub fn get(&self, landmark: Landmark) -> Option<&Vector3<f64>> {
        self.points.get(&landmark)
    }

    pub fn contains(&self, landmark: Landmark) -> bool {
        self.points.contains_key(&landmark)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// What the perception side saw in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Hand(LandmarkFrame),
    NoHand,
}

impl Observation {
    pub fn hand(&self) -> Option<&LandmarkFrame> {
        match self {
            Observation::Hand(frame) => Some(frame),
            Observation::NoHand => None,
        }
    }
}

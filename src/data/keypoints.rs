//! OpenPose keypoint records and coordinate-stream extraction.
//!
//! A record is a list of frames; each frame lists the detected people and each
//! person carries four flat `[x, y, confidence, x, y, confidence, ...]` arrays:
//!
//! ```text
//! pose_keypoints_2d        75  = 25 joints × 3
//! hand_left_keypoints_2d   63  = 21 joints × 3
//! hand_right_keypoints_2d  63  = 21 joints × 3
//! face_keypoints_2d       210  = 70 joints × 3
//! ```
//!
//! Extraction keeps only x/y, producing three streams per frame:
//! body `[50]`, hands `[84]` (left then right) and face `[140]`.
//!
//! Parsing and extraction degrade to zeros on anything malformed: missing keys,
//! wrong types, short or long arrays, empty `people`. Only unreadable files and
//! invalid JSON syntax are errors.

use std::path::Path;

use candle_core::{Device, Tensor};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::config::{BODY_DIM, BODY_JOINTS, FACE_DIM, FACE_JOINTS, HAND_JOINTS, HANDS_DIM};

/// One keypoint recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeypointRecord {
    #[serde(default, deserialize_with = "lenient_seq")]
    pub frames: Vec<KeypointFrame>,
}

/// One video frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeypointFrame {
    #[serde(default, deserialize_with = "lenient_seq")]
    pub people: Vec<PersonKeypoints>,
}

/// Raw keypoint arrays of one detected person. Absent arrays are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonKeypoints {
    #[serde(default, deserialize_with = "lenient_numbers")]
    pub pose_keypoints_2d: Option<Vec<f32>>,
    #[serde(default, deserialize_with = "lenient_numbers")]
    pub hand_left_keypoints_2d: Option<Vec<f32>>,
    #[serde(default, deserialize_with = "lenient_numbers")]
    pub hand_right_keypoints_2d: Option<Vec<f32>>,
    #[serde(default, deserialize_with = "lenient_numbers")]
    pub face_keypoints_2d: Option<Vec<f32>>,
}

impl KeypointRecord {
    /// Parse a record from JSON text.
    ///
    /// A syntactically valid document that is not a record object yields an
    /// empty record.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_json_value(value))
    }

    pub fn from_json_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }
}

/// Read a keypoint record from disk.
pub fn load_keypoint_record(path: impl AsRef<Path>) -> Result<KeypointRecord> {
    let text = std::fs::read_to_string(path)?;
    KeypointRecord::from_json_str(&text)
}

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

/// Any non-array becomes empty; elements that fail to parse become `T::default()`.
fn lenient_seq<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    })
}

/// Any non-array becomes `None`; non-numeric elements read as 0.
fn lenient_numbers<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        ),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Per-frame coordinate streams, row-major `[num_frames, dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeypointStreams {
    pub num_frames: usize,
    /// `[F, 50]`
    pub body: Vec<f32>,
    /// `[F, 84]`
    pub hands: Vec<f32>,
    /// `[F, 140]`
    pub face: Vec<f32>,
}

impl KeypointStreams {
    /// Convert to `f32` tensors `([F, 50], [F, 84], [F, 140])`.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
        let f = self.num_frames;
        let body = Tensor::from_slice(&self.body, (f, BODY_DIM), device)?;
        let hands = Tensor::from_slice(&self.hands, (f, HANDS_DIM), device)?;
        let face = Tensor::from_slice(&self.face, (f, FACE_DIM), device)?;
        Ok((body, hands, face))
    }
}

/// Keep `[x, y]` of every `[x, y, confidence]` triplet, sized to exactly `joints * 2`.
///
/// Longer input is truncated, shorter input is right-padded with zeros.
pub fn xy_channels(raw: &[f32], joints: usize) -> Vec<f32> {
    let width = joints * 2;
    let mut xy: Vec<f32> = raw
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 3 != 2)
        .map(|(_, &v)| v)
        .take(width)
        .collect();
    xy.resize(width, 0.0);
    xy
}

fn xy_or_zeros(raw: Option<&Vec<f32>>, joints: usize) -> Vec<f32> {
    match raw {
        Some(values) => xy_channels(values, joints),
        None => vec![0.0; joints * 2],
    }
}

/// Extract body/hands/face coordinate streams from a record.
///
/// Only the first person of each frame is used; frames without people are all
/// zeros in every stream.
pub fn extract_keypoints(record: &KeypointRecord) -> KeypointStreams {
    let num_frames = record.frames.len();
    let mut body = Vec::with_capacity(num_frames * BODY_DIM);
    let mut hands = Vec::with_capacity(num_frames * HANDS_DIM);
    let mut face = Vec::with_capacity(num_frames * FACE_DIM);

    for frame in &record.frames {
        match frame.people.first() {
            Some(person) => {
                body.extend(xy_or_zeros(person.pose_keypoints_2d.as_ref(), BODY_JOINTS));
                hands.extend(xy_or_zeros(
                    person.hand_left_keypoints_2d.as_ref(),
                    HAND_JOINTS,
                ));
                hands.extend(xy_or_zeros(
                    person.hand_right_keypoints_2d.as_ref(),
                    HAND_JOINTS,
                ));
                face.extend(xy_or_zeros(person.face_keypoints_2d.as_ref(), FACE_JOINTS));
            }
            None => {
                body.resize(body.len() + BODY_DIM, 0.0);
                hands.resize(hands.len() + HANDS_DIM, 0.0);
                face.resize(face.len() + FACE_DIM, 0.0);
            }
        }
    }

    KeypointStreams {
        num_frames,
        body,
        hands,
        face,
    }
}

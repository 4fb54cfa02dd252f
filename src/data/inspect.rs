//! Quick structural summaries of raw inputs, logged before preprocessing.

use std::collections::HashSet;

use super::keypoints::KeypointRecord;
use super::vocab::words;

/// Shape of a keypoint record as seen in its first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub num_frames: usize,
    /// `(array name, length)` for each array present on the first person of frame 0.
    pub first_person_arrays: Vec<(&'static str, usize)>,
}

pub fn summarize_record(record: &KeypointRecord) -> RecordSummary {
    let first_person_arrays = record
        .frames
        .first()
        .and_then(|frame| frame.people.first())
        .map(|person| {
            [
                ("pose_keypoints_2d", &person.pose_keypoints_2d),
                ("hand_left_keypoints_2d", &person.hand_left_keypoints_2d),
                ("hand_right_keypoints_2d", &person.hand_right_keypoints_2d),
                ("face_keypoints_2d", &person.face_keypoints_2d),
            ]
            .into_iter()
            .filter_map(|(name, values)| values.as_ref().map(|v| (name, v.len())))
            .collect()
        })
        .unwrap_or_default();

    let summary = RecordSummary {
        num_frames: record.num_frames(),
        first_person_arrays,
    };
    tracing::info!(
        frames = summary.num_frames,
        arrays = ?summary.first_person_arrays,
        "keypoint record"
    );
    summary
}

/// Sentence count and distinct-word count of a translation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub sentences: usize,
    pub distinct_words: usize,
}

/// Summarize table rows (header already removed); the translation is the last column.
pub fn summarize_translations<R: AsRef<[String]>>(rows: &[R]) -> TableSummary {
    let mut distinct = HashSet::new();
    for row in rows {
        if let Some(text) = row.as_ref().last() {
            distinct.extend(words(text));
        }
    }
    let summary = TableSummary {
        sentences: rows.len(),
        distinct_words: distinct.len(),
    };
    tracing::info!(
        sentences = summary.sentences,
        distinct_words = summary.distinct_words,
        "translation table"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_summary() {
        let record = KeypointRecord::from_json_value(json!({
            "frames": [
                {"people": [{"pose_keypoints_2d": vec![0.0; 75], "face_keypoints_2d": vec![0.0; 210]}]},
                {"people": []}
            ]
        }));
        let summary = summarize_record(&record);
        assert_eq!(summary.num_frames, 2);
        assert_eq!(
            summary.first_person_arrays,
            vec![("pose_keypoints_2d", 75), ("face_keypoints_2d", 210)]
        );
        assert!(summarize_record(&KeypointRecord::default()).first_person_arrays.is_empty());
    }

    #[test]
    fn test_table_summary() {
        let rows = vec![
            vec!["a".to_string(), "Hello you".to_string()],
            vec!["b".to_string(), "hello THERE".to_string()],
        ];
        assert_eq!(
            summarize_translations(&rows),
            TableSummary {
                sentences: 2,
                distinct_words: 3
            }
        );
    }
}

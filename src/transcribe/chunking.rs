//! Chunk planning and reconciliation of per-chunk transcripts.
//!
//! Chunk *i* starts at the sum of the actual durations of chunks `0..i`.
//! Cutting rarely lands exactly on the planned boundary, so using the
//! planned offsets would let drift accumulate chunk after chunk. Words cut in
//! half at a boundary can be lost or duplicated; that is accepted.

use crate::models::{ChunkSpan, Segment, Transcript, WordTimestamp};
use crate::{PipelineError, Result};

use super::BackendTranscript;

/// Remainders shorter than this fold into the previous chunk
const EPSILON: f64 = 1e-6;

/// Contiguous, non-overlapping windows covering a media file
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub spans: Vec<ChunkSpan>,
    pub total_duration: f64,
}

impl ChunkPlan {
    /// Windows of `chunk_seconds`, the last one possibly shorter
    pub fn fixed(duration: f64, chunk_seconds: f64) -> Result<Self> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(PipelineError::Validation(format!(
                "cannot chunk media of duration {}",
                duration
            )));
        }
        if !chunk_seconds.is_finite() || chunk_seconds <= 0.0 {
            return Err(PipelineError::Validation(format!(
                "chunk length must be positive, got {}",
                chunk_seconds
            )));
        }

        let mut spans = Vec::new();
        let mut start = 0.0;
        while duration - start > EPSILON {
            let end = (start + chunk_seconds).min(duration);
            spans.push(ChunkSpan {
                index: spans.len(),
                start_offset: start,
                end_offset: end,
            });
            start = end;
        }

        Ok(Self {
            spans,
            total_duration: duration,
        })
    }

    /// The whole file as one chunk; used for single-shot results
    pub fn single(duration: f64) -> Self {
        Self {
            spans: vec![ChunkSpan {
                index: 0,
                start_offset: 0.0,
                end_offset: duration.max(0.0),
            }],
            total_duration: duration.max(0.0),
        }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// A backend's answer for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult {
    pub index: usize,
    /// Measured length of the cut audio, if known
    pub actual_duration: Option<f64>,
    pub transcript: BackendTranscript,
}

/// Merge per-chunk transcripts onto one timeline.
///
/// Results may arrive in any order; they are placed by chunk index. The
/// output is a pure function of the inputs.
pub fn reconcile(plan: &ChunkPlan, mut results: Vec<ChunkResult>, service: &str) -> Result<Transcript> {
    if results.len() != plan.len() {
        return Err(PipelineError::Corruption(format!(
            "expected {} chunk results, got {}",
            plan.len(),
            results.len()
        )));
    }

    results.sort_by_key(|r| r.index);
    for (expected, result) in results.iter().enumerate() {
        if result.index != expected {
            return Err(PipelineError::Corruption(format!(
                "chunk results do not cover the plan: expected index {}, found {}",
                expected, result.index
            )));
        }
    }

    let mut segments: Vec<Segment> = Vec::new();
    let mut words: Vec<WordTimestamp> = Vec::new();
    let mut texts: Vec<&str> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();
    let mut offset = 0.0;

    for (span, result) in plan.spans.iter().zip(&results) {
        let chunk = &result.transcript;

        let mut chunk_segments: Vec<&Segment> = chunk.segments.iter().collect();
        chunk_segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        for segment in chunk_segments {
            let text = segment.text.trim();
            if text.is_empty() {
                continue;
            }
            let mut start = segment.start + offset;
            let mut end = segment.end + offset;
            if let Some(previous) = segments.last() {
                start = start.max(previous.end);
            }
            end = end.max(start);
            segments.push(Segment {
                id: segments.len(),
                start,
                end,
                text: text.to_string(),
            });
        }

        let mut chunk_words: Vec<&WordTimestamp> = chunk.words.iter().collect();
        chunk_words.sort_by(|a, b| a.start.total_cmp(&b.start));
        words.extend(chunk_words.into_iter().map(|word| WordTimestamp {
            word: word.word.clone(),
            start: word.start + offset,
            end: word.end + offset,
            confidence: word.confidence,
        }));

        let text = chunk.text.trim();
        if !text.is_empty() {
            texts.push(text);
        }
        if let Some(confidence) = chunk.confidence {
            confidences.push(confidence);
        }

        offset += result
            .actual_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or_else(|| span.duration());
    }

    let confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    Ok(Transcript {
        text: texts.join(" "),
        segments,
        words,
        confidence,
        duration_seconds: offset,
        service: service.to_string(),
        chunk_count: plan.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64, text: &str) -> Segment {
        Segment {
            id: 0,
            start,
            end,
            text: text.to_string(),
        }
    }

    fn chunk(index: usize, actual: Option<f64>, text: &str, segments: Vec<Segment>) -> ChunkResult {
        ChunkResult {
            index,
            actual_duration: actual,
            transcript: BackendTranscript {
                text: text.to_string(),
                segments,
                words: Vec::new(),
                confidence: None,
                duration: actual,
            },
        }
    }

    #[test]
    fn test_fixed_plan_has_short_final_chunk() {
        let plan = ChunkPlan::fixed(1500.0, 600.0).unwrap();
        let bounds: Vec<_> = plan.spans.iter().map(|s| (s.start_offset, s.end_offset)).collect();
        assert_eq!(bounds, vec![(0.0, 600.0), (600.0, 1200.0), (1200.0, 1500.0)]);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let plan = ChunkPlan::fixed(1200.0, 600.0).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.spans[1].end_offset, 1200.0);
    }

    #[test]
    fn test_short_media_is_one_chunk() {
        let plan = ChunkPlan::fixed(42.5, 600.0).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.spans[0].duration(), 42.5);
    }

    #[test]
    fn test_invalid_durations_are_rejected() {
        assert!(matches!(ChunkPlan::fixed(0.0, 600.0), Err(PipelineError::Validation(_))));
        assert!(matches!(ChunkPlan::fixed(-3.0, 600.0), Err(PipelineError::Validation(_))));
        assert!(matches!(ChunkPlan::fixed(100.0, 0.0), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_offsets_use_actual_durations() {
        let plan = ChunkPlan::fixed(1500.0, 600.0).unwrap();
        let results = vec![
            chunk(0, Some(598.5), "first", vec![segment(0.0, 4.0, "first")]),
            chunk(1, Some(601.0), "second", vec![segment(10.0, 12.0, "second")]),
            chunk(2, Some(300.5), "third", vec![segment(10.0, 11.0, "third")]),
        ];

        let transcript = reconcile(&plan, results, "whisper").unwrap();

        let starts: Vec<_> = transcript.segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0.0, 608.5, 1209.5]);
        assert_eq!(transcript.duration_seconds, 1500.0);
        assert_eq!(transcript.text, "first second third");
        assert_eq!(transcript.chunk_count, 3);
        assert_eq!(transcript.service, "whisper");
    }

    #[test]
    fn test_missing_actual_duration_falls_back_to_plan() {
        let plan = ChunkPlan::fixed(1200.0, 600.0).unwrap();
        let results = vec![
            chunk(0, None, "a", vec![segment(1.0, 2.0, "a")]),
            chunk(1, None, "b", vec![segment(1.0, 2.0, "b")]),
        ];
        let transcript = reconcile(&plan, results, "aws_transcribe").unwrap();
        assert_eq!(transcript.segments[1].start, 601.0);
    }

    #[test]
    fn test_completion_order_does_not_matter() {
        let plan = ChunkPlan::fixed(1500.0, 600.0).unwrap();
        let in_order = vec![
            chunk(0, Some(600.0), "one", vec![segment(0.0, 3.0, "one")]),
            chunk(1, Some(600.0), "two", vec![segment(0.0, 3.0, "two")]),
            chunk(2, Some(300.0), "three", vec![segment(0.0, 3.0, "three")]),
        ];
        let mut shuffled = in_order.clone();
        shuffled.swap(0, 2);

        assert_eq!(
            reconcile(&plan, in_order, "whisper").unwrap(),
            reconcile(&plan, shuffled, "whisper").unwrap()
        );
    }

    #[test]
    fn test_ids_are_sequential_and_overlaps_clamped() {
        let plan = ChunkPlan::fixed(20.0, 10.0).unwrap();
        let results = vec![
            chunk(0, Some(10.0), "a b", vec![segment(0.0, 5.0, "a"), segment(4.0, 10.5, "b")]),
            chunk(1, Some(10.0), "c", vec![segment(0.0, 2.0, "c")]),
        ];
        let transcript = reconcile(&plan, results, "whisper").unwrap();

        let ids: Vec<_> = transcript.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        for pair in transcript.segments.windows(2) {
            assert!(pair[1].start >= pair[0].end);
        }
        assert_eq!(transcript.segments[1].start, 5.0);
        assert_eq!(transcript.segments[2].start, 10.5);
    }

    #[test]
    fn test_count_mismatch_is_corruption() {
        let plan = ChunkPlan::fixed(1500.0, 600.0).unwrap();
        let results = vec![chunk(0, Some(600.0), "a", vec![]), chunk(1, Some(600.0), "b", vec![])];
        assert!(matches!(reconcile(&plan, results, "whisper"), Err(PipelineError::Corruption(_))));
    }

    #[test]
    fn test_duplicate_index_is_corruption() {
        let plan = ChunkPlan::fixed(1200.0, 600.0).unwrap();
        let results = vec![chunk(0, Some(600.0), "a", vec![]), chunk(0, Some(600.0), "b", vec![])];
        assert!(matches!(reconcile(&plan, results, "whisper"), Err(PipelineError::Corruption(_))));
    }
}

//! Greedy, confidence-ordered non-maximum suppression.

use super::result::{Detection, RawCandidate};
use crate::geometry::iou;

/// Filter overlapping candidates, keeping the most confident of each cluster.
///
/// Candidates are stably sorted by confidence (descending), so equal scores
/// keep their input order. A later candidate is dropped only when its IoU with
/// an accepted one is strictly greater than `iou_threshold`. The output is in
/// acceptance order.
pub fn suppress_candidates(mut candidates: Vec<RawCandidate>, iou_threshold: f32) -> Vec<RawCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    // Vec::sort_by is stable.
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; candidates.len()];
    let mut accepted = Vec::with_capacity(candidates.len());

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..candidates.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&candidates[i].bbox, &candidates[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
        accepted.push(i);
    }

    let mut slots: Vec<Option<RawCandidate>> = candidates.into_iter().map(Some).collect();
    accepted
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

/// Suppress and promote survivors to `Detection`s (no crops attached).
pub fn suppress(candidates: Vec<RawCandidate>, iou_threshold: f32) -> Vec<Detection> {
    suppress_candidates(candidates, iou_threshold)
        .into_iter()
        .map(|candidate| Detection::new(candidate, None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormalizedRect;

    fn cand(label: &str, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> RawCandidate {
        RawCandidate::new(label, confidence, NormalizedRect::new(x, y, w, h))
    }

    fn labels(out: &[RawCandidate]) -> Vec<&str> {
        out.iter().map(|c| c.label.as_str()).collect()
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(suppress_candidates(Vec::new(), 0.5).is_empty());
        assert!(suppress(Vec::new(), 0.5).is_empty());
    }

    #[test]
    fn overlapping_pair_keeps_the_stronger_box() {
        let input = vec![
            cand("a", 0.9, 0.0, 0.0, 0.5, 0.5),
            cand("b", 0.8, 0.05, 0.05, 0.5, 0.5),
        ];
        let out = suppress_candidates(input, 0.5);
        assert_eq!(labels(&out), vec!["a"]);
    }

    #[test]
    fn high_threshold_keeps_both() {
        let input = vec![
            cand("a", 0.9, 0.0, 0.0, 0.5, 0.5),
            cand("b", 0.8, 0.05, 0.05, 0.5, 0.5),
        ];
        let out = suppress_candidates(input, 0.95);
        assert_eq!(labels(&out), vec!["a", "b"]);
    }

    #[test]
    fn output_is_confidence_descending() {
        let input = vec![
            cand("low", 0.2, 0.0, 0.0, 0.1, 0.1),
            cand("high", 0.9, 0.5, 0.5, 0.1, 0.1),
            cand("mid", 0.6, 0.2, 0.8, 0.1, 0.1),
        ];
        let out = suppress_candidates(input, 0.5);
        assert_eq!(labels(&out), vec!["high", "mid", "low"]);
    }

    #[test]
    fn iou_equal_to_threshold_is_kept() {
        // Threshold set to the pair's own IoU.
        let a = cand("a", 0.9, 0.0, 0.0, 0.5, 0.5);
        let b = cand("b", 0.8, 0.25, 0.0, 0.5, 0.5);
        let threshold = iou(&a.bbox, &b.bbox);
        let out = suppress_candidates(vec![a, b], threshold);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn ties_preserve_input_order() {
        let input = vec![
            cand("first", 0.7, 0.0, 0.0, 0.4, 0.4),
            cand("second", 0.7, 0.0, 0.0, 0.4, 0.4),
            cand("third", 0.7, 0.6, 0.6, 0.2, 0.2),
        ];
        let out = suppress_candidates(input, 0.5);
        assert_eq!(labels(&out), vec!["first", "third"]);
    }

    #[test]
    fn suppressed_candidates_do_not_suppress_others() {
        // b overlaps a and c; a suppresses b, so c must survive even though b would kill it.
        let input = vec![
            cand("a", 0.9, 0.0, 0.0, 0.4, 0.4),
            cand("b", 0.8, 0.1, 0.0, 0.4, 0.4),
            cand("c", 0.7, 0.2, 0.0, 0.4, 0.4),
        ];
        let out = suppress_candidates(input, 0.5);
        assert_eq!(labels(&out), vec!["a", "c"]);
    }

    #[test]
    fn zero_area_candidates_are_never_suppressed() {
        let input = vec![
            cand("a", 0.9, 0.2, 0.2, 0.0, 0.0),
            cand("b", 0.8, 0.2, 0.2, 0.0, 0.0),
        ];
        assert_eq!(suppress_candidates(input, 0.0).len(), 2);
    }

    #[test]
    fn suppress_assigns_fresh_ids() {
        let input = vec![
            cand("a", 0.9, 0.0, 0.0, 0.1, 0.1),
            cand("b", 0.8, 0.5, 0.5, 0.1, 0.1),
        ];
        let out = suppress(input, 0.5);
        assert_eq!(out.len(), 2);
        assert_ne!(out[0].id(), out[1].id());
        assert!(out.iter().all(|d| d.crop().is_none()));
    }
}

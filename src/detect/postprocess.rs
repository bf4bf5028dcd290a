use std::cmp::Ordering;

use crate::config::DetectorConfig;

use super::result::{Instance, Predictions, Proposal};

/// Turn backend proposals into final predictions for a `width x height` frame.
///
/// Order of operations: class selection + score threshold, clip to frame,
/// per-class NMS, sort by descending score, cap at `max_detections`.
pub fn postprocess(
    proposals: Vec<Proposal>,
    cfg: &DetectorConfig,
    width: u32,
    height: u32,
) -> Predictions {
    let mut candidates: Vec<Instance> = Vec::new();
    for proposal in proposals {
        let bbox = proposal.bbox.clip(width, height);
        let passing = proposal
            .class_scores
            .into_iter()
            .filter(|(_, score)| score.is_finite() && *score >= cfg.score_threshold);
        if cfg.one_class_per_proposal {
            if let Some((class_id, score)) = passing.max_by(|a, b| cmp_score(a.1, b.1)) {
                candidates.push(Instance {
                    bbox,
                    score,
                    class_id,
                });
            }
        } else {
            candidates.extend(passing.map(|(class_id, score)| Instance {
                bbox,
                score,
                class_id,
            }));
        }
    }

    candidates.sort_by(|a, b| cmp_score(b.score, a.score));

    let mut kept: Vec<Instance> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.len() >= cfg.max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > cfg.nms_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    Predictions {
        instances: kept,
        image_width: width,
        image_height: height,
    }
}

fn cmp_score(a: f32, b: f32) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

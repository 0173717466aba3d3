//! Confidence scores for the documents behind an answer.
//!
//! Reranked documents are scored by their rerank score. Documents that only
//! have a retrieval distance are scored by inverting the distance against a
//! scale: either the fixed range of the metric (cosine distance tops out at
//! 2.0) or, with [`DistanceScale::Batch`], the largest distance in the batch.
//! Every score is clamped into `[0, 1]`.

use crate::config::{DistanceScale, RetrievalConfig};
use crate::models::{ConfidenceReport, Quality, RerankedDocument, RetrievedDocument};

const GOOD_ABOVE: f32 = 0.5;
const MODERATE_ABOVE: f32 = 0.2;

/// Scores taken directly from the rerank pass.
pub fn rerank_scores(documents: &[RerankedDocument]) -> Vec<f32> {
    documents
        .iter()
        .map(|d| clamp_unit(d.rerank_score))
        .collect()
}

/// `1 - distance / scale` for each document.
pub fn distance_scores(documents: &[RetrievedDocument], config: &RetrievalConfig) -> Vec<f32> {
    let scale = match config.distance_scale {
        DistanceScale::Fixed => config.max_distance,
        DistanceScale::Batch => documents
            .iter()
            .map(|d| d.distance)
            .fold(0.0f32, f32::max),
    };
    documents
        .iter()
        .map(|d| {
            if scale <= 0.0 {
                // All distances are zero (or the scale is degenerate).
                1.0
            } else {
                clamp_unit(1.0 - d.distance / scale)
            }
        })
        .collect()
}

/// Mean, quality bucket and sufficiency for a set of scores.
pub fn assess(scores: Vec<f32>) -> ConfidenceReport {
    if scores.is_empty() {
        return ConfidenceReport::empty();
    }
    let mean = scores.iter().sum::<f32>() / scores.len() as f32;
    ConfidenceReport {
        quality: quality_for(mean),
        has_sufficient_data: mean > MODERATE_ABOVE,
        mean,
        scores,
    }
}

pub fn quality_for(mean: f32) -> Quality {
    if mean > GOOD_ABOVE {
        Quality::Good
    } else if mean > MODERATE_ABOVE {
        Quality::Moderate
    } else {
        Quality::Low
    }
}

fn clamp_unit(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

use std::cmp::Ordering;

/// The two retrieval signals a `uid` can carry: a direct doc-tier hit and/or
/// a rolled-up best-step hit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scores {
    pub doc: Option<f32>,
    pub step: Option<f32>,
}

/// Weights used for linear score fusion between the doc and step tiers.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub doc: f32,
    pub step: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { doc: 0.7, step: 0.3 }
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// `final = W_DOC · s_doc + W_STEP · s_step*`, degrading to whichever signal
/// is present when only one tier produced a hit for this `uid`.
pub fn fuse_scores(scores: &Scores, weights: FusionWeights) -> f32 {
    match (scores.doc, scores.step) {
        (Some(doc), Some(step)) => clamp_unit(weights.doc.mul_add(doc, weights.step * step)),
        (Some(doc), None) => clamp_unit(weights.doc * doc),
        (None, Some(step)) => clamp_unit(weights.step * step),
        (None, None) => 0.0,
    }
}

/// A candidate `uid` plus its per-tier scores, fused score, and the step
/// indices (if any) that contributed to the step-tier rollup.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub uid: String,
    pub scores: Scores,
    pub fused: f32,
    pub matched_step_indices: Vec<u32>,
}

impl Candidate {
    pub fn new(uid: String) -> Self {
        Self {
            uid,
            scores: Scores::default(),
            fused: 0.0,
            matched_step_indices: Vec::new(),
        }
    }

    fn best_step_index(&self) -> Option<u32> {
        self.matched_step_indices.iter().min().copied()
    }
}

/// Sort descending by `final`, tie-break by `uid` ascending, then by best
/// step index ascending.
pub fn sort_by_fused_desc(items: &mut [Candidate]) {
    items.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.uid.cmp(&b.uid))
            .then_with(|| a.best_step_index().cmp(&b.best_step_index()))
    });
}

//! Campaign/influencer match ranking
//!
//! Scores come from an external [`MatchScorer`]; this module only orders
//! them.

use std::cmp::Ordering;

/// A campaign looking for influencers
#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub advertiser_id: String,
    pub title: String,
    pub categories: Vec<String>,
}

/// An influencer that could be matched with a campaign
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub handle: String,
    pub categories: Vec<String>,
    pub followers: u64,
}

/// Source of match scores. `None` means the candidate could not be scored.
pub trait MatchScorer {
    fn score(&self, campaign: &Campaign, candidate: &Candidate) -> Option<f32>;
}

impl<F> MatchScorer for F
where
    F: Fn(&Campaign, &Candidate) -> Option<f32>,
{
    fn score(&self, campaign: &Campaign, candidate: &Candidate) -> Option<f32> {
        self(campaign, candidate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    /// In `0.0..=100.0`
    pub score: f32,
}

/// Score every candidate and return the scored ones, best first. Ties are
/// broken by candidate id.
pub fn rank_candidates(
    scorer: &dyn MatchScorer,
    campaign: &Campaign,
    candidates: Vec<Candidate>,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let score = scorer.score(campaign, &candidate)?;
            if score.is_nan() {
                tracing::debug!("Dropping NaN score for {}", candidate.id);
                return None;
            }
            Some(RankedCandidate {
                score: score.clamp(0.0, 100.0),
                candidate,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.candidate.id.cmp(&b.candidate.id))
    });
    ranked
}

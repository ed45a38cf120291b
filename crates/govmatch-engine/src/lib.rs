//! Dimension scorers, match aggregation, and best-cluster selection.
//!
//! Scoring is deterministic and stateless per (opportunity, cluster) pair:
//! the same inputs always produce the same [`MatchResult`]. The semantic
//! dimension is a pluggable strategy; everything else is fixed policy.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use govmatch_core::{
    CapabilityCluster, Certification, DimensionScores, MatchResult, MatchTier, Opportunity,
    SetAside, AGENCY_MAX, GEO_MAX, NAICS_MAX, SEMANTIC_MAX, SET_ASIDE_MAX,
};
use strsim::jaro_winkler;
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "govmatch-engine";

/// Partial credit when the opportunity is full and open: no certification
/// overlap, but no exclusionary barrier either.
const FULL_AND_OPEN_POINTS: f64 = 15.0;
/// Partial credit for a small-business set-aside when the cluster holds any
/// certification, just not the exact one.
const SMALL_BUSINESS_PARTIAL_POINTS: f64 = 15.0;
const NAICS_INDUSTRY_GROUP_POINTS: f64 = 20.0;
const NAICS_SECTOR_POINTS: f64 = 10.0;

/// A collaborator-backed semantic scorer failed for one (opportunity,
/// cluster) pair. The dimension degrades to zero; the batch continues.
#[derive(Debug, Error)]
#[error("semantic scoring unavailable: {0}")]
pub struct SemanticUnavailable(pub String);

/// Pluggable topical-relevance strategy, bounded to `[0, 30]`.
///
/// Implementations must be deterministic for identical inputs and must not
/// fail on empty text (return 0 instead).
pub trait SemanticScorer: Send + Sync {
    fn score(&self, capability: &str, opportunity_text: &str)
        -> Result<f64, SemanticUnavailable>;
}

/// Deterministic keyword-coverage scorer: the fraction of significant
/// capability terms that appear (or nearly appear) in the opportunity text,
/// scaled to the semantic maximum.
#[derive(Debug, Clone)]
pub struct KeywordOverlapScorer {
    /// Jaro-Winkler similarity at which two tokens count as the same term.
    pub near_match_threshold: f64,
}

impl Default for KeywordOverlapScorer {
    fn default() -> Self {
        Self {
            near_match_threshold: 0.92,
        }
    }
}

fn significant_tokens(text: &str) -> BTreeSet<String> {
    text.to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|token| token.len() > 3)
        .map(str::to_string)
        .collect()
}

impl SemanticScorer for KeywordOverlapScorer {
    fn score(
        &self,
        capability: &str,
        opportunity_text: &str,
    ) -> Result<f64, SemanticUnavailable> {
        let capability_terms = significant_tokens(capability);
        let opportunity_terms = significant_tokens(opportunity_text);
        if capability_terms.is_empty() || opportunity_terms.is_empty() {
            return Ok(0.0);
        }

        let covered = capability_terms
            .iter()
            .filter(|term| {
                opportunity_terms.contains(*term)
                    || opportunity_terms
                        .iter()
                        .any(|other| jaro_winkler(term, other) >= self.near_match_threshold)
            })
            .count();

        let coverage = covered as f64 / capability_terms.len() as f64;
        Ok((coverage * SEMANTIC_MAX).round())
    }
}

/// Constant-score strategy, useful for wiring tests and for callers that
/// precompute relevance elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct FixedSemanticScorer(pub f64);

impl SemanticScorer for FixedSemanticScorer {
    fn score(&self, _capability: &str, _text: &str) -> Result<f64, SemanticUnavailable> {
        Ok(self.0.clamp(0.0, SEMANTIC_MAX))
    }
}

/// Memoizing wrapper keyed on the input pair, so a non-deterministic inner
/// strategy (e.g. a remote model call) still yields reproducible scores
/// within a run.
pub struct CachedSemanticScorer<S: SemanticScorer> {
    inner: S,
    cache: Mutex<HashMap<(String, String), f64>>,
}

impl<S: SemanticScorer> CachedSemanticScorer<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    // A poisoned lock only means some caller panicked mid-lookup; the map of
    // finished scores is still valid, so recover it rather than panic.
    fn cache(&self) -> MutexGuard<'_, HashMap<(String, String), f64>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: SemanticScorer> SemanticScorer for CachedSemanticScorer<S> {
    fn score(
        &self,
        capability: &str,
        opportunity_text: &str,
    ) -> Result<f64, SemanticUnavailable> {
        let key = (capability.to_string(), opportunity_text.to_string());
        if let Some(cached) = self.cache().get(&key) {
            return Ok(*cached);
        }
        let score = self.inner.score(capability, opportunity_text)?;
        self.cache().insert(key, score);
        Ok(score)
    }
}

/// Tier cut-offs over the overall score.
#[derive(Debug, Clone, Copy)]
pub struct MatchThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            high: 70.0,
            medium: 50.0,
        }
    }
}

impl MatchThresholds {
    pub fn tier(&self, overall_score: f64) -> MatchTier {
        if overall_score >= self.high {
            MatchTier::High
        } else if overall_score >= self.medium {
            MatchTier::Medium
        } else {
            MatchTier::Low
        }
    }
}

// Char-wise prefix equality. Codes should be digit strings, but raw feeds
// are not trusted to keep them that way, so never byte-slice them.
fn shares_code_prefix(a: &str, b: &str, len: usize) -> bool {
    let mut a = a.chars();
    let mut b = b.chars();
    for _ in 0..len {
        match (a.next(), b.next()) {
            (Some(x), Some(y)) if x == y => {}
            _ => return false,
        }
    }
    true
}

/// NAICS code match (0-30): exact code, then same 4-digit industry group,
/// then same 2-digit sector.
pub fn score_naics(
    opp_naics: Option<&str>,
    cluster_codes: &BTreeSet<String>,
) -> (f64, Option<String>) {
    let Some(opp_code) = opp_naics.map(str::trim).filter(|c| !c.is_empty()) else {
        return (0.0, None);
    };
    if cluster_codes.is_empty() {
        return (0.0, None);
    }

    if cluster_codes.contains(opp_code) {
        return (NAICS_MAX, Some(format!("Exact NAICS match ({opp_code})")));
    }
    if cluster_codes
        .iter()
        .any(|code| shares_code_prefix(code, opp_code, 4))
    {
        return (
            NAICS_INDUSTRY_GROUP_POINTS,
            Some(format!("Related NAICS industry group ({opp_code})")),
        );
    }
    if cluster_codes
        .iter()
        .any(|code| shares_code_prefix(code, opp_code, 2))
    {
        return (
            NAICS_SECTOR_POINTS,
            Some(format!("Same NAICS sector ({opp_code})")),
        );
    }
    (0.0, None)
}

/// Set-aside eligibility (0-20). A full-and-open notice earns partial credit
/// for every cluster: nothing bars a bid.
pub fn score_set_aside(
    set_aside: &SetAside,
    certifications: &BTreeSet<Certification>,
) -> (f64, Option<String>) {
    if certifications.iter().any(|cert| cert.satisfies(set_aside)) {
        return (
            SET_ASIDE_MAX,
            Some(format!("Set-aside eligible ({})", set_aside.label())),
        );
    }
    if !set_aside.is_restricted() {
        return (
            FULL_AND_OPEN_POINTS,
            Some("Full and open competition, eligible to bid".to_string()),
        );
    }
    if *set_aside == SetAside::SmallBusiness && !certifications.is_empty() {
        return (
            SMALL_BUSINESS_PARTIAL_POINTS,
            Some("Small business set-aside, partial certification credit".to_string()),
        );
    }
    (0.0, None)
}

fn agency_text_matches(field: &str, preference: &str) -> bool {
    let field = field.to_ascii_lowercase();
    let pref = preference.to_ascii_lowercase();
    if field.contains(&pref) || pref.contains(&field) {
        return true;
    }
    // Sources abbreviate ("DEPT OF DEFENSE" vs "Department of Defense"),
    // so fall back to overlap on significant words.
    pref.split_whitespace()
        .filter(|word| word.len() > 3)
        .any(|word| field.contains(word))
}

/// Agency preference (0-10) against the notice's department or sub-tier.
pub fn score_agency(
    opportunity: &Opportunity,
    agency_preferences: &BTreeSet<String>,
) -> (f64, Option<String>) {
    if agency_preferences.is_empty() {
        return (0.0, None);
    }
    for preference in agency_preferences {
        let hit = [&opportunity.department, &opportunity.sub_tier]
            .into_iter()
            .flatten()
            .any(|field| agency_text_matches(field, preference));
        if hit {
            return (
                AGENCY_MAX,
                Some(format!("Preferred agency ({preference})")),
            );
        }
    }
    (0.0, None)
}

/// Geographic fit (0-10), state-level substring match on the place of
/// performance.
pub fn score_geography(
    place_of_performance: Option<&str>,
    geo_preferences: &BTreeSet<String>,
) -> (f64, Option<String>) {
    let Some(place) = place_of_performance else {
        return (0.0, None);
    };
    if geo_preferences.is_empty() {
        return (0.0, None);
    }
    let place_lower = place.to_ascii_lowercase();
    for preference in geo_preferences {
        if place_lower.contains(&preference.to_ascii_lowercase()) {
            return (GEO_MAX, Some(format!("Geographic fit ({preference})")));
        }
    }
    (0.0, None)
}

/// Scores opportunities against capability clusters and selects the best
/// cluster per opportunity.
pub struct MatchEngine {
    semantic: Box<dyn SemanticScorer>,
    thresholds: MatchThresholds,
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new(Box::new(KeywordOverlapScorer::default()))
    }
}

impl MatchEngine {
    pub fn new(semantic: Box<dyn SemanticScorer>) -> Self {
        Self {
            semantic,
            thresholds: MatchThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: MatchThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn thresholds(&self) -> MatchThresholds {
        self.thresholds
    }

    fn semantic_points(
        &self,
        opportunity: &Opportunity,
        cluster: &CapabilityCluster,
    ) -> (f64, Option<String>) {
        if cluster.capability_description.trim().is_empty() {
            return (0.0, None);
        }
        let mut text = opportunity.title.clone();
        if let Some(description) = &opportunity.description {
            text.push(' ');
            text.push_str(description);
        }
        match self.semantic.score(&cluster.capability_description, &text) {
            Ok(points) => {
                let points = points.clamp(0.0, SEMANTIC_MAX);
                let clause = (points > 0.0)
                    .then(|| format!("Semantic relevance ({points:.0}/{SEMANTIC_MAX:.0})"));
                (points, clause)
            }
            Err(err) => {
                warn!(
                    notice_id = %opportunity.notice_id,
                    cluster_id = %cluster.id,
                    %err,
                    "semantic dimension degraded to 0"
                );
                (
                    0.0,
                    Some("Semantic scoring unavailable for this notice".to_string()),
                )
            }
        }
    }

    /// Score one (opportunity, cluster) pair: clamp each dimension, sum,
    /// assign a tier, and build the explanation from non-zero clauses in
    /// fixed dimension order.
    pub fn score_pair(
        &self,
        opportunity: &Opportunity,
        cluster: &CapabilityCluster,
    ) -> MatchResult {
        let (naics, naics_clause) =
            score_naics(opportunity.naics_code.as_deref(), &cluster.naics_codes);
        let (set_aside, set_aside_clause) =
            score_set_aside(&opportunity.set_aside, &cluster.certifications);
        let (agency, agency_clause) = score_agency(opportunity, &cluster.agency_preferences);
        let (geography, geo_clause) = score_geography(
            opportunity.place_of_performance.as_deref(),
            &cluster.geo_preferences,
        );
        let (semantic, semantic_clause) = self.semantic_points(opportunity, cluster);

        let scores = DimensionScores {
            naics,
            set_aside,
            agency,
            geography,
            semantic,
        }
        .clamped();
        let overall_score = scores.total();

        let mut clauses: Vec<String> = [
            naics_clause,
            set_aside_clause,
            agency_clause,
            geo_clause,
            semantic_clause,
        ]
        .into_iter()
        .flatten()
        .collect();
        if clauses.is_empty() {
            clauses.push("No strong signals; review manually".to_string());
        }

        MatchResult {
            opportunity: opportunity.clone(),
            cluster_id: Some(cluster.id.clone()),
            cluster_name: Some(cluster.name.clone()),
            scores,
            overall_score,
            tier: self.thresholds.tier(overall_score),
            explanation: clauses.join(". "),
        }
    }

    /// Score an opportunity against every cluster and keep the best match.
    ///
    /// Ties break toward the higher NAICS dimension, then toward the cluster
    /// appearing first in the input slice. Returns `None` only for an empty
    /// cluster slice; an all-zero score is a valid low result.
    pub fn best_match(
        &self,
        opportunity: &Opportunity,
        clusters: &[CapabilityCluster],
    ) -> Option<MatchResult> {
        let mut best: Option<MatchResult> = None;
        for cluster in clusters {
            let candidate = self.score_pair(opportunity, cluster);
            let better = match &best {
                None => true,
                Some(current) => {
                    candidate.overall_score > current.overall_score
                        || (candidate.overall_score == current.overall_score
                            && candidate.scores.naics > current.scores.naics)
                }
            };
            if better {
                best = Some(candidate);
            }
        }
        best
    }

    fn unscored(&self, opportunity: &Opportunity) -> MatchResult {
        MatchResult {
            opportunity: opportunity.clone(),
            cluster_id: None,
            cluster_name: None,
            scores: DimensionScores::default(),
            overall_score: 0.0,
            tier: MatchTier::Unscored,
            explanation: "No capability clusters configured for matching".to_string(),
        }
    }

    /// Best-cluster match per opportunity, filtered to
    /// `overall_score >= min_score` and sorted descending. With no clusters
    /// every opportunity comes back unscored (subject to the same filter).
    pub fn score_opportunities(
        &self,
        opportunities: &[Opportunity],
        clusters: &[CapabilityCluster],
        min_score: f64,
    ) -> Vec<MatchResult> {
        let mut results: Vec<MatchResult> = opportunities
            .iter()
            .map(|opp| {
                self.best_match(opp, clusters)
                    .unwrap_or_else(|| self.unscored(opp))
            })
            .filter(|result| result.overall_score >= min_score)
            .collect();
        // Stable sort keeps input order among equal scores.
        results.sort_by(|a, b| b.overall_score.total_cmp(&a.overall_score));
        results
    }
}

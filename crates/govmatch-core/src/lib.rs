//! Core domain model for GOVMATCH: canonical opportunities, capability
//! clusters, and match results.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "govmatch-core";

/// Fixed per-dimension maxima. The five maxima sum to 100.
pub const NAICS_MAX: f64 = 30.0;
pub const SET_ASIDE_MAX: f64 = 20.0;
pub const AGENCY_MAX: f64 = 10.0;
pub const GEO_MAX: f64 = 10.0;
pub const SEMANTIC_MAX: f64 = 30.0;

/// Set-aside category attached to a procurement notice.
///
/// Source feeds carry these as free-form strings with inconsistent naming;
/// [`SetAside::parse`] folds the known spellings into canonical variants and
/// keeps anything unrecognized as `Other` so scoring stays exhaustive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetAside {
    /// Full and open competition, no restriction.
    None,
    SmallBusiness,
    EightA,
    HubZone,
    Sdvosb,
    Wosb,
    Edwosb,
    Sdb,
    Other(String),
}

impl SetAside {
    /// Fold a raw set-aside string into a canonical variant.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return SetAside::None;
        };
        let text = raw.trim();
        if text.is_empty() {
            return SetAside::None;
        }
        let lower = text.to_ascii_lowercase();
        if lower == "none" || lower.contains("full and open") {
            return SetAside::None;
        }
        if lower.contains("8(a)") || lower.contains("8a") {
            return SetAside::EightA;
        }
        if lower.contains("hubzone") || lower.contains("hub zone") {
            return SetAside::HubZone;
        }
        if lower.contains("service-disabled") || lower.contains("sdvosb") {
            return SetAside::Sdvosb;
        }
        if lower.contains("economically disadvantaged") || lower.contains("edwosb") {
            return SetAside::Edwosb;
        }
        if lower.contains("women-owned") || lower.contains("wosb") {
            return SetAside::Wosb;
        }
        if lower.contains("small disadvantaged") || lower.contains("sdb") {
            return SetAside::Sdb;
        }
        if lower.contains("small business") {
            return SetAside::SmallBusiness;
        }
        SetAside::Other(text.to_string())
    }

    pub fn is_restricted(&self) -> bool {
        !matches!(self, SetAside::None)
    }

    /// Display label matching the naming procurement sources use.
    pub fn label(&self) -> &str {
        match self {
            SetAside::None => "Full and Open",
            SetAside::SmallBusiness => "Total Small Business",
            SetAside::EightA => "8(a)",
            SetAside::HubZone => "HUBZone",
            SetAside::Sdvosb => "Service-Disabled Veteran-Owned",
            SetAside::Wosb => "Women-Owned Small Business",
            SetAside::Edwosb => "Economically Disadvantaged WOSB",
            SetAside::Sdb => "Small Disadvantaged Business",
            SetAside::Other(s) => s,
        }
    }
}

/// Small business certification held by a capability cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Certification {
    #[serde(rename = "Small Business")]
    SmallBusiness,
    #[serde(rename = "Small Disadvantaged Business")]
    SmallDisadvantaged,
    #[serde(rename = "8(a)")]
    EightA,
    #[serde(rename = "HUBZone")]
    HubZone,
    #[serde(rename = "Service-Disabled Veteran-Owned")]
    Sdvosb,
    #[serde(rename = "Veteran-Owned")]
    Vosb,
    #[serde(rename = "Women-Owned Small Business")]
    Wosb,
    #[serde(rename = "Economically Disadvantaged WOSB")]
    Edwosb,
    #[serde(rename = "Minority-Owned")]
    MinorityOwned,
    #[serde(rename = "AbilityOne")]
    AbilityOne,
}

impl Certification {
    /// Whether this certification satisfies the given set-aside requirement.
    ///
    /// Canonical set-asides match one-to-one; `Other` strings fall back to
    /// keyword containment because sources spell restrictions inconsistently.
    pub fn satisfies(&self, set_aside: &SetAside) -> bool {
        match set_aside {
            SetAside::None => false,
            SetAside::SmallBusiness => matches!(self, Certification::SmallBusiness),
            SetAside::EightA => matches!(self, Certification::EightA),
            SetAside::HubZone => matches!(self, Certification::HubZone),
            SetAside::Sdvosb => matches!(self, Certification::Sdvosb),
            SetAside::Wosb => matches!(self, Certification::Wosb),
            SetAside::Edwosb => matches!(self, Certification::Edwosb),
            SetAside::Sdb => matches!(self, Certification::SmallDisadvantaged),
            SetAside::Other(raw) => {
                let lower = raw.to_ascii_lowercase();
                self.keywords().iter().any(|kw| lower.contains(kw))
            }
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Certification::SmallBusiness => &["small business"],
            Certification::SmallDisadvantaged => &["small disadvantaged", "sdb"],
            Certification::EightA => &["8(a)", "8a", "eight-a"],
            Certification::HubZone => &["hubzone", "hub zone"],
            Certification::Sdvosb => &["service-disabled veteran", "sdvosb"],
            Certification::Vosb => &["veteran-owned", "vosb"],
            Certification::Wosb => &["women-owned", "wosb"],
            Certification::Edwosb => &["economically disadvantaged", "edwosb"],
            Certification::MinorityOwned => &["minority"],
            Certification::AbilityOne => &["abilityone", "ability one"],
        }
    }
}

/// Where an opportunity came from: prime solicitations vs subcontracting leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    Prime,
    Subcontract,
    Other(String),
}

/// Contract complexity tier bucketed by estimated dollar value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplexityTier {
    /// Under $10K.
    Micro,
    /// $10K to $250K.
    Simplified,
    /// $250K to $10M.
    Standard,
    /// $10M and above.
    Major,
}

impl ComplexityTier {
    pub fn from_value(estimated_value: f64) -> Self {
        if estimated_value < 10_000.0 {
            ComplexityTier::Micro
        } else if estimated_value < 250_000.0 {
            ComplexityTier::Simplified
        } else if estimated_value < 10_000_000.0 {
            ComplexityTier::Standard
        } else {
            ComplexityTier::Major
        }
    }
}

/// Estimated competitive landscape for an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompetitionLevel {
    /// Set-aside limits the eligible bidder pool.
    Restricted,
    /// Full and open, all businesses may bid.
    Open,
    /// Partial set-aside, mixed competitive field.
    Partial,
}

impl CompetitionLevel {
    pub fn from_set_aside(set_aside: &SetAside) -> Self {
        if set_aside.is_restricted() {
            CompetitionLevel::Restricted
        } else {
            CompetitionLevel::Open
        }
    }
}

/// Canonical procurement notice. `notice_id` is the identity key and never
/// changes once normalized; every other field may be refreshed by
/// re-ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub notice_id: String,
    pub title: String,
    pub department: Option<String>,
    pub sub_tier: Option<String>,
    pub office: Option<String>,
    pub naics_code: Option<String>,
    pub naics_description: Option<String>,
    pub set_aside: SetAside,
    pub opportunity_type: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub response_deadline: Option<NaiveDate>,
    pub description: Option<String>,
    pub place_of_performance: Option<String>,
    pub estimated_value: Option<f64>,
    pub source: Source,
    pub complexity_tier: Option<ComplexityTier>,
    pub estimated_competition: Option<CompetitionLevel>,
    pub link: Option<String>,
}

/// A person on a capability cluster's team roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    pub role: String,
    pub clearance: Option<String>,
}

/// One named area of a company's capability. A company may define any number
/// of clusters; each opportunity is matched against every cluster
/// independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCluster {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub naics_codes: BTreeSet<String>,
    #[serde(default)]
    pub certifications: BTreeSet<Certification>,
    /// Free-text description consumed by the semantic scorer.
    #[serde(default)]
    pub capability_description: String,
    #[serde(default)]
    pub team_roster: Vec<TeamMember>,
    /// Preferred awarding departments/sub-tiers.
    #[serde(default)]
    pub agency_preferences: BTreeSet<String>,
    /// Preferred places of performance, state-level granularity.
    #[serde(default)]
    pub geo_preferences: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-dimension score contributions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DimensionScores {
    pub naics: f64,
    pub set_aside: f64,
    pub agency: f64,
    pub geography: f64,
    pub semantic: f64,
}

impl DimensionScores {
    /// Clamp each dimension into `[0, max]`, guarding against a misbehaving
    /// scorer before summation.
    pub fn clamped(&self) -> DimensionScores {
        DimensionScores {
            naics: self.naics.clamp(0.0, NAICS_MAX),
            set_aside: self.set_aside.clamp(0.0, SET_ASIDE_MAX),
            agency: self.agency.clamp(0.0, AGENCY_MAX),
            geography: self.geography.clamp(0.0, GEO_MAX),
            semantic: self.semantic.clamp(0.0, SEMANTIC_MAX),
        }
    }

    pub fn total(&self) -> f64 {
        let c = self.clamped();
        c.naics + c.set_aside + c.agency + c.geography + c.semantic
    }
}

/// Coarse bucket derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchTier {
    High,
    Medium,
    Low,
    /// Scoring could not run, e.g. no clusters were configured.
    Unscored,
}

/// Outcome of scoring one opportunity against the caller's clusters.
/// Created fresh on each scoring pass and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub opportunity: Opportunity,
    pub cluster_id: Option<String>,
    pub cluster_name: Option<String>,
    pub scores: DimensionScores,
    pub overall_score: f64,
    pub tier: MatchTier,
    pub explanation: String,
}

/// Summary of one fetch-and-score pass, appended to the freshness tracker's
/// run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRun {
    pub run_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub total_fetched: usize,
    pub total_scored: usize,
    pub new_above_threshold: usize,
    /// Size of the tracked notice-id set after this run.
    pub tracked_ids: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_aside_parsing_folds_known_spellings() {
        assert_eq!(SetAside::parse(None), SetAside::None);
        assert_eq!(SetAside::parse(Some("")), SetAside::None);
        assert_eq!(SetAside::parse(Some("None")), SetAside::None);
        assert_eq!(
            SetAside::parse(Some("Full and Open Competition")),
            SetAside::None
        );
        assert_eq!(
            SetAside::parse(Some("Total Small Business Set-Aside")),
            SetAside::SmallBusiness
        );
        assert_eq!(SetAside::parse(Some("8(a) Set-Aside")), SetAside::EightA);
        assert_eq!(SetAside::parse(Some("HUBZone Set-Aside")), SetAside::HubZone);
        assert_eq!(
            SetAside::parse(Some("Service-Disabled Veteran-Owned Small Business")),
            SetAside::Sdvosb
        );
        assert_eq!(
            SetAside::parse(Some("Economically Disadvantaged WOSB")),
            SetAside::Edwosb
        );
        assert_eq!(
            SetAside::parse(Some("Women-Owned Small Business")),
            SetAside::Wosb
        );
    }

    #[test]
    fn unknown_set_aside_is_preserved_as_other() {
        let parsed = SetAside::parse(Some("Indian Small Business Economic Enterprise"));
        assert_eq!(
            parsed,
            SetAside::Other("Indian Small Business Economic Enterprise".to_string())
        );
        assert!(parsed.is_restricted());
    }

    #[test]
    fn certifications_satisfy_their_canonical_set_asides() {
        assert!(Certification::EightA.satisfies(&SetAside::EightA));
        assert!(Certification::HubZone.satisfies(&SetAside::HubZone));
        assert!(Certification::SmallBusiness.satisfies(&SetAside::SmallBusiness));
        assert!(!Certification::Vosb.satisfies(&SetAside::Sdvosb));
        assert!(!Certification::Wosb.satisfies(&SetAside::None));
    }

    #[test]
    fn other_set_asides_match_by_keyword() {
        let raw = SetAside::Other("Veteran-Owned Small Business Set-Aside".to_string());
        assert!(Certification::Vosb.satisfies(&raw));
        assert!(!Certification::HubZone.satisfies(&raw));
    }

    #[test]
    fn complexity_tier_boundaries() {
        assert_eq!(ComplexityTier::from_value(9_999.0), ComplexityTier::Micro);
        assert_eq!(
            ComplexityTier::from_value(10_000.0),
            ComplexityTier::Simplified
        );
        assert_eq!(
            ComplexityTier::from_value(250_000.0),
            ComplexityTier::Standard
        );
        assert_eq!(
            ComplexityTier::from_value(10_000_000.0),
            ComplexityTier::Major
        );
    }

    #[test]
    fn clamping_bounds_each_dimension() {
        let scores = DimensionScores {
            naics: 999.0,
            set_aside: -5.0,
            agency: 10.0,
            geography: 10.0,
            semantic: 31.0,
        };
        let clamped = scores.clamped();
        assert_eq!(clamped.naics, NAICS_MAX);
        assert_eq!(clamped.set_aside, 0.0);
        assert_eq!(clamped.semantic, SEMANTIC_MAX);
        assert!(scores.total() <= 100.0);
    }
}

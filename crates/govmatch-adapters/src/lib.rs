//! Opportunity Normalizer: raw procurement records from heterogeneous
//! sources into the canonical [`Opportunity`] shape.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use govmatch_core::{CompetitionLevel, ComplexityTier, Opportunity, SetAside, Source};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "govmatch-adapters";

/// Raw procurement record as fetched from a source feed. Field names accept
/// the camelCase spellings SAM.gov-style APIs emit; everything is optional
/// because feeds disagree about which fields they populate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, alias = "noticeId")]
    pub notice_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "fullParentPathName")]
    pub department: Option<String>,
    #[serde(default, alias = "subTier")]
    pub sub_tier: Option<String>,
    #[serde(default)]
    pub office: Option<String>,
    #[serde(default, alias = "naicsCode")]
    pub naics_code: Option<String>,
    #[serde(default, alias = "naicsDescription")]
    pub naics_description: Option<String>,
    #[serde(default, alias = "typeOfSetAsideDescription", alias = "setAside")]
    pub set_aside: Option<String>,
    #[serde(default, alias = "type", alias = "opportunityType")]
    pub opportunity_type: Option<String>,
    #[serde(default, alias = "postedDate")]
    pub posted_date: Option<String>,
    #[serde(default, alias = "responseDeadLine", alias = "responseDeadline")]
    pub response_deadline: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "placeOfPerformance")]
    pub place_of_performance: Option<String>,
    #[serde(default, alias = "estimatedValue")]
    pub estimated_value: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, alias = "uiLink")]
    pub link: Option<String>,
}

/// Unrecoverable per-record failure: the record lacks a stable identity or a
/// title and is dropped from the batch.
#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("record has no notice id")]
    MissingNoticeId,
    #[error("record {notice_id} has no title")]
    MissingTitle { notice_id: String },
}

/// Parse a notice date in any of the formats source feeds use.
/// Unparseable input becomes `None`, never an error.
pub fn parse_notice_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%m/%d/%Y") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.date_naive())
}

fn parse_source(raw: Option<&str>) -> Source {
    let Some(raw) = raw else {
        return Source::Prime;
    };
    let lower = raw.trim().to_ascii_lowercase();
    if lower.is_empty() || lower.contains("sam") || lower == "prime" {
        Source::Prime
    } else if lower.contains("subnet") || lower.contains("subcontract") {
        Source::Subcontract
    } else {
        Source::Other(raw.trim().to_string())
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Convert one raw record into a canonical [`Opportunity`]. Pure transform;
/// fails only when the record lacks a stable identifier or a title.
pub fn normalize(raw: &RawRecord) -> Result<Opportunity, NormalizationError> {
    let notice_id = non_blank(&raw.notice_id).ok_or(NormalizationError::MissingNoticeId)?;
    let title = non_blank(&raw.title).ok_or_else(|| NormalizationError::MissingTitle {
        notice_id: notice_id.clone(),
    })?;

    let set_aside = SetAside::parse(raw.set_aside.as_deref());
    let estimated_value = raw.estimated_value;

    Ok(Opportunity {
        notice_id,
        title,
        department: non_blank(&raw.department),
        sub_tier: non_blank(&raw.sub_tier),
        office: non_blank(&raw.office),
        naics_code: non_blank(&raw.naics_code),
        naics_description: non_blank(&raw.naics_description),
        opportunity_type: non_blank(&raw.opportunity_type),
        posted_date: raw.posted_date.as_deref().and_then(parse_notice_date),
        response_deadline: raw
            .response_deadline
            .as_deref()
            .and_then(parse_notice_date),
        description: non_blank(&raw.description),
        place_of_performance: non_blank(&raw.place_of_performance),
        estimated_value,
        source: parse_source(raw.source.as_deref()),
        complexity_tier: estimated_value.map(ComplexityTier::from_value),
        estimated_competition: Some(CompetitionLevel::from_set_aside(&set_aside)),
        set_aside,
        link: non_blank(&raw.link),
    })
}

/// Normalize a whole batch, dropping failing records with a warning instead
/// of aborting. Returns the survivors and the dropped count.
pub fn normalize_batch(records: &[RawRecord]) -> (Vec<Opportunity>, usize) {
    let mut opportunities = Vec::with_capacity(records.len());
    let mut dropped = 0usize;
    for record in records {
        match normalize(record) {
            Ok(opp) => opportunities.push(opp),
            Err(err) => {
                dropped += 1;
                warn!(%err, "dropping unnormalizable record");
            }
        }
    }
    (opportunities, dropped)
}

/// Injected collaborator that delivers raw record batches to the scan
/// pipeline. Fetch cadence, retries, and timeouts belong to the
/// implementation, not the core.
pub trait RawOpportunitySource {
    fn fetch(&self) -> Result<Vec<RawRecord>>;
}

/// Batch file shape: either a bare JSON array of records or a SAM.gov-style
/// envelope with an `opportunitiesData` array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordBatchFile {
    Envelope {
        #[serde(rename = "opportunitiesData")]
        opportunities_data: Vec<RawRecord>,
    },
    Bare(Vec<RawRecord>),
}

/// Fixture-first source reading a captured JSON batch from disk.
#[derive(Debug, Clone)]
pub struct JsonBatchSource {
    path: PathBuf,
}

impl JsonBatchSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RawOpportunitySource for JsonBatchSource {
    fn fetch(&self) -> Result<Vec<RawRecord>> {
        load_record_batch(&self.path)
    }
}

pub fn load_record_batch(path: impl AsRef<Path>) -> Result<Vec<RawRecord>> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let batch: RecordBatchFile =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(match batch {
        RecordBatchFile::Envelope { opportunities_data } => opportunities_data,
        RecordBatchFile::Bare(records) => records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(notice_id: &str, title: &str) -> RawRecord {
        RawRecord {
            notice_id: Some(notice_id.to_string()),
            title: Some(title.to_string()),
            ..RawRecord::default()
        }
    }

    #[test]
    fn normalize_requires_notice_id_and_title() {
        let missing_id = RawRecord {
            title: Some("IT Support Services".to_string()),
            ..RawRecord::default()
        };
        assert!(matches!(
            normalize(&missing_id),
            Err(NormalizationError::MissingNoticeId)
        ));

        let missing_title = RawRecord {
            notice_id: Some("N-001".to_string()),
            title: Some("   ".to_string()),
            ..RawRecord::default()
        };
        assert!(matches!(
            normalize(&missing_title),
            Err(NormalizationError::MissingTitle { .. })
        ));
    }

    #[test]
    fn date_parsing_accepts_both_source_formats() {
        assert_eq!(
            parse_notice_date("03/15/2026"),
            NaiveDate::from_ymd_opt(2026, 3, 15)
        );
        assert_eq!(
            parse_notice_date("2026-03-15"),
            NaiveDate::from_ymd_opt(2026, 3, 15)
        );
        assert_eq!(
            parse_notice_date("2026-03-15T17:00:00-05:00"),
            NaiveDate::from_ymd_opt(2026, 3, 15)
        );
        assert_eq!(parse_notice_date("next Tuesday"), None);
        assert_eq!(parse_notice_date(""), None);
    }

    #[test]
    fn unparseable_dates_become_none_without_dropping_the_record() {
        let mut record = raw("N-002", "Janitorial Services");
        record.posted_date = Some("TBD".to_string());
        let opp = normalize(&record).expect("record should survive");
        assert_eq!(opp.posted_date, None);
    }

    #[test]
    fn normalized_schema_is_total() {
        let opp = normalize(&raw("N-003", "Groundskeeping")).expect("normalize");
        assert_eq!(opp.notice_id, "N-003");
        assert_eq!(opp.department, None);
        assert_eq!(opp.naics_code, None);
        assert_eq!(opp.set_aside, SetAside::None);
        assert_eq!(opp.source, Source::Prime);
        assert_eq!(opp.complexity_tier, None);
        assert_eq!(
            opp.estimated_competition,
            Some(CompetitionLevel::Open)
        );
    }

    #[test]
    fn complexity_and_competition_are_derived() {
        let mut record = raw("N-004", "Base Operations Support");
        record.estimated_value = Some(1_500_000.0);
        record.set_aside = Some("Total Small Business Set-Aside".to_string());
        let opp = normalize(&record).expect("normalize");
        assert_eq!(opp.complexity_tier, Some(ComplexityTier::Standard));
        assert_eq!(
            opp.estimated_competition,
            Some(CompetitionLevel::Restricted)
        );
        assert_eq!(opp.set_aside, SetAside::SmallBusiness);
    }

    #[test]
    fn batch_normalization_drops_bad_records_and_keeps_the_rest() {
        let records = vec![
            raw("N-005", "Cybersecurity Assessment"),
            RawRecord::default(),
            raw("N-006", "Fleet Maintenance"),
        ];
        let (opportunities, dropped) = normalize_batch(&records);
        assert_eq!(opportunities.len(), 2);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn raw_records_accept_camel_case_feeds() {
        let json = r#"{
            "noticeId": "SAM-123",
            "title": "Cloud Migration Support",
            "subTier": "DEPT OF THE NAVY",
            "naicsCode": "541512",
            "typeOfSetAsideDescription": "Total Small Business Set-Aside",
            "postedDate": "01/05/2026",
            "responseDeadLine": "2026-02-01",
            "placeOfPerformance": "San Diego, CA",
            "uiLink": "https://sam.gov/opp/SAM-123"
        }"#;
        let record: RawRecord = serde_json::from_str(json).expect("deserialize");
        let opp = normalize(&record).expect("normalize");
        assert_eq!(opp.notice_id, "SAM-123");
        assert_eq!(opp.sub_tier.as_deref(), Some("DEPT OF THE NAVY"));
        assert_eq!(opp.naics_code.as_deref(), Some("541512"));
        assert_eq!(opp.posted_date, NaiveDate::from_ymd_opt(2026, 1, 5));
        assert_eq!(opp.response_deadline, NaiveDate::from_ymd_opt(2026, 2, 1));
    }

    #[test]
    fn batch_files_accept_bare_arrays_and_envelopes() {
        let bare = r#"[{"noticeId": "A", "title": "One"}]"#;
        let envelope = r#"{"opportunitiesData": [{"noticeId": "B", "title": "Two"}]}"#;
        let dir = tempfile::tempdir().expect("tempdir");
        let bare_path = dir.path().join("bare.json");
        let envelope_path = dir.path().join("envelope.json");
        fs::write(&bare_path, bare).expect("write");
        fs::write(&envelope_path, envelope).expect("write");

        let bare_records = load_record_batch(&bare_path).expect("bare batch");
        let env_records = load_record_batch(&envelope_path).expect("envelope batch");
        assert_eq!(bare_records.len(), 1);
        assert_eq!(env_records[0].notice_id.as_deref(), Some("B"));
    }
}

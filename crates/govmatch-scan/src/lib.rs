//! Scan pipeline: freshness tracking across repeated fetch-and-score runs.
//!
//! The tracker keeps the set of previously observed notice ids so repeated
//! scans alert only on new matches above the threshold. Scoring itself stays
//! in `govmatch-engine`; this crate owns the only mutable state in the
//! system and expects a single active scan at a time.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use govmatch_adapters::{normalize_batch, RawRecord};
use govmatch_core::{CapabilityCluster, MatchResult, ScanRun};
use govmatch_engine::MatchEngine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "govmatch-scan";

/// Tracked-id cap carried over from the original scout state file; oldest
/// ids are evicted first once the cap is reached.
const MAX_TRACKED_IDS: usize = 10_000;
/// Run history records kept in memory.
const MAX_RUN_HISTORY: usize = 100;

pub const DEFAULT_ALERT_THRESHOLD: f64 = 70.0;

/// Persisting the tracked-id set failed. The scan's in-memory results are
/// still valid; retrying the write is the caller's responsibility.
#[derive(Debug, Error)]
#[error("persisting tracked ids to {path}: {source}")]
pub struct TrackerWriteFailure {
    pub path: String,
    #[source]
    pub source: std::io::Error,
}

/// Persistence hook for previously observed notice ids.
pub trait TrackedIdStore {
    fn contains(&self, notice_id: &str) -> bool;
    fn add(&mut self, notice_ids: &[String]) -> Result<(), TrackerWriteFailure>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Volatile store for tests and single-shot invocations.
#[derive(Debug, Default)]
pub struct InMemoryTrackedIds {
    ids: BTreeSet<String>,
}

impl TrackedIdStore for InMemoryTrackedIds {
    fn contains(&self, notice_id: &str) -> bool {
        self.ids.contains(notice_id)
    }

    fn add(&mut self, notice_ids: &[String]) -> Result<(), TrackerWriteFailure> {
        self.ids.extend(notice_ids.iter().cloned());
        Ok(())
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackedState {
    #[serde(default)]
    tracked_notice_ids: Vec<String>,
}

/// File-backed store with atomic temp-file-then-rename writes. A missing or
/// corrupt state file starts fresh rather than failing the scan.
#[derive(Debug)]
pub struct JsonFileTrackedIds {
    path: PathBuf,
    /// Insertion order, oldest first, for cap eviction.
    ids: Vec<String>,
    index: BTreeSet<String>,
}

impl JsonFileTrackedIds {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<TrackedState>(&text) {
                Ok(state) => state.tracked_notice_ids,
                Err(err) => {
                    warn!(path = %path.display(), %err, "corrupt scan state, starting fresh");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        let index = ids.iter().cloned().collect();
        Self { path, ids, index }
    }

    fn persist(&self) -> Result<(), TrackerWriteFailure> {
        let fail = |source: std::io::Error| TrackerWriteFailure {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(fail)?;
            }
        }

        let state = TrackedState {
            tracked_notice_ids: self.ids.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&state)
            .map_err(|err| fail(std::io::Error::other(err)))?;

        let temp_path = self
            .path
            .with_file_name(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, bytes).map_err(fail)?;
        fs::rename(&temp_path, &self.path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            fail(err)
        })
    }
}

impl TrackedIdStore for JsonFileTrackedIds {
    fn contains(&self, notice_id: &str) -> bool {
        self.index.contains(notice_id)
    }

    fn add(&mut self, notice_ids: &[String]) -> Result<(), TrackerWriteFailure> {
        for id in notice_ids {
            if self.index.insert(id.clone()) {
                self.ids.push(id.clone());
            }
        }
        if self.ids.len() > MAX_TRACKED_IDS {
            let overflow = self.ids.len() - MAX_TRACKED_IDS;
            for evicted in self.ids.drain(..overflow) {
                self.index.remove(&evicted);
            }
        }
        self.persist()
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Injected collaborator that supplies the caller's capability clusters.
pub trait ClusterRepository {
    fn list(&self) -> Result<Vec<CapabilityCluster>>;
}

#[derive(Debug, Deserialize)]
struct ClusterRegistry {
    clusters: Vec<CapabilityCluster>,
}

/// Cluster registry loaded from a YAML file.
#[derive(Debug, Clone)]
pub struct YamlClusterRepository {
    path: PathBuf,
}

impl YamlClusterRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ClusterRepository for YamlClusterRepository {
    fn list(&self) -> Result<Vec<CapabilityCluster>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let registry: ClusterRegistry = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(registry.clusters)
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub alert_threshold: f64,
    pub state_path: PathBuf,
    pub clusters_path: PathBuf,
}

impl ScanConfig {
    pub fn from_env() -> Self {
        Self {
            alert_threshold: std::env::var("GOVMATCH_ALERT_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_ALERT_THRESHOLD),
            state_path: std::env::var("GOVMATCH_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/scan_state.json")),
            clusters_path: std::env::var("GOVMATCH_CLUSTERS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./clusters.yaml")),
        }
    }
}

/// Everything one scan produced. `run` is the durable summary; a tracker
/// write failure rides alongside the results instead of replacing them.
#[derive(Debug)]
pub struct ScanOutcome {
    pub run: ScanRun,
    /// Newly seen matches at or above the alert threshold, sorted descending.
    pub new_matches: Vec<MatchResult>,
    pub dropped_records: usize,
    pub tracker_error: Option<TrackerWriteFailure>,
}

/// Single-writer scan pipeline over a tracked-id store.
pub struct ScanPipeline<S: TrackedIdStore> {
    engine: MatchEngine,
    store: S,
    alert_threshold: f64,
    history: Vec<ScanRun>,
}

impl<S: TrackedIdStore> ScanPipeline<S> {
    pub fn new(engine: MatchEngine, store: S, alert_threshold: f64) -> Self {
        Self {
            engine,
            store,
            alert_threshold,
            history: Vec::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Append-only record of completed runs, newest last.
    pub fn history(&self) -> &[ScanRun] {
        &self.history
    }

    /// Execute one scan: normalize, score everything, alert on new notices
    /// at or above the threshold, then fold all ids into the tracked set.
    pub fn run_scan(
        &mut self,
        raw_batch: &[RawRecord],
        clusters: &[CapabilityCluster],
    ) -> ScanOutcome {
        let run_at = Utc::now();
        let run_id = Uuid::new_v4();

        let (opportunities, dropped_records) = normalize_batch(raw_batch);
        let scored = self.engine.score_opportunities(&opportunities, clusters, 0.0);

        let new_matches: Vec<MatchResult> = scored
            .iter()
            .filter(|m| {
                m.overall_score >= self.alert_threshold
                    && !self.store.contains(&m.opportunity.notice_id)
            })
            .cloned()
            .collect();

        let all_ids: Vec<String> = scored
            .iter()
            .map(|m| m.opportunity.notice_id.clone())
            .collect();
        let tracker_error = self.store.add(&all_ids).err();
        if let Some(err) = &tracker_error {
            warn!(%err, "tracked-id persistence failed, results still returned");
        }

        let run = ScanRun {
            run_id,
            run_at,
            total_fetched: raw_batch.len(),
            total_scored: scored.len(),
            new_above_threshold: new_matches.len(),
            tracked_ids: self.store.len(),
        };
        info!(
            %run_id,
            total_fetched = run.total_fetched,
            total_scored = run.total_scored,
            new_above_threshold = run.new_above_threshold,
            "scan complete"
        );

        self.history.push(run.clone());
        if self.history.len() > MAX_RUN_HISTORY {
            let overflow = self.history.len() - MAX_RUN_HISTORY;
            self.history.drain(..overflow);
        }

        ScanOutcome {
            run,
            new_matches,
            dropped_records,
            tracker_error,
        }
    }
}

/// Convenience entry point wiring config, cluster registry, and file-backed
/// state for a one-shot scan over an already fetched raw batch.
pub fn run_scan_once(config: &ScanConfig, raw_batch: &[RawRecord]) -> Result<ScanOutcome> {
    let clusters = YamlClusterRepository::new(&config.clusters_path).list()?;
    let store = JsonFileTrackedIds::load(&config.state_path);
    let mut pipeline = ScanPipeline::new(MatchEngine::default(), store, config.alert_threshold);
    Ok(pipeline.run_scan(raw_batch, &clusters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use govmatch_engine::FixedSemanticScorer;
    use std::path::Path;

    fn raw(notice_id: &str) -> RawRecord {
        RawRecord {
            notice_id: Some(notice_id.to_string()),
            title: Some("Enterprise IT Support Services".to_string()),
            naics_code: Some("541512".to_string()),
            set_aside: Some("Total Small Business Set-Aside".to_string()),
            department: Some("DEPT OF DEFENSE".to_string()),
            ..RawRecord::default()
        }
    }

    fn clusters_yaml() -> &'static str {
        r#"
clusters:
  - id: software
    name: Software Services
    naics_codes: ["541511", "541512"]
    certifications: ["Small Business", "8(a)"]
    capability_description: Custom software and IT support
    agency_preferences: ["Department of Defense"]
    created_at: 2026-01-15T00:00:00Z
"#
    }

    fn test_clusters(dir: &Path) -> Vec<CapabilityCluster> {
        let path = dir.join("clusters.yaml");
        fs::write(&path, clusters_yaml()).expect("write clusters");
        YamlClusterRepository::new(&path).list().expect("clusters")
    }

    fn pipeline_with(store: InMemoryTrackedIds) -> ScanPipeline<InMemoryTrackedIds> {
        // Fixed semantic score keeps run-to-run outputs bit-identical.
        let engine = MatchEngine::new(Box::new(FixedSemanticScorer(0.0)));
        ScanPipeline::new(engine, store, 50.0)
    }

    #[test]
    fn yaml_registry_parses_cluster_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clusters = test_clusters(dir.path());
        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert_eq!(cluster.id, "software");
        assert!(cluster.naics_codes.contains("541512"));
        assert!(cluster
            .certifications
            .contains(&govmatch_core::Certification::SmallBusiness));
        assert!(cluster.geo_preferences.is_empty());
    }

    #[test]
    fn rerunning_the_same_batch_alerts_nothing_new() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clusters = test_clusters(dir.path());
        let batch: Vec<RawRecord> = (1..=5).map(|i| raw(&format!("N-{i:03}"))).collect();
        let mut pipeline = pipeline_with(InMemoryTrackedIds::default());

        let first = pipeline.run_scan(&batch, &clusters);
        assert_eq!(first.run.total_fetched, 5);
        assert_eq!(first.run.total_scored, 5);
        assert_eq!(first.run.new_above_threshold, 5);
        assert_eq!(first.run.tracked_ids, 5);

        let second = pipeline.run_scan(&batch, &clusters);
        assert_eq!(second.run.new_above_threshold, 0);
        assert!(second.new_matches.is_empty());
        assert_eq!(second.run.tracked_ids, 5);
        assert_eq!(pipeline.history().len(), 2);
    }

    #[test]
    fn unnormalizable_records_are_dropped_without_aborting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clusters = test_clusters(dir.path());
        let batch = vec![raw("N-201"), RawRecord::default(), raw("N-202")];
        let mut pipeline = pipeline_with(InMemoryTrackedIds::default());

        let outcome = pipeline.run_scan(&batch, &clusters);
        assert_eq!(outcome.run.total_fetched, 3);
        assert_eq!(outcome.run.total_scored, 2);
        assert_eq!(outcome.dropped_records, 1);
    }

    #[test]
    fn scan_without_clusters_scores_nothing_above_threshold() {
        let mut pipeline = pipeline_with(InMemoryTrackedIds::default());
        let outcome = pipeline.run_scan(&[raw("N-301")], &[]);
        assert_eq!(outcome.run.total_scored, 1);
        assert_eq!(outcome.run.new_above_threshold, 0);
        // Unscored notices are still tracked as seen.
        assert_eq!(outcome.run.tracked_ids, 1);
    }

    #[test]
    fn file_store_round_trips_and_survives_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let mut store = JsonFileTrackedIds::load(&path);
        assert!(store.is_empty());
        store
            .add(&["A".to_string(), "B".to_string()])
            .expect("add");

        let reloaded = JsonFileTrackedIds::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("A"));
        assert!(!reloaded.contains("C"));

        fs::write(&path, "{not json").expect("corrupt");
        let fresh = JsonFileTrackedIds::load(&path);
        assert!(fresh.is_empty());
    }

    #[test]
    fn file_store_evicts_oldest_past_the_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonFileTrackedIds::load(dir.path().join("state.json"));
        let ids: Vec<String> = (0..MAX_TRACKED_IDS + 5).map(|i| format!("N-{i}")).collect();
        store.add(&ids).expect("add");

        assert_eq!(store.len(), MAX_TRACKED_IDS);
        assert!(!store.contains("N-0"));
        assert!(!store.contains("N-4"));
        assert!(store.contains("N-5"));
        assert!(store.contains(&format!("N-{}", MAX_TRACKED_IDS + 4)));
    }

    #[test]
    fn adding_duplicate_ids_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonFileTrackedIds::load(dir.path().join("state.json"));
        store.add(&["A".to_string()]).expect("add");
        store
            .add(&["A".to_string(), "B".to_string()])
            .expect("add again");
        assert_eq!(store.len(), 2);
    }

    struct FailingStore {
        inner: InMemoryTrackedIds,
    }

    impl TrackedIdStore for FailingStore {
        fn contains(&self, notice_id: &str) -> bool {
            self.inner.contains(notice_id)
        }

        fn add(&mut self, _ids: &[String]) -> Result<(), TrackerWriteFailure> {
            Err(TrackerWriteFailure {
                path: "/readonly/state.json".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn tracker_write_failure_still_returns_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clusters = test_clusters(dir.path());
        let engine = MatchEngine::new(Box::new(FixedSemanticScorer(0.0)));
        let store = FailingStore {
            inner: InMemoryTrackedIds::default(),
        };
        let mut pipeline = ScanPipeline::new(engine, store, 50.0);

        let outcome = pipeline.run_scan(&[raw("N-401")], &clusters);
        assert!(outcome.tracker_error.is_some());
        assert_eq!(outcome.run.new_above_threshold, 1);
        assert_eq!(outcome.new_matches.len(), 1);
    }
}

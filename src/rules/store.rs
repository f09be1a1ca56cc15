//! Atomic rule-set snapshots.
//!
//! # Design Decisions
//! - Readers never block: the whole rule table is replaced via an
//!   atomic pointer swap, so in-flight requests never observe a
//!   partially-updated rule set
//! - "Reload on every request" is an explicit staleness check against
//!   file modification times, not a re-run of initialization
//! - A failed reload keeps the current snapshot

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;

use crate::config::RulesConfig;
use crate::rules::cors::{build_cors_rules, CorsRule};
use crate::rules::hardcoded::{build_hardcoded_rules, HardcodedRule};
use crate::rules::{read_rule_entries, read_string_map, RuleFileError};

/// One immutable generation of the rule tables.
#[derive(Debug, Default)]
pub struct RuleSet {
    pub cors: Vec<CorsRule>,
    pub hardcoded: Vec<HardcodedRule>,
    pub services: HashMap<String, String>,
    stamps: Vec<(PathBuf, Option<SystemTime>)>,
}

impl RuleSet {
    fn is_stale(&self) -> bool {
        self.stamps
            .iter()
            .any(|(path, stamp)| mtime(path) != *stamp)
    }
}

fn mtime(path: &PathBuf) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Process-wide rule store shared by all request tasks.
#[derive(Debug)]
pub struct RuleStore {
    cors_path: Option<PathBuf>,
    hardcoded_path: Option<PathBuf>,
    services_path: Option<PathBuf>,
    reload_per_request: bool,
    current: ArcSwap<RuleSet>,
}

impl RuleStore {
    /// Load the initial snapshot. A missing or unparseable configured
    /// file fails startup; later reload failures keep the last good
    /// snapshot.
    pub fn new(config: &RulesConfig) -> Result<Self, RuleFileError> {
        let store = Self {
            cors_path: config.cors_file.clone(),
            hardcoded_path: config.hardcoded_file.clone(),
            services_path: config.service_rewrite_file.clone(),
            reload_per_request: config.reload_per_request,
            current: ArcSwap::from_pointee(RuleSet::default()),
        };
        let initial = store.load()?;
        store.current.store(Arc::new(initial));
        Ok(store)
    }

    /// Current snapshot, refreshed first when per-request reloading is
    /// enabled and a rule file changed on disk.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        if self.reload_per_request && self.current.load().is_stale() {
            self.reload();
        }
        self.current.load_full()
    }

    /// Load fresh tables and swap them in; on failure the current
    /// snapshot stays live.
    pub fn reload(&self) {
        match self.load() {
            Ok(fresh) => {
                tracing::info!(
                    cors_rules = fresh.cors.len(),
                    hardcoded_rules = fresh.hardcoded.len(),
                    service_rewrites = fresh.services.len(),
                    "Rule tables reloaded"
                );
                self.current.store(Arc::new(fresh));
            }
            Err(e) => {
                tracing::error!(error = %e, "Rule reload failed; keeping current tables");
            }
        }
    }

    /// The files a watcher should observe.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        [&self.cors_path, &self.hardcoded_path, &self.services_path]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    fn load(&self) -> Result<RuleSet, RuleFileError> {
        let mut stamps = Vec::new();

        let cors = match &self.cors_path {
            Some(path) => {
                stamps.push((path.clone(), mtime(path)));
                build_cors_rules(read_rule_entries(path)?)
            }
            None => Vec::new(),
        };

        let hardcoded = match &self.hardcoded_path {
            Some(path) => {
                stamps.push((path.clone(), mtime(path)));
                build_hardcoded_rules(read_rule_entries(path)?)
            }
            None => Vec::new(),
        };

        let services = match &self.services_path {
            Some(path) => {
                stamps.push((path.clone(), mtime(path)));
                read_string_map(path)?
            }
            None => HashMap::new(),
        };

        Ok(RuleSet {
            cors,
            hardcoded,
            services,
            stamps,
        })
    }
}

//! Rule-file watcher for hot reload.

use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::rules::store::RuleStore;

/// Watches the configured rule files and swaps in a fresh snapshot
/// whenever one of them changes.
pub struct RuleWatcher {
    store: Arc<RuleStore>,
}

impl RuleWatcher {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self { store }
    }

    /// Start watching the rule files in a background thread.
    ///
    /// The returned watcher must be kept alive for the watch to stay
    /// active.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let store = self.store.clone();
        let paths = self.store.watched_paths();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Rule file change detected, reloading...");
                        store.reload();
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        for path in &paths {
            watcher.watch(path, RecursiveMode::NonRecursive)?;
        }

        tracing::info!(files = paths.len(), "Rule watcher started");
        Ok(watcher)
    }
}

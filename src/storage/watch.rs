//! Custom-layer hot reload.
//!
//! Watches the `custom/` layer and rescans it after a debounce window, so
//! edits to skill folders register without a restart. The returned watcher
//! must be kept alive by the caller.

use crate::core::registry::SkillRegistry;
use crate::storage::SkillStore;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Start watching the custom layer; changes trigger a rescan.
pub fn spawn_custom_watcher(
    store: Arc<SkillStore>,
    registry: Arc<SkillRegistry>,
) -> notify::Result<RecommendedWatcher> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!("Watcher error: {}", e),
        }
    })?;

    let custom_dir = store.custom_dir();
    watcher.watch(&custom_dir, RecursiveMode::Recursive)?;
    info!("Watching {:?} for skill changes", custom_dir);

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // Let the burst of events from one save settle.
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}

            debug!("Custom layer changed, rescanning");
            let manifest = store.load_skills_from_dir(&store.custom_dir(), &registry);
            if !manifest.loaded.is_empty() {
                info!("Hot-reloaded {} skill(s)", manifest.loaded.len());
            }
        }
    });

    Ok(watcher)
}

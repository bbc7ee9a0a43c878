// Compose file watcher
//
// Watches the stacks directory and keeps the ComposeCache current without
// ever polling. Per-stack changes are debounced by 200ms so a save that
// touches multiple files (editor atomic-write-then-rename, `.env` plus
// compose file) produces one cache update and one broadcast trigger instead
// of a burst of them.

use crate::broadcast_engine::{BroadcastEngine, Channel};
use crate::compose_cache::ComposeCache;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

const DEBOUNCE: Duration = Duration::from_millis(200);

pub struct FileWatcher {
    // Held only to keep the underlying OS watch alive for the process lifetime.
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Start watching `stacks_dir`. Returns a handle that must be kept alive
    /// (dropping it stops the watch).
    pub fn start(
        stacks_dir: PathBuf,
        compose_cache: Arc<ComposeCache>,
        broadcast: BroadcastEngine,
    ) -> notify::Result<Self> {
        let pending: Arc<Mutex<HashMap<String, tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        // notify's callback runs on its own background thread, not a Tokio
        // worker, so `tokio::spawn` would panic with "there is no reactor
        // running". Capture the handle here, on the Tokio thread calling
        // `start`, and spawn through it from inside the callback instead.
        let rt_handle = tokio::runtime::Handle::current();

        let stacks_dir_for_events = stacks_dir.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(e) => e,
                Err(e) => {
                    warn!("File watcher error: {}", e);
                    return;
                }
            };

            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }

            for path in &event.paths {
                if let Some(stack) = stack_name_for_path(&stacks_dir_for_events, path) {
                    schedule_refresh(
                        &rt_handle,
                        stack,
                        stacks_dir_for_events.clone(),
                        compose_cache.clone(),
                        broadcast.clone(),
                        pending.clone(),
                    );
                }
            }
        })?;

        watcher.watch(&stacks_dir, RecursiveMode::Recursive)?;
        debug!("File watcher started on {}", stacks_dir.display());

        Ok(Self { _watcher: watcher })
    }
}

/// Map an arbitrary changed path back to the stack (first path segment under
/// the stacks root) it belongs to, if any.
fn stack_name_for_path(stacks_dir: &Path, changed: &Path) -> Option<String> {
    let relative = changed.strip_prefix(stacks_dir).ok()?;
    relative
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
}

fn schedule_refresh(
    rt_handle: &tokio::runtime::Handle,
    stack: String,
    stacks_dir: PathBuf,
    compose_cache: Arc<ComposeCache>,
    broadcast: BroadcastEngine,
    pending: Arc<Mutex<HashMap<String, tokio::task::JoinHandle<()>>>>,
) {
    rt_handle.spawn(async move {
        let mut guard = pending.lock().await;
        if let Some(existing) = guard.remove(&stack) {
            existing.abort();
        }

        let stack_for_task = stack.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            refresh_stack(&stack_for_task, &stacks_dir, &compose_cache).await;
            broadcast.mark_dirty_many(&[Channel::Stacks, Channel::Containers, Channel::Images]);
        });

        guard.insert(stack, handle);
    });
}

async fn refresh_stack(stack: &str, stacks_dir: &Path, compose_cache: &ComposeCache) {
    let stack_dir = stacks_dir.join(stack);

    if !stack_dir.is_dir() {
        compose_cache.delete(stack);
        return;
    }

    for name in crate::utils::constants::ACCEPTED_COMPOSE_FILE_NAMES {
        let candidate = stack_dir.join(name);
        if candidate.is_file() {
            match tokio::fs::read_to_string(&candidate).await {
                Ok(content) => {
                    let parsed = crate::compose_cache::parse_compose(&content);
                    compose_cache.update(stack, parsed);
                }
                Err(e) => error!("Failed to re-read {}: {}", candidate.display(), e),
            }
            return;
        }
    }

    // Directory exists but has no recognized compose file yet (e.g. still
    // being written). Leave any previously cached data in place.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_name_extracts_first_segment() {
        let root = Path::new("/stacks");
        assert_eq!(
            stack_name_for_path(root, Path::new("/stacks/blog/compose.yaml")),
            Some("blog".to_string())
        );
        assert_eq!(
            stack_name_for_path(root, Path::new("/stacks/blog/nested/file.txt")),
            Some("blog".to_string())
        );
        assert_eq!(stack_name_for_path(root, Path::new("/other/compose.yaml")), None);
    }
}

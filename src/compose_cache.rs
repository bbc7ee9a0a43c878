// Compose file cache
//
// A thread-safe projection of every compose file under the stacks root:
// service -> declared image, plus the handful of `dockge.*` labels the rest
// of the core reads off of services. Kept current by the file watcher;
// read on every broadcast, so the hot path must not allocate more than it
// has to.
//
// Parsing is intentionally line-based rather than a full YAML parse:
// compose files are hand-authored and shallow, and this cache must never
// panic on partial or invalid YAML while the user is still typing it in
// the editor.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::warn;

use crate::utils::constants::ACCEPTED_COMPOSE_FILE_NAMES;

/// Per-service data extracted from a compose file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ComposeServiceData {
    pub image: String,
    #[serde(rename = "statusIgnore")]
    pub status_ignore: bool,
    #[serde(rename = "imageUpdatesCheck")]
    pub image_updates_check: bool,
    /// `dockge.imageupdates.ignore` — if the registry digest matches this,
    /// UpdateChecker is told to report no update regardless of what it found.
    #[serde(rename = "imageUpdatesIgnoreDigest")]
    pub image_updates_ignore_digest: Option<String>,
}

impl ComposeServiceData {
    fn new() -> Self {
        Self {
            image: String::new(),
            status_ignore: false,
            image_updates_check: true,
            image_updates_ignore_digest: None,
        }
    }
}

type ServiceMap = HashMap<String, ComposeServiceData>;
type ImageMap = HashMap<String, String>;

/// Thread-safe stack -> service -> {compose data, image} projection.
pub struct ComposeCache {
    data: RwLock<HashMap<String, ServiceMap>>,
    images: RwLock<HashMap<String, ImageMap>>,
}

impl Default for ComposeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ComposeCache {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            images: RwLock::new(HashMap::new()),
        }
    }

    /// Scan one level of `root`, parse each subdirectory's compose file, and
    /// populate the cache. Errors reading individual stacks are logged and
    /// skipped, never fatal to the scan.
    pub async fn populate_from_disk(&self, root: &Path) {
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(e) => e,
            Err(e) => {
                warn!("ComposeCache: failed to read stacks root {}: {}", root.display(), e);
                return;
            }
        };

        let mut found = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().into_string().ok() else {
                continue;
            };
            found.push((name, path));
        }

        for (name, path) in found {
            if let Some(compose_path) = find_compose_file(&path) {
                match tokio::fs::read_to_string(&compose_path).await {
                    Ok(content) => {
                        let parsed = parse_compose(&content);
                        self.update(&name, parsed);
                    }
                    Err(e) => {
                        warn!("ComposeCache: failed to read {}: {}", compose_path.display(), e);
                    }
                }
            }
        }
    }

    /// Replace a stack's cached compose data and rebuild its image projection.
    pub fn update(&self, stack: &str, data: ServiceMap) {
        let mut images = HashMap::with_capacity(data.len());
        for (service, svc) in &data {
            if !svc.image.is_empty() {
                images.insert(service.clone(), svc.image.clone());
            }
        }

        self.data
            .write()
            .unwrap()
            .insert(stack.to_string(), data);
        self.images.write().unwrap().insert(stack.to_string(), images);
    }

    /// Remove a stack entirely (its directory disappeared).
    pub fn delete(&self, stack: &str) {
        self.data.write().unwrap().remove(stack);
        self.images.write().unwrap().remove(stack);
    }

    /// Zero-allocation read of a stack's service->image map. Callers must
    /// not mutate the borrowed map (enforced here by only exposing it
    /// through a closure).
    pub fn with_images<R>(&self, stack: &str, f: impl FnOnce(Option<&ImageMap>) -> R) -> R {
        let guard = self.images.read().unwrap();
        f(guard.get(stack))
    }

    /// Convenience clone of a stack's image map, for callers that need an
    /// owned value (e.g. to serialize into a JSON response).
    pub fn get_images(&self, stack: &str) -> ImageMap {
        self.images
            .read()
            .unwrap()
            .get(stack)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_service(&self, stack: &str, service: &str) -> Option<ComposeServiceData> {
        self.data
            .read()
            .unwrap()
            .get(stack)
            .and_then(|m| m.get(service))
            .cloned()
    }

    pub fn get_stack_services(&self, stack: &str) -> ServiceMap {
        self.data
            .read()
            .unwrap()
            .get(stack)
            .cloned()
            .unwrap_or_default()
    }

    /// All known stacks, for the update checker's full-sweep mode.
    pub fn stacks(&self) -> Vec<String> {
        self.data.read().unwrap().keys().cloned().collect()
    }

    /// Freshly allocated `stack -> service -> true` map of services with
    /// `dockge.status.ignore: "true"`, consumed once per broadcast by the
    /// stack-status aggregator.
    pub fn build_ignore_map(&self) -> HashMap<String, HashMap<String, bool>> {
        let data = self.data.read().unwrap();
        let mut out = HashMap::new();
        for (stack, services) in data.iter() {
            let mut ignored = HashMap::new();
            for (service, svc) in services {
                if svc.status_ignore {
                    ignored.insert(service.clone(), true);
                }
            }
            if !ignored.is_empty() {
                out.insert(stack.clone(), ignored);
            }
        }
        out
    }
}

fn find_compose_file(stack_dir: &Path) -> Option<std::path::PathBuf> {
    for name in ACCEPTED_COMPOSE_FILE_NAMES {
        let candidate = stack_dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Parse a compose file's text into service->data, without a full YAML
/// parser. Never panics — worst case it returns an empty map.
pub fn parse_compose(content: &str) -> ServiceMap {
    let service_re = Regex::new(r"^  (\S[^:]*):\s*$").unwrap();
    let image_re = Regex::new(r"^    image:\s*(.+?)\s*$").unwrap();
    let label_key_re = Regex::new(r"^      (\S[^:]*):\s*(.*?)\s*$").unwrap();
    let labels_block_re = Regex::new(r"^    labels:\s*$").unwrap();
    let top_level_re = Regex::new(r"^\S").unwrap();

    let mut services: ServiceMap = HashMap::new();
    let mut current_service: Option<String> = None;
    let mut in_services_block = false;
    let mut in_labels_block = false;

    for raw_line in content.lines() {
        // Strip a trailing comment conservatively: only when '#' is preceded
        // by whitespace, so values containing '#' (rare, but legal) survive.
        let line = raw_line;

        if top_level_re.is_match(line) {
            in_services_block = line.trim_end() == "services:";
            current_service = None;
            in_labels_block = false;
            continue;
        }

        if !in_services_block {
            continue;
        }

        if let Some(caps) = service_re.captures(line) {
            current_service = Some(caps[1].trim().trim_matches('"').trim_matches('\'').to_string());
            services
                .entry(current_service.clone().unwrap())
                .or_insert_with(ComposeServiceData::new);
            in_labels_block = false;
            continue;
        }

        let Some(ref service_name) = current_service else {
            continue;
        };

        if labels_block_re.is_match(line) {
            in_labels_block = true;
            continue;
        }

        if let Some(caps) = image_re.captures(line) {
            in_labels_block = false;
            if let Some(entry) = services.get_mut(service_name) {
                entry.image = unquote(caps[1].trim());
            }
            continue;
        }

        if in_labels_block {
            if let Some(caps) = label_key_re.captures(line) {
                let key = caps[1].trim();
                let value = unquote(caps[2].trim());
                if let Some(entry) = services.get_mut(service_name) {
                    match key {
                        "dockge.status.ignore" => {
                            entry.status_ignore = value.eq_ignore_ascii_case("true");
                        }
                        "dockge.imageupdates.check" => {
                            entry.image_updates_check = !value.eq_ignore_ascii_case("false");
                        }
                        "dockge.imageupdates.ignore" => {
                            entry.image_updates_ignore_digest = Some(value);
                        }
                        _ => {}
                    }
                }
            } else if line.trim().is_empty() {
                // blank line inside labels: stays in labels block
            } else if !line.starts_with("      ") {
                in_labels_block = false;
            }
        }
    }

    services
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
        {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_image_and_labels() {
        let yaml = "services:\n  web:\n    image: nginx:latest\n    labels:\n      dockge.status.ignore: \"true\"\n  maint:\n    image: alpine:3.19\n    labels:\n      dockge.imageupdates.check: \"false\"\n";
        let parsed = parse_compose(yaml);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["web"].image, "nginx:latest");
        assert!(parsed["web"].status_ignore);
        assert!(parsed["web"].image_updates_check);
        assert_eq!(parsed["maint"].image, "alpine:3.19");
        assert!(!parsed["maint"].image_updates_check);
    }

    #[test]
    fn never_panics_on_garbage() {
        let inputs = [
            "",
            "not yaml at all {{{",
            "services:\n  :\n",
            "services:\n  web:\n    image:\n",
            "\0\0\0binary-ish\0\0",
            "services:\n  web\n    image: x\n",
        ];
        for input in inputs {
            let _ = parse_compose(input);
        }
    }

    #[test]
    fn ignore_map_only_includes_ignored_services() {
        let cache = ComposeCache::new();
        let yaml = "services:\n  web:\n    image: nginx\n  maint:\n    image: alpine\n    labels:\n      dockge.status.ignore: \"true\"\n";
        cache.update("s1", parse_compose(yaml));

        let ignore_map = cache.build_ignore_map();
        assert!(ignore_map["s1"].contains_key("maint"));
        assert!(!ignore_map["s1"].contains_key("web"));
    }

    #[test]
    fn get_images_returns_only_services_with_image() {
        let cache = ComposeCache::new();
        let yaml = "services:\n  web:\n    image: nginx\n  nodata:\n";
        cache.update("s1", parse_compose(yaml));

        let images = cache.get_images("s1");
        assert_eq!(images.get("web"), Some(&"nginx".to_string()));
        assert!(!images.contains_key("nodata"));
    }

    #[test]
    fn delete_removes_both_maps() {
        let cache = ComposeCache::new();
        cache.update("s1", parse_compose("services:\n  web:\n    image: nginx\n"));
        assert!(!cache.get_images("s1").is_empty());
        cache.delete("s1");
        assert!(cache.get_images("s1").is_empty());
        assert!(cache.get_stack_services("s1").is_empty());
    }
}

// Stack status projection
//
// Turns live container state plus the compose cache's ignore map into a
// single status code for a stack. Kept as a pure function over a small,
// already-extracted summary of each container so it can be unit tested
// without a Docker daemon; the bollard-facing glue lives in `docker.rs`.

use crate::utils::constants::{
    CREATED_STACK, EXITED, RUNNING, RUNNING_AND_EXITED, UNHEALTHY, UNKNOWN,
};
use bollard::models::ContainerSummary;
use std::collections::HashMap;

/// The slice of a container's state this module cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    pub service: String,
    /// Docker's raw state: "running", "exited", "paused", "created", etc.
    pub state: String,
    /// Raw `status` string (e.g. "Up 3 hours (unhealthy)"), used only to
    /// detect a healthcheck verdict.
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerState {
    RunningHealthy,
    RunningUnhealthy,
    Exited,
    Other,
}

fn classify(snapshot: &ContainerSnapshot) -> ContainerState {
    let state = snapshot.state.to_lowercase();
    let status = snapshot.status.to_lowercase();

    match state.as_str() {
        "running" | "paused" => {
            if status.contains("(unhealthy)") {
                ContainerState::RunningUnhealthy
            } else {
                ContainerState::RunningHealthy
            }
        }
        "exited" | "dead" => ContainerState::Exited,
        _ => ContainerState::Other,
    }
}

/// Convert a stack's container list plus its ignore-map into a status code.
///
/// Ignored services (per `dockge.status.ignore`) are excluded from both the
/// running/exited tally and the unhealthy promotion, so a sidecar that is
/// expected to be unhealthy while warming up can't drag the whole stack's
/// badge to red.
pub fn aggregate_stack_status(
    containers: &[ContainerSnapshot],
    ignored_services: Option<&HashMap<String, bool>>,
) -> i32 {
    let relevant: Vec<&ContainerSnapshot> = containers
        .iter()
        .filter(|c| {
            !ignored_services
                .map(|m| m.get(&c.service).copied().unwrap_or(false))
                .unwrap_or(false)
        })
        .collect();

    if relevant.is_empty() {
        return if containers.is_empty() {
            CREATED_STACK
        } else {
            UNKNOWN
        };
    }

    let mut any_running = false;
    let mut any_exited = false;
    let mut any_unhealthy = false;
    let mut any_other = false;

    for snapshot in &relevant {
        match classify(snapshot) {
            ContainerState::RunningHealthy => any_running = true,
            ContainerState::RunningUnhealthy => {
                any_running = true;
                any_unhealthy = true;
            }
            ContainerState::Exited => any_exited = true,
            ContainerState::Other => any_other = true,
        }
    }

    if any_unhealthy {
        return UNHEALTHY;
    }
    if any_running && any_exited {
        return RUNNING_AND_EXITED;
    }
    if any_running {
        return RUNNING;
    }
    if any_exited {
        return EXITED;
    }
    if any_other {
        return UNKNOWN;
    }
    UNKNOWN
}

/// `recreateNecessary` (spec §4.E): true iff the container's running image
/// differs from the image declared for that service in the current compose
/// file. Either side being empty (service not in the cache yet, or the
/// container reports no image) suppresses the flag rather than flagging a
/// false positive.
pub fn recreate_necessary(running_image: &str, declared_image: &str) -> bool {
    !running_image.is_empty() && !declared_image.is_empty() && running_image != declared_image
}

/// Recover a service name from a container that lacks the compose service
/// label, using the `<project>-<service>-<index>` naming convention compose
/// falls back to when labels are stripped by an older compose version.
pub fn service_name_from_container_name(container_name: &str, project: &str) -> Option<String> {
    let trimmed = container_name.trim_start_matches('/');
    let rest = trimmed.strip_prefix(project)?.strip_prefix('-')?;
    // Strip a trailing "-<index>" if present.
    match rest.rsplit_once('-') {
        Some((service, idx)) if idx.chars().all(|c| c.is_ascii_digit()) => {
            Some(service.to_string())
        }
        _ => Some(rest.to_string()),
    }
}

/// Build per-container snapshots from a raw bollard listing, recovering the
/// service name from the compose label (or, failing that, the name
/// convention) so untagged legacy containers still participate in the
/// aggregation instead of silently vanishing.
pub fn snapshots_from_containers(
    containers: Vec<ContainerSummary>,
    project: &str,
) -> Vec<ContainerSnapshot> {
    containers
        .into_iter()
        .filter_map(|c| {
            let service = c
                .labels
                .as_ref()
                .and_then(|l| l.get("com.docker.compose.service"))
                .cloned()
                .or_else(|| {
                    c.names
                        .as_ref()
                        .and_then(|names| names.first())
                        .and_then(|n| service_name_from_container_name(n, project))
                })?;

            Some(ContainerSnapshot {
                service,
                state: c.state.unwrap_or_default(),
                status: c.status.unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(service: &str, state: &str, status: &str) -> ContainerSnapshot {
        ContainerSnapshot {
            service: service.to_string(),
            state: state.to_string(),
            status: status.to_string(),
        }
    }

    #[test]
    fn recreate_flips_on_image_mismatch() {
        assert!(recreate_necessary("nginx:1.24", "nginx:latest"));
    }

    #[test]
    fn recreate_is_false_on_match() {
        assert!(!recreate_necessary("nginx:1.24", "nginx:1.24"));
    }

    #[test]
    fn recreate_is_false_when_either_side_empty() {
        assert!(!recreate_necessary("", "nginx:latest"));
        assert!(!recreate_necessary("nginx:1.24", ""));
        assert!(!recreate_necessary("", ""));
    }

    #[test]
    fn all_running_is_running() {
        let containers = vec![snap("web", "running", "Up 2 hours"), snap("db", "running", "Up 2 hours")];
        assert_eq!(aggregate_stack_status(&containers, None), RUNNING);
    }

    #[test]
    fn all_exited_is_exited() {
        let containers = vec![snap("web", "exited", "Exited (0) 1 minute ago")];
        assert_eq!(aggregate_stack_status(&containers, None), EXITED);
    }

    #[test]
    fn mixed_running_and_exited() {
        let containers = vec![
            snap("web", "running", "Up 2 hours"),
            snap("migrate", "exited", "Exited (0) 1 hour ago"),
        ];
        assert_eq!(aggregate_stack_status(&containers, None), RUNNING_AND_EXITED);
    }

    #[test]
    fn unhealthy_promotes_over_everything() {
        let containers = vec![
            snap("web", "running", "Up 2 hours (unhealthy)"),
            snap("db", "running", "Up 2 hours (healthy)"),
        ];
        assert_eq!(aggregate_stack_status(&containers, None), UNHEALTHY);
    }

    #[test]
    fn ignored_service_excluded_from_unhealthy_promotion() {
        let containers = vec![
            snap("web", "running", "Up 2 hours (healthy)"),
            snap("flaky-sidecar", "running", "Up 2 hours (unhealthy)"),
        ];
        let mut ignored = HashMap::new();
        ignored.insert("flaky-sidecar".to_string(), true);
        assert_eq!(aggregate_stack_status(&containers, Some(&ignored)), RUNNING);
    }

    #[test]
    fn paused_counts_as_running() {
        let containers = vec![snap("web", "paused", "Paused")];
        assert_eq!(aggregate_stack_status(&containers, None), RUNNING);
    }

    #[test]
    fn no_containers_is_created_stack() {
        let containers: Vec<ContainerSnapshot> = vec![];
        assert_eq!(aggregate_stack_status(&containers, None), CREATED_STACK);
    }

    #[test]
    fn all_ignored_is_unknown_not_created_stack() {
        let containers = vec![snap("sidecar", "running", "Up")];
        let mut ignored = HashMap::new();
        ignored.insert("sidecar".to_string(), true);
        assert_eq!(aggregate_stack_status(&containers, Some(&ignored)), UNKNOWN);
    }

    #[test]
    fn recovers_service_name_from_container_naming_convention() {
        assert_eq!(
            service_name_from_container_name("/myapp-web-1", "myapp"),
            Some("web".to_string())
        );
        assert_eq!(
            service_name_from_container_name("/unrelated", "myapp"),
            None
        );
    }
}

//! Docker Engine API reads (Bollard)
//!
//! Compose orchestration (up/down/restart/logs/exec) lives on `Stack` in
//! `stack.rs`, which shells out to the `docker compose` CLI directly and
//! drives it through `Terminal::exec`/`Terminal::start`. This module covers
//! only the read side that goes through the Docker Engine API instead:
//! container/network listing used by the broadcast engine's `containers`
//! and `networks` view channels.

use anyhow::{Context, Result};
use bollard::container::ListContainersOptions;
use bollard::errors::Error as BollardError;
use bollard::models::ContainerSummary;
use bollard::network::ListNetworksOptions;
use bollard::Docker;
use std::collections::HashMap;

/// Extension trait for converting bollard errors to anyhow::Result
pub trait BollardResultExt<T> {
    fn docker_context(self, context: &str) -> Result<T>;
}

impl<T> BollardResultExt<T> for Result<T, BollardError> {
    fn docker_context(self, context: &str) -> Result<T> {
        self.map_err(|e| match e {
            BollardError::DockerResponseServerError {
                status_code,
                message,
            } => {
                anyhow::anyhow!(
                    "{} - Docker API error ({}): {}",
                    context,
                    status_code,
                    message
                )
            }
            _ => anyhow::anyhow!("{}: {}", context, e),
        })
        .with_context(|| format!("Docker operation failed: {}", context))
    }
}

/// List Docker networks
pub async fn list_networks(docker: &Docker) -> Result<Vec<String>> {
    let networks = docker
        .list_networks(None::<ListNetworksOptions<String>>)
        .await
        .docker_context("Failed to list Docker networks")?;

    let network_names: Vec<String> = networks.into_iter().filter_map(|n| n.name).collect();

    Ok(network_names)
}

/// List containers for a Docker Compose project
pub async fn list_containers_by_project(
    docker: &Docker,
    project_name: &str,
) -> Result<Vec<ContainerSummary>> {
    let mut filters = HashMap::new();
    filters.insert(
        "label".to_string(),
        vec![format!("com.docker.compose.project={}", project_name)],
    );

    let options = ListContainersOptions {
        all: true,
        filters,
        ..Default::default()
    };

    docker
        .list_containers(Some(options))
        .await
        .docker_context(&format!(
            "Failed to list containers for project {}",
            project_name
        ))
}

/// Map each container's compose service name to the image it's actually
/// running, for the `recreateNecessary` comparison against the compose
/// cache's declared image (spec §4.E).
pub fn extract_container_images(containers: &[ContainerSummary]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for container in containers {
        let service = container
            .labels
            .as_ref()
            .and_then(|labels| labels.get("com.docker.compose.service"))
            .cloned();
        if let (Some(service), Some(image)) = (service, container.image.clone()) {
            out.insert(service, image);
        }
    }
    out
}

/// Prune dangling (or, if `all`, all unused) images, the last step of
/// `updateStack` (pull → up if running → image prune).
pub async fn prune_images(docker: &Docker, all: bool) -> Result<()> {
    use bollard::image::PruneImagesOptions;

    let mut filters = HashMap::new();
    if !all {
        filters.insert("dangling".to_string(), vec!["true".to_string()]);
    }

    docker
        .prune_images(Some(PruneImagesOptions { filters }))
        .await
        .docker_context("Failed to prune images")?;

    Ok(())
}

/// Map container summary to ServiceStatus
pub fn map_to_service_status(
    containers: Vec<ContainerSummary>,
) -> HashMap<String, crate::stack::ServiceStatus> {
    let mut status_map = HashMap::new();

    for container in containers {
        // Extract service name from label
        let service_name = container
            .labels
            .as_ref()
            .and_then(|labels| labels.get("com.docker.compose.service"))
            .map(|s| s.to_string());

        if let Some(service) = service_name {
            // Determine state (prefer Status over State for health info)
            let state = if let Some(status) = container.status.as_ref() {
                status.clone()
            } else if let Some(state) = container.state.as_ref() {
                state.clone()
            } else {
                "unknown".to_string()
            };

            // Extract port mappings
            let ports: Vec<String> = container
                .ports
                .unwrap_or_default()
                .iter()
                .filter_map(|p| {
                    p.public_port
                        .map(|public| format!("{}:{}", public, p.private_port))
                })
                .collect();

            status_map.insert(service, crate::stack::ServiceStatus { state, ports });
        }
    }

    status_map
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::Port;

    #[test]
    fn test_extract_container_images_maps_service_to_image() {
        let mut labels = HashMap::new();
        labels.insert(
            "com.docker.compose.service".to_string(),
            "web".to_string(),
        );
        let container = ContainerSummary {
            labels: Some(labels),
            image: Some("nginx:1.24".to_string()),
            ..Default::default()
        };

        let result = extract_container_images(&[container]);
        assert_eq!(result.get("web"), Some(&"nginx:1.24".to_string()));
    }

    #[test]
    fn test_extract_container_images_skips_unlabeled() {
        let container = ContainerSummary {
            image: Some("nginx:1.24".to_string()),
            ..Default::default()
        };
        assert!(extract_container_images(&[container]).is_empty());
    }

    #[test]
    fn test_map_to_service_status_extracts_service_label() {
        let mut labels = HashMap::new();
        labels.insert(
            "com.docker.compose.service".to_string(),
            "web".to_string(),
        );

        let container = ContainerSummary {
            labels: Some(labels),
            status: Some("Up 2 minutes".to_string()),
            ports: Some(vec![Port {
                private_port: 80,
                public_port: Some(8080),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let result = map_to_service_status(vec![container]);
        let status = result.get("web").expect("web service present");
        assert_eq!(status.state, "Up 2 minutes");
        assert_eq!(status.ports, vec!["8080:80".to_string()]);
    }

    #[test]
    fn test_map_to_service_status_skips_unlabeled_containers() {
        let container = ContainerSummary {
            labels: None,
            ..Default::default()
        };

        let result = map_to_service_status(vec![container]);
        assert!(result.is_empty());
    }
}

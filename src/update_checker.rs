// Background image update checker
//
// Walks every service in the ComposeCache, compares its locally pulled image
// digest against the registry's current digest for the same tag, and
// persists the verdict via ImageUpdateStore. Concurrency is capped so a
// stack list with fifty services doesn't open fifty simultaneous registry
// connections; each registry call gets its own timeout so one unreachable
// mirror can't stall the whole sweep.

use anyhow::{Context, Result};
use bollard::Docker;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::broadcast_engine::{BroadcastEngine, Channel};
use crate::compose_cache::ComposeCache;
use crate::db::models::{ImageUpdate, ImageUpdateStore};

const MAX_CONCURRENT_CHECKS: usize = 3;
const REGISTRY_TIMEOUT: Duration = Duration::from_secs(15);
const INITIAL_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct UpdateChecker {
    docker: Arc<Docker>,
    compose_cache: Arc<ComposeCache>,
    store: ImageUpdateStore,
    broadcast_engine: BroadcastEngine,
}

impl UpdateChecker {
    pub fn new(
        docker: Arc<Docker>,
        compose_cache: Arc<ComposeCache>,
        store: ImageUpdateStore,
        broadcast_engine: BroadcastEngine,
    ) -> Self {
        Self {
            docker,
            compose_cache,
            store,
            broadcast_engine,
        }
    }

    /// Run one full sweep across every cached stack/service.
    pub async fn check_all(&self, pool: &SqlitePool) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CHECKS));
        let mut handles = Vec::new();

        for stack in self.compose_cache.stacks() {
            for (service, data) in self.compose_cache.get_stack_services(&stack) {
                if !data.image_updates_check || data.image.is_empty() {
                    continue;
                }

                let permit = semaphore.clone();
                let docker = self.docker.clone();
                let pool = pool.clone();
                let stack = stack.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = permit.acquire_owned().await.ok();
                    check_one(&docker, &pool, &stack, &service, &data.image, data.image_updates_ignore_digest.as_deref()).await
                }));
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Update check task panicked: {}", e);
            }
        }

        self.store.refresh(pool).await?;
        self.broadcast_engine
            .mark_dirty_many(&[Channel::Updates, Channel::Stacks, Channel::Containers]);
        Ok(())
    }

    /// Check a single stack's services immediately (manual `checkImageUpdates`).
    pub async fn check_stack(&self, pool: &SqlitePool, stack: &str) -> Result<()> {
        for (service, data) in self.compose_cache.get_stack_services(stack) {
            if !data.image_updates_check || data.image.is_empty() {
                continue;
            }
            check_one(
                &self.docker,
                pool,
                stack,
                &service,
                &data.image,
                data.image_updates_ignore_digest.as_deref(),
            )
            .await;
        }
        self.store.refresh(pool).await?;
        Ok(())
    }

    /// Spawn the periodic sweep: an initial delay, then every
    /// `interval_hours`.
    pub fn spawn(self, pool: SqlitePool, interval_hours: u64) {
        tokio::spawn(async move {
            tokio::time::sleep(INITIAL_DELAY).await;

            loop {
                info!("Running scheduled image update check");
                if let Err(e) = self.check_all(&pool).await {
                    warn!("Image update sweep failed: {}", e);
                }

                tokio::time::sleep(Duration::from_secs(interval_hours.max(1) * 3600)).await;
            }
        });
    }
}

async fn check_one(
    docker: &Docker,
    pool: &SqlitePool,
    stack: &str,
    service: &str,
    image_ref: &str,
    ignore_digest: Option<&str>,
) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let local_digest = local_image_digest(docker, image_ref).await;
    let remote_digest = match tokio::time::timeout(REGISTRY_TIMEOUT, fetch_remote_digest(image_ref)).await {
        Ok(Ok(d)) => Some(d),
        Ok(Err(e)) => {
            debug!("Registry digest lookup failed for {}: {}", image_ref, e);
            None
        }
        Err(_) => {
            debug!("Registry digest lookup timed out for {}", image_ref);
            None
        }
    };

    let has_update = match (&local_digest, &remote_digest) {
        (Some(local), Some(remote)) => {
            let differs = local != remote;
            let ignored = ignore_digest.map(|d| d == remote).unwrap_or(false);
            differs && !ignored
        }
        _ => false,
    };

    if let Err(e) = ImageUpdate::upsert(
        pool,
        stack,
        service,
        image_ref,
        local_digest.as_deref(),
        remote_digest.as_deref(),
        has_update,
        now,
    )
    .await
    {
        warn!("Failed to persist image update for {}/{}: {}", stack, service, e);
    }
}

async fn local_image_digest(docker: &Docker, image_ref: &str) -> Option<String> {
    let inspect = docker.inspect_image(image_ref).await.ok()?;
    let digests = inspect.repo_digests?;
    digests
        .first()
        .and_then(|d| d.split('@').nth(1))
        .map(|s| s.to_string())
}

/// Parsed reference: registry host, repository path, and tag.
struct ParsedRef {
    registry: String,
    repository: String,
    tag: String,
}

fn parse_image_ref(image_ref: &str) -> ParsedRef {
    let (name, tag) = match image_ref.rsplit_once(':') {
        // Guard against a port number in the registry host being mistaken
        // for a tag separator (e.g. "myregistry.local:5000/app").
        Some((n, t)) if !t.contains('/') => (n.to_string(), t.to_string()),
        _ => (image_ref.to_string(), "latest".to_string()),
    };

    let mut parts = name.splitn(2, '/');
    let first = parts.next().unwrap_or_default();
    let rest = parts.next();

    let looks_like_host = first.contains('.') || first.contains(':') || first == "localhost";

    let (registry, repository) = match rest {
        Some(rest) if looks_like_host => (first.to_string(), rest.to_string()),
        Some(_) => ("registry-1.docker.io".to_string(), name.clone()),
        None => ("registry-1.docker.io".to_string(), format!("library/{}", name)),
    };

    ParsedRef {
        registry,
        repository,
        tag,
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

async fn fetch_remote_digest(image_ref: &str) -> Result<String> {
    let parsed = parse_image_ref(image_ref);
    let client = reqwest::Client::builder().timeout(REGISTRY_TIMEOUT).build()?;

    let manifest_url = format!(
        "https://{}/v2/{}/manifests/{}",
        parsed.registry, parsed.repository, parsed.tag
    );

    let accept = "application/vnd.docker.distribution.manifest.v2+json, application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.list.v2+json";

    let first = client
        .head(&manifest_url)
        .header("Accept", accept)
        .send()
        .await
        .context("registry HEAD request failed")?;

    let response = if first.status() == reqwest::StatusCode::UNAUTHORIZED {
        let auth_header = first
            .headers()
            .get("www-authenticate")
            .context("registry returned 401 with no WWW-Authenticate header")?
            .to_str()
            .context("non-utf8 WWW-Authenticate header")?
            .to_string();

        let token = fetch_bearer_token(&client, &auth_header).await?;

        client
            .head(&manifest_url)
            .header("Accept", accept)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .context("authenticated registry HEAD request failed")?
    } else {
        first
    };

    if !response.status().is_success() {
        anyhow::bail!("registry responded with status {}", response.status());
    }

    response
        .headers()
        .get("docker-content-digest")
        .context("registry response missing Docker-Content-Digest header")?
        .to_str()
        .context("non-utf8 digest header")
        .map(|s| s.to_string())
}

/// Parse a `Bearer realm="...",service="...",scope="..."` header and fetch a
/// token from the realm, the same dance GHCR and Docker Hub both require.
async fn fetch_bearer_token(client: &reqwest::Client, www_authenticate: &str) -> Result<String> {
    let params = www_authenticate
        .trim_start_matches("Bearer ")
        .split(',')
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((key.trim().to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect::<std::collections::HashMap<_, _>>();

    let realm = params.get("realm").context("missing realm in WWW-Authenticate")?;
    let mut url = reqwest::Url::parse(realm)?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(service) = params.get("service") {
            query.append_pair("service", service);
        }
        if let Some(scope) = params.get("scope") {
            query.append_pair("scope", scope);
        }
    }

    let token_response: TokenResponse = client
        .get(url)
        .send()
        .await
        .context("token request failed")?
        .json()
        .await
        .context("token response was not JSON")?;

    token_response
        .token
        .or(token_response.access_token)
        .context("token response missing token/access_token")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_official_docker_hub_image() {
        let parsed = parse_image_ref("nginx:1.27");
        assert_eq!(parsed.registry, "registry-1.docker.io");
        assert_eq!(parsed.repository, "library/nginx");
        assert_eq!(parsed.tag, "1.27");
    }

    #[test]
    fn parses_namespaced_docker_hub_image_with_no_tag() {
        let parsed = parse_image_ref("grafana/grafana");
        assert_eq!(parsed.registry, "registry-1.docker.io");
        assert_eq!(parsed.repository, "grafana/grafana");
        assert_eq!(parsed.tag, "latest");
    }

    #[test]
    fn parses_ghcr_image() {
        let parsed = parse_image_ref("ghcr.io/kyeotic/dockge:1.5.0");
        assert_eq!(parsed.registry, "ghcr.io");
        assert_eq!(parsed.repository, "kyeotic/dockge");
        assert_eq!(parsed.tag, "1.5.0");
    }

    #[test]
    fn parses_private_registry_with_port() {
        let parsed = parse_image_ref("registry.internal:5000/team/app:v2");
        assert_eq!(parsed.registry, "registry.internal:5000");
        assert_eq!(parsed.repository, "team/app");
        assert_eq!(parsed.tag, "v2");
    }

    #[test]
    fn bearer_token_params_parse() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#;
        assert!(header.contains("realm="));
    }
}

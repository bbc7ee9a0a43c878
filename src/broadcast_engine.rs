// Reactive broadcast engine
//
// Six independently-dirtied view channels (stacks, containers, networks,
// images, volumes, updates) coalesced onto a single background task. A
// handler marks a channel dirty and wakes the task; the task renders and
// emits every dirty channel exactly once, however many times it was marked
// dirty in between. There is no polling loop anywhere in this module — the
// only timer is the scheduled update checker, which is a different
// component entirely.

use crate::server::ServerContext;
use crate::socket_handlers::broadcast_to_authenticated;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stacks,
    Containers,
    Networks,
    Images,
    Volumes,
    Updates,
}

impl Channel {
    const ALL: [Channel; 6] = [
        Channel::Stacks,
        Channel::Containers,
        Channel::Networks,
        Channel::Images,
        Channel::Volumes,
        Channel::Updates,
    ];

    fn event_name(self) -> &'static str {
        match self {
            Channel::Stacks => "stackList",
            Channel::Containers => "containerList",
            Channel::Networks => "dockerNetworkList",
            Channel::Images => "imageList",
            Channel::Volumes => "volumeList",
            Channel::Updates => "imageUpdateList",
        }
    }

    fn index(self) -> usize {
        Channel::ALL.iter().position(|c| *c == self).unwrap()
    }
}

struct Flags([AtomicBool; 6]);

impl Flags {
    fn new() -> Self {
        Self(std::array::from_fn(|_| AtomicBool::new(false)))
    }

    fn mark(&self, channel: Channel) {
        self.0[channel.index()].store(true, Ordering::Release);
    }

    fn take(&self, channel: Channel) -> bool {
        self.0[channel.index()].swap(false, Ordering::AcqRel)
    }
}

/// The reactive broadcast engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct BroadcastEngine {
    flags: Arc<Flags>,
    notify: Arc<tokio::sync::Notify>,
}

impl Default for BroadcastEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastEngine {
    pub fn new() -> Self {
        Self {
            flags: Arc::new(Flags::new()),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Mark a channel dirty and wake the render loop. Safe to call from any
    /// task; coalesces naturally if called many times before the loop wakes.
    pub fn mark_dirty(&self, channel: Channel) {
        self.flags.mark(channel);
        self.notify.notify_one();
    }

    pub fn mark_dirty_many(&self, channels: &[Channel]) {
        for channel in channels {
            self.flags.mark(*channel);
        }
        self.notify.notify_one();
    }

    /// Spawn the background render loop. Runs until the process exits.
    pub fn spawn(self, ctx: Arc<ServerContext>) {
        tokio::spawn(async move {
            loop {
                self.notify.notified().await;

                for channel in Channel::ALL {
                    if self.flags.take(channel) {
                        if let Err(e) = render_and_broadcast(&ctx, channel).await {
                            error!("Broadcast render failed for {:?}: {}", channel, e);
                        }
                    }
                }
            }
        });
    }
}

async fn render_and_broadcast(ctx: &ServerContext, channel: Channel) -> anyhow::Result<()> {
    let has_clients = ctx.io.sockets().map(|s| !s.is_empty()).unwrap_or(false);
    if !has_clients {
        debug!("No connected clients, skipping {:?} render", channel);
        return Ok(());
    }

    let payload = match channel {
        Channel::Stacks => render_stacks(ctx).await?,
        Channel::Containers => render_containers(ctx).await?,
        Channel::Networks => render_networks(ctx).await?,
        Channel::Images => render_images(ctx),
        Channel::Volumes => render_volumes(ctx).await?,
        Channel::Updates => render_updates(ctx).await?,
    };

    broadcast_to_authenticated(&ctx.io, channel.event_name(), payload);
    Ok(())
}

async fn render_stacks(ctx: &ServerContext) -> anyhow::Result<serde_json::Value> {
    use crate::stack::Stack;

    let ctx_arc = Arc::new(ctx.clone());
    let stack_list = Stack::get_stack_list(ctx_arc, String::new(), true).await?;

    let ignore_map = ctx.compose_cache.build_ignore_map();
    let mut map = HashMap::new();
    for (name, mut stack) in stack_list {
        stack
            .refine_status_with_health(&ctx.docker, ignore_map.get(&name))
            .await;
        map.insert(name, serde_json::to_value(stack.to_simple_json().await)?);
    }

    Ok(json!({ "ok": true, "stackList": map }))
}

async fn render_containers(ctx: &ServerContext) -> anyhow::Result<serde_json::Value> {
    use crate::stack::Stack;
    use crate::stack_model::recreate_necessary;

    let ctx_arc = Arc::new(ctx.clone());
    let stack_list = Stack::get_stack_list(ctx_arc, String::new(), true).await?;

    let mut map = HashMap::new();
    for (name, stack) in stack_list {
        let is_managed = stack.to_simple_json().await.is_managed_by_dockge;

        let containers = crate::docker::list_containers_by_project(&ctx.docker, &name)
            .await
            .unwrap_or_default();
        let declared_images = ctx.compose_cache.get_images(&name);
        let running_images = crate::docker::extract_container_images(&containers);
        let statuses = crate::docker::map_to_service_status(containers);

        let mut enriched = HashMap::new();
        for (service, status) in statuses {
            let running_image = running_images.get(&service).cloned().unwrap_or_default();
            let declared_image = declared_images.get(&service).cloned().unwrap_or_default();
            enriched.insert(
                service.clone(),
                json!({
                    "state": status.state,
                    "ports": status.ports,
                    "recreateNecessary": recreate_necessary(&running_image, &declared_image),
                    "imageUpdatesAvailable": ctx.image_update_store.service_has_update(&name, &service),
                    "isManagedByDockge": is_managed,
                }),
            );
        }

        map.insert(name, json!(enriched));
    }

    Ok(json!({ "ok": true, "containerList": map }))
}

async fn render_networks(ctx: &ServerContext) -> anyhow::Result<serde_json::Value> {
    let networks = crate::docker::list_networks(&ctx.docker).await?;
    Ok(json!({ "ok": true, "dockerNetworkList": networks }))
}

fn render_images(ctx: &ServerContext) -> serde_json::Value {
    let mut map = HashMap::new();
    for stack in ctx.compose_cache.stacks() {
        map.insert(stack.clone(), ctx.compose_cache.get_images(&stack));
    }
    json!({ "ok": true, "imageList": map })
}

async fn render_volumes(ctx: &ServerContext) -> anyhow::Result<serde_json::Value> {
    use bollard::volume::ListVolumesOptions;
    let volumes = ctx
        .docker
        .list_volumes(None::<ListVolumesOptions<String>>)
        .await?;
    let names: Vec<String> = volumes
        .volumes
        .unwrap_or_default()
        .into_iter()
        .map(|v| v.name)
        .collect();
    Ok(json!({ "ok": true, "volumeList": names }))
}

async fn render_updates(ctx: &ServerContext) -> anyhow::Result<serde_json::Value> {
    let updates = crate::db::models::ImageUpdate::all_with_updates(&ctx.db).await?;
    Ok(json!({ "ok": true, "imageUpdateList": updates }))
}

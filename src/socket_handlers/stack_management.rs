use crate::broadcast_engine::Channel;
use crate::server::ServerContext;
use crate::socket_handlers::{callback_error, callback_ok, check_login, get_endpoint};
use crate::stack::{ServiceStatus, Stack};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use socketioxide::extract::{AckSender, Data, SocketRef};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Parse a client arg array of `[stackName, serviceName]`, the shape every
/// per-service handler (`startService`, `stopService`, `restartService`,
/// `updateService`) takes.
fn parse_stack_service_args(data: &Value) -> Result<(String, String)> {
    let args = data
        .as_array()
        .ok_or_else(|| anyhow!("Expected array of arguments"))?;
    if args.len() < 2 {
        return Err(anyhow!(
            "expected 2 arguments: stackName, serviceName"
        ));
    }
    let stack_name = args[0]
        .as_str()
        .ok_or_else(|| anyhow!("stackName must be a string"))?
        .to_string();
    let service_name = args[1]
        .as_str()
        .ok_or_else(|| anyhow!("serviceName must be a string"))?
        .to_string();
    Ok((stack_name, service_name))
}

#[derive(Debug, Deserialize)]
struct DeployStackData {
    name: String,
    #[serde(rename = "composeYAML")]
    compose_yaml: String,
    #[serde(rename = "composeENV")]
    compose_env: String,
    #[serde(rename = "composeOverrideYAML", default)]
    compose_override_yaml: String,
    #[serde(rename = "isAdd")]
    is_add: bool,
}

#[derive(Debug, Deserialize)]
struct SaveStackData {
    name: String,
    #[serde(rename = "composeYAML")]
    compose_yaml: String,
    #[serde(rename = "composeENV")]
    compose_env: String,
    #[serde(rename = "composeOverrideYAML", default)]
    compose_override_yaml: String,
    #[serde(rename = "isAdd")]
    is_add: bool,
}

/// Setup stack management event handlers
pub fn setup_stack_handlers(socket: SocketRef, ctx: Arc<ServerContext>) {
    // deployStack
    let ctx_clone = ctx.clone();
    socket.on(
        "deployStack",
        move |socket: SocketRef, Data::<DeployStackData>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_deploy_stack(&socket, &ctx, data).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Deployed", true);
                        broadcast_stack_list(&ctx).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // saveStack
    let ctx_clone = ctx.clone();
    socket.on(
        "saveStack",
        move |socket: SocketRef, Data::<SaveStackData>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_save_stack(&socket, &ctx, data).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Saved", true);
                        broadcast_stack_list(&ctx).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // deleteStack
    let ctx_clone = ctx.clone();
    socket.on(
        "deleteStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_delete_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Deleted", true);
                        broadcast_stack_list(&ctx).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // getStack
    let ctx_clone = ctx.clone();
    socket.on(
        "getStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_get_stack(&socket, &ctx, &stack_name).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // requestStackList
    let ctx_clone = ctx.clone();
    socket.on(
        "requestStackList",
        move |socket: SocketRef, ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                if check_login(&socket).is_ok() {
                    broadcast_stack_list(&ctx).await;
                    callback_ok(Some(ack), "Updated", true);
                }
            });
        },
    );

    // startStack
    let ctx_clone = ctx.clone();
    socket.on(
        "startStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_start_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Started", true);
                        broadcast_stack_list(&ctx).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // stopStack
    let ctx_clone = ctx.clone();
    socket.on(
        "stopStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_stop_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Stopped", true);
                        broadcast_stack_list(&ctx).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // restartStack
    let ctx_clone = ctx.clone();
    socket.on(
        "restartStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_restart_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Restarted", true);
                        broadcast_stack_list(&ctx).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // updateStack
    let ctx_clone = ctx.clone();
    socket.on(
        "updateStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_update_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Updated", true);
                        broadcast_stack_list(&ctx).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // downStack
    let ctx_clone = ctx.clone();
    socket.on(
        "downStack",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_down_stack(&socket, &ctx, &stack_name).await {
                    Ok(_) => {
                        callback_ok(Some(ack), "Downed", true);
                        broadcast_stack_list(&ctx).await;
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // serviceStatusList
    let ctx_clone = ctx.clone();
    socket.on(
        "serviceStatusList",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_service_status_list(&socket, &ctx, &stack_name).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // getDockerNetworkList
    let ctx_clone = ctx.clone();
    socket.on(
        "getDockerNetworkList",
        move |socket: SocketRef, ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_get_docker_network_list(&socket, &ctx).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // checkImageUpdates
    let ctx_clone = ctx.clone();
    socket.on(
        "checkImageUpdates",
        move |socket: SocketRef, Data::<String>(stack_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_check_image_updates(&socket, &ctx, &stack_name).await {
                    Ok(_) => callback_ok(Some(ack), "Checked", true),
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // containerInspect
    let ctx_clone = ctx.clone();
    socket.on(
        "containerInspect",
        move |socket: SocketRef, Data::<String>(container_name), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match handle_container_inspect(&socket, &ctx, &container_name).await {
                    Ok(response) => {
                        ack.send(&response).ok();
                    }
                    Err(e) => callback_error(Some(ack), e),
                };
            });
        },
    );

    // startService
    let ctx_clone = ctx.clone();
    socket.on(
        "startService",
        move |socket: SocketRef, Data::<Value>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match parse_stack_service_args(&data) {
                    Ok((stack_name, service_name)) => {
                        match handle_start_service(&socket, &ctx, &stack_name, &service_name).await {
                            Ok(_) => {
                                callback_ok(Some(ack), "Started", true);
                                broadcast_stack_list(&ctx).await;
                            }
                            Err(e) => callback_error(Some(ack), e),
                        }
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // stopService
    let ctx_clone = ctx.clone();
    socket.on(
        "stopService",
        move |socket: SocketRef, Data::<Value>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match parse_stack_service_args(&data) {
                    Ok((stack_name, service_name)) => {
                        match handle_stop_service(&socket, &ctx, &stack_name, &service_name).await {
                            Ok(_) => {
                                callback_ok(Some(ack), "Stopped", true);
                                broadcast_stack_list(&ctx).await;
                            }
                            Err(e) => callback_error(Some(ack), e),
                        }
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // restartService
    let ctx_clone = ctx.clone();
    socket.on(
        "restartService",
        move |socket: SocketRef, Data::<Value>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match parse_stack_service_args(&data) {
                    Ok((stack_name, service_name)) => {
                        match handle_restart_service(&socket, &ctx, &stack_name, &service_name).await {
                            Ok(_) => {
                                callback_ok(Some(ack), "Restarted", true);
                                broadcast_stack_list(&ctx).await;
                            }
                            Err(e) => callback_error(Some(ack), e),
                        }
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );

    // updateService
    let ctx_clone = ctx.clone();
    socket.on(
        "updateService",
        move |socket: SocketRef, Data::<Value>(data), ack: AckSender| {
            let ctx = ctx_clone.clone();
            tokio::spawn(async move {
                match parse_stack_service_args(&data) {
                    Ok((stack_name, service_name)) => {
                        match handle_update_service(&socket, &ctx, &stack_name, &service_name).await {
                            Ok(_) => {
                                callback_ok(Some(ack), "Updated", true);
                                broadcast_stack_list(&ctx).await;
                            }
                            Err(e) => callback_error(Some(ack), e),
                        }
                    }
                    Err(e) => callback_error(Some(ack), e),
                }
            });
        },
    );
}

async fn handle_deploy_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    data: DeployStackData,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let mut stack = Stack::new_with_content(
        ctx.clone().into(),
        data.name.clone(),
        endpoint,
        data.compose_yaml,
        data.compose_env,
        data.compose_override_yaml,
    );

    // Validate YAML is parseable
    stack.compose_yaml().await?;
    stack.save(data.is_add).await?;
    stack.deploy(Some(socket.clone())).await?;

    // Join combined terminal to see logs
    stack.join_combined_terminal(socket.clone()).await?;

    Ok(())
}

async fn handle_save_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    data: SaveStackData,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let mut stack = Stack::new_with_content(
        ctx.clone().into(),
        data.name,
        endpoint,
        data.compose_yaml,
        data.compose_env,
        data.compose_override_yaml,
    );

    // Validate YAML is parseable
    stack.compose_yaml().await?;
    stack.save(data.is_add).await?;

    Ok(())
}

async fn handle_delete_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.delete(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_get_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let mut stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint.clone()).await?;

    // Join combined terminal if managed by dockge
    if stack.is_managed_by_dockge().await {
        stack.join_combined_terminal(socket.clone()).await.ok();
    }

    let stack_json = stack.to_json().await?;

    Ok(json!({
        "ok": true,
        "stack": stack_json
    }))
}

async fn handle_start_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.start(Some(socket.clone())).await?;
    stack.join_combined_terminal(socket.clone()).await?;

    Ok(())
}

async fn handle_stop_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.stop(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_restart_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.restart(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_update_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let mut stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.update(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_down_stack(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack.down(Some(socket.clone())).await?;

    Ok(())
}

async fn handle_service_status_list(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    let service_status_list: HashMap<String, ServiceStatus> =
        stack.get_service_status_list().await?;

    let containers = crate::docker::list_containers_by_project(&ctx.docker, stack_name)
        .await
        .unwrap_or_default();
    let running_images = crate::docker::extract_container_images(&containers);
    let declared_images = ctx.compose_cache.get_images(stack_name);

    let mut service_update_status = HashMap::new();
    let mut service_recreate_status = HashMap::new();
    for service in service_status_list.keys() {
        service_update_status.insert(
            service.clone(),
            ctx.image_update_store.service_has_update(stack_name, service),
        );
        let running_image = running_images.get(service).cloned().unwrap_or_default();
        let declared_image = declared_images.get(service).cloned().unwrap_or_default();
        service_recreate_status.insert(
            service.clone(),
            crate::stack_model::recreate_necessary(&running_image, &declared_image),
        );
    }

    Ok(json!({
        "ok": true,
        "serviceStatusList": service_status_list,
        "serviceUpdateStatus": service_update_status,
        "serviceRecreateStatus": service_recreate_status,
    }))
}

async fn handle_check_image_updates(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let checker = crate::update_checker::UpdateChecker::new(
        ctx.docker.clone(),
        ctx.compose_cache.clone(),
        ctx.image_update_store.clone(),
        ctx.broadcast_engine.clone(),
    );
    checker.check_stack(&ctx.db, stack_name).await?;

    ctx.broadcast_engine
        .mark_dirty_many(&[Channel::Updates, Channel::Stacks, Channel::Containers]);

    Ok(())
}

async fn handle_container_inspect(
    socket: &SocketRef,
    ctx: &ServerContext,
    container_name: &str,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    let inspect = ctx
        .docker
        .inspect_container(container_name, None::<bollard::container::InspectContainerOptions>)
        .await
        .context("Failed to inspect container")?;

    Ok(json!({
        "ok": true,
        "inspectData": inspect
    }))
}

async fn handle_start_service(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
    service_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack
        .start_service(service_name, Some(socket.clone()))
        .await?;

    Ok(())
}

async fn handle_stop_service(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
    service_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack
        .stop_service(service_name, Some(socket.clone()))
        .await?;

    Ok(())
}

async fn handle_restart_service(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
    service_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack
        .restart_service(service_name, Some(socket.clone()))
        .await?;

    Ok(())
}

async fn handle_update_service(
    socket: &SocketRef,
    ctx: &ServerContext,
    stack_name: &str,
    service_name: &str,
) -> Result<()> {
    check_login(socket)?;

    let endpoint = get_endpoint(socket);
    let stack = Stack::get_stack(ctx.clone().into(), stack_name, endpoint).await?;
    stack
        .update_service(service_name, Some(socket.clone()))
        .await?;

    Ok(())
}

async fn handle_get_docker_network_list(
    socket: &SocketRef,
    _ctx: &ServerContext,
) -> Result<serde_json::Value> {
    check_login(socket)?;

    // Run docker network ls command
    let output = tokio::process::Command::new("docker")
        .args(&["network", "ls", "--format", "{{.Name}}"])
        .output()
        .await?;

    if !output.status.success() {
        return Err(anyhow!("Failed to get docker network list"));
    }

    let networks: Vec<String> = String::from_utf8(output.stdout)?
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect();

    Ok(json!({
        "ok": true,
        "dockerNetworkList": networks
    }))
}

/// Mark the stacks (and containers, since most stack actions change running
/// containers too) view channels dirty. The broadcast engine renders and
/// fans out to every authenticated socket on its own coalesced schedule.
async fn broadcast_stack_list(ctx: &ServerContext) {
    debug!("Marking stacks/containers channels dirty after stack action");
    ctx.broadcast_engine
        .mark_dirty_many(&[Channel::Stacks, Channel::Containers]);
}

/// Render the stack list right now and push it to a single socket. Used on
/// login so the freshly connected client doesn't wait for the next coalesced
/// broadcast tick, which may be shared with other still-unauthenticated
/// sockets.
pub async fn send_stack_list(socket: &SocketRef, ctx: &ServerContext) -> Result<()> {
    let endpoint = get_endpoint(socket);
    let stack_list = Stack::get_stack_list(ctx.clone().into(), endpoint, false).await?;

    let ignore_map = ctx.compose_cache.build_ignore_map();
    let mut map = HashMap::new();
    for (name, mut stack) in stack_list {
        stack
            .refine_status_with_health(&ctx.docker, ignore_map.get(&name))
            .await;
        map.insert(name, serde_json::to_value(stack.to_simple_json().await)?);
    }

    socket
        .emit("stackList", json!({ "ok": true, "stackList": map }))
        .ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_stack_data_deserialize() {
        let json = r#"{
            "name": "test-stack",
            "composeYAML": "version: '3'\nservices:\n  web:\n    image: nginx",
            "composeENV": "FOO=bar",
            "isAdd": true
        }"#;
        let data: DeployStackData = serde_json::from_str(json).unwrap();
        assert_eq!(data.name, "test-stack");
        assert!(data.is_add);
    }
}

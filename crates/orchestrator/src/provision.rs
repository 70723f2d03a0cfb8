//! Placing one subscription's server on a reserved host.
//!
//! The server row is written before anything is dispatched, so the agent
//! never receives a `start` for a server the database does not know about.
//! Placement happens in two steps that can fail independently:
//!
//! 1. [`record_server`] inserts the row and commits its RAM to the host.
//! 2. [`dispatch_start`] appends `start` to the host's dispatch channel.
//!
//! The row and the dispatch channel live in different backends and are not
//! transactional. A caller that fails after step 1 leaves the order for the
//! pending processor, which finds the row, commits its capacity if that never
//! happened, and sends `start` again to the host recorded on it.

use badger_core::{
    channel_key, AgentCommand, NewServer, ProvisionError, Provisioner, Server, ServerStatus,
    SubscriptionId,
};
use tracing::{info, warn};

use crate::allocator::HostReservation;
use crate::context::ProvisioningContext;

/// Container id recorded until the agent reports the real one.
pub const PLACEHOLDER_CONTAINER_ID: &str = "-";

/// Everything needed to start one server besides the host.
pub struct ProvisionRequest<'a> {
    pub subscription_id: SubscriptionId,
    pub cpu_cores: u32,
    pub game_name: &'a str,
    pub provisioner: &'a dyn Provisioner,
    /// Serialized configuration stored on the server row.
    pub config: String,
}

/// Records the server and appends `start` to its host's dispatch channel.
pub async fn provision_server(
    ctx: &ProvisioningContext,
    reservation: HostReservation,
    request: ProvisionRequest<'_>,
) -> Result<Server, ProvisionError> {
    let cpu_cores = request.cpu_cores;
    let game_name = request.game_name;
    let server = record_server(ctx, reservation, request).await?;
    dispatch_start(ctx, &server, game_name, cpu_cores).await?;
    Ok(server)
}

/// Inserts the server row on the reserved host and commits its RAM.
///
/// If the commit fails the row stays behind with `capacity_committed` unset.
pub async fn record_server(
    ctx: &ProvisioningContext,
    reservation: HostReservation,
    request: ProvisionRequest<'_>,
) -> Result<Server, ProvisionError> {
    let ProvisionRequest {
        subscription_id,
        game_name,
        provisioner,
        config,
        ..
    } = request;

    let mut server = ctx
        .store
        .insert_server(NewServer {
            subscription_id,
            status: ServerStatus::Provisioning,
            ip_address: reservation.host().ip_address.clone(),
            ports: Vec::new(),
            container_id: PLACEHOLDER_CONTAINER_ID.to_string(),
            config,
            ram_gb: reservation.ram(),
        })
        .await?;
    reservation.commit(ctx.store.as_ref(), server.id).await?;
    server.capacity_committed = true;

    info!(
        subscription_id = %subscription_id,
        server_id = %server.id,
        host = %server.ip_address,
        game = %game_name,
        provisioner = provisioner.name(),
        "Server recorded"
    );
    Ok(server)
}

/// Commits the RAM of a server row whose earlier commit never landed.
pub async fn commit_existing(
    ctx: &ProvisioningContext,
    reservation: HostReservation,
    server: &mut Server,
) -> Result<(), ProvisionError> {
    warn!(
        subscription_id = %server.subscription_id,
        host = %server.ip_address,
        ram_gb = server.ram_gb,
        "Committing capacity for server recorded without it"
    );
    reservation.commit(ctx.store.as_ref(), server.id).await?;
    server.capacity_committed = true;
    Ok(())
}

/// Appends `start` for `server` to the host recorded on it.
pub async fn dispatch_start(
    ctx: &ProvisioningContext,
    server: &Server,
    game_name: &str,
    cpu_cores: u32,
) -> Result<(), ProvisionError> {
    let command = AgentCommand::Start {
        subscription_id: server.subscription_id,
        game_name: game_name.to_string(),
        ram_gb: server.ram_gb,
        cpu_cores,
    };
    ctx.dispatch
        .append(&channel_key(&server.ip_address), command.to_string())
        .await?;

    info!(
        subscription_id = %server.subscription_id,
        server_id = %server.id,
        host = %server.ip_address,
        "Server provisioning dispatched: {}",
        command
    );
    Ok(())
}

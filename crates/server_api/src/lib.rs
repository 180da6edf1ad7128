pub mod chaos;
pub mod registry;
pub mod rooms;
pub mod sessions;
pub mod telemetry;

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{Device, OwnerId, SessionId},
    error::{ApiError, ErrorCode},
    protocol::{ClientRequest, DashboardResponse, ServerEvent},
};
use storage::{DeviceStore, Storage};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    chaos::ChaosController,
    registry::ConnectionRegistry,
    rooms::{ConnectionHandle, ConnectionId, RoomHub},
    sessions::SessionStore,
    telemetry::TelemetryProducer,
};

pub const ACTION_FAILED_MESSAGE: &str = "failed to add device due to server error";

const MAX_USERNAME_CHARS: usize = 80;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub devices: Arc<dyn DeviceStore>,
    pub registry: ConnectionRegistry,
    pub rooms: RoomHub,
    pub sessions: SessionStore,
    pub chaos: ChaosController,
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self {
            devices: Arc::new(storage.clone()),
            storage,
            registry: ConnectionRegistry::new(),
            rooms: RoomHub::new(),
            sessions: SessionStore::new(),
            chaos: ChaosController::new(),
        }
    }

    pub fn with_device_store(mut self, devices: Arc<dyn DeviceStore>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_chaos(mut self, chaos: ChaosController) -> Self {
        self.chaos = chaos;
        self
    }

    pub fn telemetry_producer(&self, interval: Duration) -> TelemetryProducer {
        TelemetryProducer::new(
            self.registry.clone(),
            self.rooms.clone(),
            Arc::clone(&self.devices),
            self.chaos.clone(),
            interval,
        )
    }
}

/// Why a device action was refused.
#[derive(Debug, Error)]
pub enum ActionFailure {
    #[error("no authenticated owner for this session")]
    AuthRequired,
    #[error("chaos mode injected a failure")]
    ChaosInjected,
    #[error("device store failure: {0:#}")]
    StoreFault(anyhow::Error),
}

impl ActionFailure {
    /// Wire form sent to the requester. Missing auth and injected chaos look the same.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::AuthRequired | Self::ChaosInjected => {
                ApiError::new(ErrorCode::ActionFailed, ACTION_FAILED_MESSAGE)
            }
            Self::StoreFault(_) => ApiError::new(ErrorCode::Internal, ACTION_FAILED_MESSAGE),
        }
    }
}

/// Registers the session's owner and joins the connection to the owner's room.
///
/// Returns the owner joined, or `None` for a logged-out session, which keeps the
/// connection alive for direct replies only. The session stays pinned against
/// idle eviction until [`disconnect`].
pub async fn connect(
    ctx: &ApiContext,
    session: &SessionId,
    handle: &ConnectionHandle,
) -> Option<OwnerId> {
    ctx.sessions.attach(session);
    let state = ctx.sessions.get(session);
    let owner = state.owner?;
    ctx.registry.register(owner, state.chaos_enabled).await;
    ctx.rooms.join(owner, handle.clone());
    info!(
        owner_id = owner.0,
        connection_id = %handle.id(),
        chaos_enabled = state.chaos_enabled,
        "owner connected and joined room"
    );
    Some(owner)
}

/// Undoes [`connect`] for the owner returned by it.
///
/// Later logins or logouts on the session do not change which owner is removed.
pub async fn disconnect(
    ctx: &ApiContext,
    session: &SessionId,
    joined_owner: Option<OwnerId>,
    connection_id: ConnectionId,
) {
    ctx.sessions.detach(session);
    let Some(owner) = joined_owner else {
        return;
    };
    ctx.rooms.leave(owner, connection_id);
    if ctx.registry.deregister(owner).await {
        info!(owner_id = owner.0, %connection_id, "owner disconnected and removed from registry");
    }
}

pub async fn add_device(
    ctx: &ApiContext,
    session: &SessionId,
    requester: &ConnectionHandle,
    name: &str,
    kind: &str,
) -> Result<Device, ActionFailure> {
    let result = try_add_device(ctx, session, name, kind).await;
    match &result {
        Ok(device) => {
            ctx.rooms.multicast(
                device.owner_id,
                ServerEvent::DeviceCreated {
                    device_id: device.device_id,
                    name: device.name.clone(),
                    kind: device.kind.clone(),
                },
            );
            info!(
                owner_id = device.owner_id.0,
                device_id = device.device_id.0,
                name = %device.name,
                "device added"
            );
        }
        Err(failure) => {
            match failure {
                ActionFailure::ChaosInjected => {
                    warn!(session_id = %session, "chaos mode rejected add_device")
                }
                ActionFailure::AuthRequired => {
                    warn!(session_id = %session, "unauthenticated add_device attempt")
                }
                ActionFailure::StoreFault(_) => {
                    error!(session_id = %session, error = %failure, "add_device store failure")
                }
            }
            ctx.rooms
                .unicast(requester, ServerEvent::ActionError(failure.to_api_error()));
        }
    }
    result
}

async fn try_add_device(
    ctx: &ApiContext,
    session: &SessionId,
    name: &str,
    kind: &str,
) -> Result<Device, ActionFailure> {
    let state = ctx.sessions.get(session);
    let owner = state.owner.ok_or(ActionFailure::AuthRequired)?;
    if ctx.chaos.should_fail(state.chaos_enabled) {
        return Err(ActionFailure::ChaosInjected);
    }
    ctx.devices
        .create_device(owner, name, kind)
        .await
        .map_err(ActionFailure::StoreFault)
}

/// Flips the session's chaos flag. Registry entries keep their connect-time value.
pub fn toggle_chaos(ctx: &ApiContext, session: &SessionId) -> bool {
    ctx.sessions.toggle_chaos(session)
}

/// Handles one inbound frame from a live connection. Replies go to the requester only.
pub async fn dispatch(
    ctx: &ApiContext,
    session: &SessionId,
    requester: &ConnectionHandle,
    request: ClientRequest,
) {
    match request {
        ClientRequest::AddDevice { name, kind } => {
            let _ = add_device(ctx, session, requester, &name, &kind).await;
        }
        ClientRequest::ToggleChaos => {
            let chaos_enabled = toggle_chaos(ctx, session);
            ctx.rooms
                .unicast(requester, ServerEvent::ChaosToggled { chaos_enabled });
        }
    }
}

pub async fn signup(ctx: &ApiContext, username: &str) -> Result<OwnerId, ApiError> {
    let username = required_field("username", username, MAX_USERNAME_CHARS)
        .map_err(|message| ApiError::new(ErrorCode::Validation, message))?;
    match ctx.storage.create_user(username).await.map_err(internal)? {
        Some(owner) => {
            info!(owner_id = owner.0, %username, "new user created");
            Ok(owner)
        }
        None => {
            warn!(%username, "signup failed: username already exists");
            Err(ApiError::new(
                ErrorCode::Conflict,
                "That username is already taken, please choose another.",
            ))
        }
    }
}

pub async fn login(
    ctx: &ApiContext,
    session: &SessionId,
    username: &str,
) -> Result<OwnerId, ApiError> {
    if ctx.chaos.should_fail(ctx.sessions.chaos_enabled(session)) {
        warn!(session_id = %session, "chaos mode: login failed unexpectedly");
        return Err(ApiError::new(ErrorCode::ActionFailed, "login error"));
    }
    let user = ctx
        .storage
        .find_user_by_username(username.trim())
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "login failed"))?;
    ctx.sessions.bind_owner(session, user.owner_id);
    info!(owner_id = user.owner_id.0, session_id = %session, "user logged in");
    Ok(user.owner_id)
}

pub fn logout(ctx: &ApiContext, session: &SessionId) -> Result<(), ApiError> {
    if ctx.chaos.should_fail(ctx.sessions.chaos_enabled(session)) {
        warn!(session_id = %session, "chaos mode: logout failed due to session error");
        return Err(ApiError::new(ErrorCode::ActionFailed, "logout error"));
    }
    ctx.sessions.clear_owner(session);
    Ok(())
}

pub async fn list_devices(
    ctx: &ApiContext,
    session: &SessionId,
) -> Result<DashboardResponse, ApiError> {
    let state = ctx.sessions.get(session);
    let owner = state
        .owner
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "login required"))?;
    let devices = ctx
        .devices
        .list_devices_for_owner(owner)
        .await
        .map_err(internal)?;
    Ok(DashboardResponse {
        owner_id: owner,
        chaos_enabled: state.chaos_enabled,
        devices,
    })
}

fn required_field<'a>(label: &str, value: &'a str, max_chars: usize) -> Result<&'a str, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("{label} cannot be empty"));
    }
    if value.chars().count() > max_chars {
        return Err(format!("{label} exceeds {max_chars} characters"));
    }
    Ok(value)
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "storage failure");
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

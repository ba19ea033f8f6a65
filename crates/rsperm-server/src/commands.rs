//! Text-command handlers for a host command dispatcher.
//!
//! The host owns parsing and routing. This module tells it which commands
//! exist (through [`CommandRegistrar`]) and turns each parsed
//! [`CommandRequest`] into a status string for the caller.
//!
//! A command is registered only when the authorization document has a block
//! for it under `Commands`; a reload re-runs registration against the new
//! document.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use rsperm_domain::PlatformId;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::{AuthzError, AuthzResult};
use crate::localization::{render_permissions, Localizer};
use crate::service::AuthorizationService;

pub const SUCCESS: &str = "Success";
pub const FAILED: &str = "Failed";

/// Commands this crate can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandName {
    ShowPermissions,
    AddPermission,
    SetPermission,
    RemovePermission,
    AddToGroup,
    RemoveFromGroup,
    RefreshPermissions,
    Reload,
}

impl CommandName {
    pub const ALL: [CommandName; 8] = [
        CommandName::ShowPermissions,
        CommandName::AddPermission,
        CommandName::SetPermission,
        CommandName::RemovePermission,
        CommandName::AddToGroup,
        CommandName::RemoveFromGroup,
        CommandName::RefreshPermissions,
        CommandName::Reload,
    ];

    /// Name used in the `Commands` section and by the host dispatcher.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::ShowPermissions => "ShowPermissions",
            CommandName::AddPermission => "AddPermission",
            CommandName::SetPermission => "SetPermission",
            CommandName::RemovePermission => "RemovePermission",
            CommandName::AddToGroup => "AddToGroup",
            CommandName::RemoveFromGroup => "RemoveFromGroup",
            CommandName::RefreshPermissions => "RefreshPermissions",
            CommandName::Reload => "Reload",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for CommandName {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// Host-side command registration.
pub trait CommandRegistrar: Send + Sync {
    /// Binds `name` using its config block (aliases, usage text and so on).
    fn register(&self, name: CommandName, block: &serde_json::Value);

    /// Unbinds `name`. Must tolerate names that were never registered.
    fn unregister(&self, name: CommandName);
}

/// Who issued a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandContext {
    /// `None` when the command came from a console rather than a user.
    pub caller: Option<PlatformId>,
}

impl CommandContext {
    pub fn user(platform_id: PlatformId) -> Self {
        Self {
            caller: Some(platform_id),
        }
    }

    pub fn console() -> Self {
        Self { caller: None }
    }

    /// Caller id for delegation checks; a missing caller counts as user 0.
    pub fn caller_or_default(&self) -> PlatformId {
        self.caller.unwrap_or(0)
    }
}

/// A parsed command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRequest {
    ShowPermissions,
    AddPermission {
        target: PlatformId,
        permission: String,
        duration: Option<Duration>,
    },
    SetPermission {
        target: PlatformId,
        permission: String,
        duration: Option<Duration>,
    },
    RemovePermission {
        target: PlatformId,
        permission: String,
    },
    AddToGroup {
        target: PlatformId,
        group: String,
        duration: Option<Duration>,
    },
    RemoveFromGroup {
        target: PlatformId,
        group: String,
    },
    RefreshPermissions,
    Reload,
}

impl CommandRequest {
    pub fn name(&self) -> CommandName {
        match self {
            CommandRequest::ShowPermissions => CommandName::ShowPermissions,
            CommandRequest::AddPermission { .. } => CommandName::AddPermission,
            CommandRequest::SetPermission { .. } => CommandName::SetPermission,
            CommandRequest::RemovePermission { .. } => CommandName::RemovePermission,
            CommandRequest::AddToGroup { .. } => CommandName::AddToGroup,
            CommandRequest::RemoveFromGroup { .. } => CommandName::RemoveFromGroup,
            CommandRequest::RefreshPermissions => CommandName::RefreshPermissions,
            CommandRequest::Reload => CommandName::Reload,
        }
    }
}

/// Permission command handlers bound to one service.
pub struct PermissionCommands {
    service: Arc<AuthorizationService>,
    localizer: Arc<dyn Localizer>,
    registrar: Arc<dyn CommandRegistrar>,
    config_path: PathBuf,
}

impl PermissionCommands {
    /// `config_path` is the document `Reload` reads.
    pub fn new(
        service: Arc<AuthorizationService>,
        localizer: Arc<dyn Localizer>,
        registrar: Arc<dyn CommandRegistrar>,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service,
            localizer,
            registrar,
            config_path: config_path.into(),
        }
    }

    pub fn service(&self) -> &Arc<AuthorizationService> {
        &self.service
    }

    /// Registers every command with a non-null block in the current config.
    ///
    /// Returns the registered commands in declaration order.
    pub async fn register_all(&self) -> Vec<CommandName> {
        let config = self.service.config().await;

        for name in config.command_names() {
            if name.parse::<CommandName>().is_err() {
                warn!(command = name, "ignoring unknown command block");
            }
        }

        let mut registered = Vec::new();
        for name in CommandName::ALL {
            match config.command_block(name.as_str()) {
                Some(block) if !block.is_null() => {
                    self.registrar.register(name, block);
                    registered.push(name);
                }
                _ => {}
            }
        }
        info!(count = registered.len(), "commands registered");
        registered
    }

    /// Unregisters all eight commands, enabled or not.
    pub fn unregister_all(&self) {
        for name in CommandName::ALL {
            self.registrar.unregister(name);
        }
    }

    /// Runs one command and returns its status string.
    pub async fn dispatch(&self, context: CommandContext, request: CommandRequest) -> String {
        match request {
            CommandRequest::ShowPermissions => self.show_permissions(context).await,
            CommandRequest::AddPermission {
                target,
                permission,
                duration,
            } => self.add_permission(context, target, &permission, duration).await,
            CommandRequest::SetPermission {
                target,
                permission,
                duration,
            } => self.set_permission(context, target, &permission, duration).await,
            CommandRequest::RemovePermission { target, permission } => {
                self.remove_permission(context, target, &permission).await
            }
            CommandRequest::AddToGroup {
                target,
                group,
                duration,
            } => self.add_to_group(context, target, &group, duration).await,
            CommandRequest::RemoveFromGroup { target, group } => {
                self.remove_from_group(context, target, &group).await
            }
            CommandRequest::RefreshPermissions => self.refresh_permissions(context).await,
            CommandRequest::Reload => self.reload(context).await,
        }
    }

    /// Lists the caller's own live grants.
    pub async fn show_permissions(&self, context: CommandContext) -> String {
        let Some(caller) = context.caller else {
            warn!("ShowPermissions requires a calling user");
            return FAILED.to_string();
        };
        match self.service.get_permissions(caller).await {
            Some(permissions) => render_permissions(
                self.localizer.as_ref(),
                caller,
                &permissions,
                self.service.clock().now(),
            ),
            None => FAILED.to_string(),
        }
    }

    pub async fn add_permission(
        &self,
        context: CommandContext,
        target: PlatformId,
        permission: &str,
        duration: Option<Duration>,
    ) -> String {
        if let Err(denied) = self.check_permission_access(context, permission).await {
            return denial_status(context, &denied);
        }
        status(self.service.add_permission(target, permission, duration).await)
    }

    pub async fn set_permission(
        &self,
        context: CommandContext,
        target: PlatformId,
        permission: &str,
        duration: Option<Duration>,
    ) -> String {
        if let Err(denied) = self.check_permission_access(context, permission).await {
            return denial_status(context, &denied);
        }
        status(self.service.set_permission(target, permission, duration).await)
    }

    pub async fn remove_permission(
        &self,
        context: CommandContext,
        target: PlatformId,
        permission: &str,
    ) -> String {
        if let Err(denied) = self.check_permission_access(context, permission).await {
            return denial_status(context, &denied);
        }
        status(self.service.remove_permission(target, permission).await)
    }

    pub async fn add_to_group(
        &self,
        context: CommandContext,
        target: PlatformId,
        group: &str,
        duration: Option<Duration>,
    ) -> String {
        if let Err(denied) = self.check_group_access(context, group).await {
            return denial_status(context, &denied);
        }
        status(self.service.add_to_group(target, group, duration).await)
    }

    pub async fn remove_from_group(
        &self,
        context: CommandContext,
        target: PlatformId,
        group: &str,
    ) -> String {
        if let Err(denied) = self.check_group_access(context, group).await {
            return denial_status(context, &denied);
        }
        status(self.service.remove_from_group(target, group).await)
    }

    /// Drops every cached user.
    pub async fn refresh_permissions(&self, _context: CommandContext) -> String {
        self.service.refresh_permissions(None).await;
        SUCCESS.to_string()
    }

    /// Reloads the document and re-registers commands against it.
    ///
    /// A document that fails to load leaves the old config and the current
    /// registrations in place.
    pub async fn reload(&self, context: CommandContext) -> String {
        if let Err(e) = self.service.reload_from_path(&self.config_path).await {
            error!(
                caller = ?context.caller,
                path = %self.config_path.display(),
                error = %e,
                "reload failed, keeping current config"
            );
            return FAILED.to_string();
        }
        self.unregister_all();
        self.register_all().await;
        SUCCESS.to_string()
    }

    async fn check_permission_access(
        &self,
        context: CommandContext,
        permission: &str,
    ) -> AuthzResult<()> {
        if !self.service.config().await.is_permission(permission) {
            return Err(AuthzError::ValidationFailed {
                reason: format!("No permission with name \"{permission}\" defined in config.json"),
            });
        }
        if !self.service.has_access(context.caller_or_default(), permission).await {
            return Err(AuthzError::AccessDenied {
                reason: format!("No access to {permission}"),
            });
        }
        Ok(())
    }

    async fn check_group_access(&self, context: CommandContext, group: &str) -> AuthzResult<()> {
        if self.service.config().await.group(group).is_none() {
            return Err(AuthzError::UnknownGroup {
                group: group.to_string(),
            });
        }
        if !self.service.has_access_to_group(context.caller_or_default(), group).await {
            return Err(AuthzError::AccessDenied {
                reason: format!("You don't have access to group \"{group}\""),
            });
        }
        Ok(())
    }
}

/// Renders a rejected command check as the reply shown to the caller.
fn denial_status(context: CommandContext, err: &AuthzError) -> String {
    let caller = context.caller_or_default();
    if err.is_validation() {
        warn!(platform_id = caller, error = %err, "command rejected");
    } else {
        error!(platform_id = caller, error = %err, "command check failed");
    }
    match err {
        AuthzError::ValidationFailed { reason } | AuthzError::AccessDenied { reason } => {
            reason.clone()
        }
        AuthzError::UnknownGroup { group } => {
            format!("No group with name \"{group}\" defined in config.json")
        }
        AuthzError::StoreUnavailable(_) => FAILED.to_string(),
    }
}

fn status(ok: bool) -> String {
    let status = if ok { SUCCESS } else { FAILED };
    status.to_string()
}

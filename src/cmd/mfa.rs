//! Per-user MFA state: export and disable

use super::run::{BulkCommand, RunArgs, RunStatus};
use crate::engine::{ItemOperation, ItemOutcome, WorkItem};
use crate::error::Result;
use crate::graph::GraphClient;
use crate::graph::users::PerUserMfaState;
use async_trait::async_trait;
use clap::Args;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Args, Debug)]
pub struct MfaExportArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct MfaDisableArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Records each user's per-user MFA state in the report
pub struct MfaExportOperation {
    client: Arc<GraphClient>,
}

impl MfaExportOperation {
    pub fn new(client: Arc<GraphClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ItemOperation for MfaExportOperation {
    fn description(&self) -> String {
        "read per-user MFA state".into()
    }

    async fn execute(&self, item: &WorkItem) -> Result<ItemOutcome> {
        let user_id = self.client.resolve_user_id(item).await?;
        let state = self.client.get_per_user_mfa_state(&user_id).await?;
        Ok(ItemOutcome::completed_with(state.to_string()))
    }
}

/// Turns legacy per-user MFA off; users already disabled are skipped
pub struct MfaDisableOperation {
    client: Arc<GraphClient>,
}

impl MfaDisableOperation {
    pub fn new(client: Arc<GraphClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ItemOperation for MfaDisableOperation {
    fn description(&self) -> String {
        "disable per-user MFA".into()
    }

    async fn execute(&self, item: &WorkItem) -> Result<ItemOutcome> {
        let user_id = self.client.resolve_user_id(item).await?;
        let current = self.client.get_per_user_mfa_state(&user_id).await?;
        if current == PerUserMfaState::Disabled {
            return Ok(ItemOutcome::skipped("per-user MFA already disabled"));
        }

        debug!(user = %item.identifier, from = %current, "Disabling per-user MFA");
        self.client
            .set_per_user_mfa_state(&user_id, PerUserMfaState::Disabled)
            .await?;
        Ok(ItemOutcome::completed_with(format!("{} -> disabled", current)))
    }
}

pub async fn export(args: MfaExportArgs, cancel: CancellationToken) -> Result<RunStatus> {
    BulkCommand {
        name: "mfa-export",
        action: "Export per-user MFA state",
        mutating: false,
        args: &args.run,
        all_users_fallback: true,
    }
    .execute(cancel, |client| {
        Ok(Arc::new(MfaExportOperation::new(client.clone())) as Arc<dyn ItemOperation>)
    })
    .await
}

pub async fn disable(args: MfaDisableArgs, cancel: CancellationToken) -> Result<RunStatus> {
    BulkCommand {
        name: "mfa-disable",
        action: "Disable per-user MFA",
        mutating: true,
        args: &args.run,
        all_users_fallback: false,
    }
    .execute(cancel, |client| {
        Ok(Arc::new(MfaDisableOperation::new(client.clone())) as Arc<dyn ItemOperation>)
    })
    .await
}

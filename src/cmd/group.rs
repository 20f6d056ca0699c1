//! Keep a group's membership in line with MFA capability

use super::run::{BulkCommand, RunArgs, RunStatus};
use crate::engine::{ItemOperation, ItemOutcome, WorkItem};
use crate::error::{BulkError, Result};
use crate::graph::GraphClient;
use async_trait::async_trait;
use clap::Args;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Args, Debug)]
pub struct GroupSyncArgs {
    /// Object id of the target group
    #[arg(short, long)]
    pub group: String,

    /// Also remove members that are not MFA capable
    #[arg(long)]
    pub remove_incapable: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Adds MFA-capable users to a group
///
/// Current membership is fetched once, on first use, and shared by all
/// workers.
pub struct GroupSyncOperation {
    client: Arc<GraphClient>,
    group_id: String,
    remove_incapable: bool,
    members: OnceCell<HashSet<String>>,
}

impl GroupSyncOperation {
    pub fn new(client: Arc<GraphClient>, group_id: impl Into<String>, remove_incapable: bool) -> Self {
        Self {
            client,
            group_id: group_id.into(),
            remove_incapable,
            members: OnceCell::new(),
        }
    }

    async fn members(&self) -> Result<&HashSet<String>> {
        self.members
            .get_or_try_init(|| async {
                let members = self.client.list_group_member_ids(&self.group_id).await?;
                debug!(group = %self.group_id, count = members.len(), "Loaded group membership");
                Ok::<_, BulkError>(members)
            })
            .await
    }
}

#[async_trait]
impl ItemOperation for GroupSyncOperation {
    fn description(&self) -> String {
        if self.remove_incapable {
            format!("sync MFA-capable membership of group {}", self.group_id)
        } else {
            format!("add MFA-capable users to group {}", self.group_id)
        }
    }

    async fn execute(&self, item: &WorkItem) -> Result<ItemOutcome> {
        let user_id = self.client.resolve_user_id(item).await?;
        let details = self.client.get_registration_details(&user_id).await?;
        let is_member = self.members().await?.contains(&user_id);

        match (details.is_mfa_capable, is_member) {
            (true, false) => {
                self.client.add_group_member(&self.group_id, &user_id).await?;
                Ok(ItemOutcome::completed_with("added"))
            }
            (true, true) => Ok(ItemOutcome::skipped("already a member")),
            (false, true) if self.remove_incapable => {
                self.client
                    .remove_group_member(&self.group_id, &user_id)
                    .await?;
                Ok(ItemOutcome::completed_with("removed, not MFA capable"))
            }
            (false, _) => Ok(ItemOutcome::skipped("not MFA capable")),
        }
    }
}

pub async fn sync(args: GroupSyncArgs, cancel: CancellationToken) -> Result<RunStatus> {
    let group_id = args.group.clone();
    let remove_incapable = args.remove_incapable;

    BulkCommand {
        name: "group-sync",
        action: "Sync MFA group membership",
        mutating: true,
        args: &args.run,
        all_users_fallback: true,
    }
    .execute(cancel, move |client| {
        Ok(Arc::new(GroupSyncOperation::new(client.clone(), group_id, remove_incapable))
            as Arc<dyn ItemOperation>)
    })
    .await
}

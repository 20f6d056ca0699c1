//! Directory endpoints used by the bulk commands

use super::{GRAPH_API_BASE, GraphClient};
use crate::engine::WorkItem;
use crate::error::{BulkError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: String,
    pub user_principal_name: Option<String>,
    pub display_name: Option<String>,
    pub account_enabled: Option<bool>,
}

/// Legacy per-user MFA state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerUserMfaState {
    Disabled,
    Enabled,
    Enforced,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for PerUserMfaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PerUserMfaState::Disabled => "disabled",
            PerUserMfaState::Enabled => "enabled",
            PerUserMfaState::Enforced => "enforced",
            PerUserMfaState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticationRequirements {
    per_user_mfa_state: PerUserMfaState,
}

/// Authentication-method registration summary for one user
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDetails {
    pub id: String,
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub is_mfa_capable: bool,
    #[serde(default)]
    pub is_mfa_registered: bool,
    #[serde(default)]
    pub methods_registered: Vec<String>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

impl GraphClient {
    /// Object id for `item`, using the pre-resolved key when the input had one
    pub async fn resolve_user_id(&self, item: &WorkItem) -> Result<String> {
        if let Some(key) = item.resolved_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.trim().to_string());
        }
        if item.identifier.trim().is_empty() {
            return Err(BulkError::InvalidInput(
                "row has neither a user principal name nor an object id".into(),
            ));
        }

        let user: IdOnly = self
            .get(&format!(
                "users/{}?$select=id",
                urlencoding::encode(item.identifier.trim())
            ))
            .await?;
        Ok(user.id)
    }

    pub async fn list_users(&self) -> Result<Vec<DirectoryUser>> {
        self.get_all_pages("users?$select=id,userPrincipalName,displayName,accountEnabled&$top=999")
            .await
    }

    pub async fn get_per_user_mfa_state(&self, user_id: &str) -> Result<PerUserMfaState> {
        let requirements: AuthenticationRequirements = self
            .get_beta(&format!("users/{}/authentication/requirements", user_id))
            .await?;
        Ok(requirements.per_user_mfa_state)
    }

    pub async fn set_per_user_mfa_state(&self, user_id: &str, state: PerUserMfaState) -> Result<()> {
        self.patch_beta::<_, ()>(
            &format!("users/{}/authentication/requirements", user_id),
            &json!({ "perUserMfaState": state }),
        )
        .await
    }

    pub async fn get_registration_details(&self, user_id: &str) -> Result<RegistrationDetails> {
        self.get(&format!(
            "reports/authenticationMethods/userRegistrationDetails/{}",
            user_id
        ))
        .await
    }

    pub async fn list_group_member_ids(&self, group_id: &str) -> Result<HashSet<String>> {
        let members: Vec<IdOnly> = self
            .get_all_pages(&format!("groups/{}/members?$select=id&$top=999", group_id))
            .await?;
        Ok(members.into_iter().map(|m| m.id).collect())
    }

    pub async fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        self.post::<_, Value>(
            &format!("groups/{}/members/$ref", group_id),
            &json!({ "@odata.id": format!("{}/directoryObjects/{}", GRAPH_API_BASE, user_id) }),
        )
        .await
        .map(|_| ())
    }

    pub async fn remove_group_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        self.delete(&format!("groups/{}/members/{}/$ref", group_id, user_id))
            .await
    }

    pub async fn reset_password(&self, user_id: &str, password: &str, force_change: bool) -> Result<()> {
        self.patch::<_, Value>(
            &format!("users/{}", user_id),
            &json!({
                "passwordProfile": {
                    "password": password,
                    "forceChangePasswordNextSignIn": force_change
                }
            }),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mfa_state_parsing() {
        let state: PerUserMfaState = serde_json::from_str("\"enforced\"").unwrap();
        assert_eq!(state, PerUserMfaState::Enforced);
        let state: PerUserMfaState = serde_json::from_str("\"somethingNew\"").unwrap();
        assert_eq!(state, PerUserMfaState::Unknown);
        assert_eq!(serde_json::to_value(PerUserMfaState::Disabled).unwrap(), "disabled");
    }
}

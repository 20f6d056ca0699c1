//! Graph session lifecycle for bulk runs

use super::GraphClient;
use super::auth::GraphAuth;
use crate::config::{ConfigManager, TenantConfig};
use crate::engine::SessionProvider;
use crate::error::{BulkError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Session provider backed by the token cache of one configured tenant
///
/// A valid cached token for the same tenant id (from `entra-bulk login`) is
/// reused and left in place. Otherwise the run signs in with client
/// credentials and removes the token it created when it ends.
pub struct GraphSession {
    config: ConfigManager,
    tenant: TenantConfig,
}

impl GraphSession {
    pub fn new(config: ConfigManager, tenant: TenantConfig) -> Self {
        Self { config, tenant }
    }

    pub fn tenant(&self) -> &TenantConfig {
        &self.tenant
    }
}

#[async_trait]
impl SessionProvider for GraphSession {
    type Session = Arc<GraphClient>;

    async fn existing(&self) -> Result<Option<Self::Session>> {
        match self.config.load_token(&self.tenant.name) {
            Ok(token) if token.tenant_id == self.tenant.tenant_id => {
                debug!(tenant = %self.tenant.name, "Found cached token");
                Ok(Some(Arc::new(GraphClient::new(token.access_token))))
            }
            Ok(_) => {
                debug!(tenant = %self.tenant.name, "Cached token belongs to another tenant id");
                Ok(None)
            }
            Err(BulkError::TokenNotFound) | Err(BulkError::AuthError(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn connect(&self) -> Result<Self::Session> {
        if self.tenant.client_secret.is_none() {
            return Err(BulkError::ConnectionFailed(format!(
                "tenant '{}' has no client secret for unattended sign-in; run 'entra-bulk login {}' first",
                self.tenant.name, self.tenant.name
            )));
        }

        let auth = GraphAuth::new(self.config.clone());
        let token = auth.login_client_credentials(&self.tenant).await?;
        Ok(Arc::new(GraphClient::new(token.access_token)))
    }

    async fn disconnect(&self, _session: Self::Session) -> Result<()> {
        GraphAuth::new(self.config.clone()).logout(&self.tenant.name)
    }
}

use crate::config::{AuthType, ConfigManager, TenantConfig};
use crate::error::{BulkError, Result};
use crate::graph::auth::{GraphAuth, REQUIRED_SCOPES};
use clap::Args;
use colored::Colorize;

/// First `n` characters, safe on non-ASCII input
fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Tenant name; falls back to <config dir>/<name>.env when not configured
    #[arg(index = 1)]
    name: Option<String>,

    /// Tenant ID (Entra tenant ID), for first-time setup
    #[arg(long)]
    tenant_id: Option<String>,

    /// Client ID (application ID), for first-time setup
    #[arg(long)]
    client_id: Option<String>,

    /// Client secret (enables unattended runs)
    #[arg(long)]
    client_secret: Option<String>,

    /// Use client credentials flow instead of device code
    #[arg(long)]
    client_credentials: bool,
}

#[derive(Args, Debug)]
pub struct LogoutArgs {
    /// Tenant name (default: active tenant)
    #[arg(short, long)]
    tenant: Option<String>,

    /// Logout from all tenants
    #[arg(long)]
    all: bool,
}

pub async fn login(args: LoginArgs) -> Result<()> {
    let config_manager = ConfigManager::new()?;
    let auth = GraphAuth::new(config_manager.clone());

    let tenant_config = match (&args.name, &args.tenant_id, &args.client_id) {
        (name, Some(tenant_id), Some(client_id)) => {
            let name = name.clone().unwrap_or_else(|| {
                tenant_id.split('-').next().unwrap_or("tenant").to_string()
            });
            let auth_type = if args.client_credentials || args.client_secret.is_some() {
                AuthType::ClientCredentials
            } else {
                AuthType::DeviceCode
            };
            let tenant = TenantConfig {
                name: name.clone(),
                tenant_id: tenant_id.clone(),
                client_id: client_id.clone(),
                client_secret: args.client_secret.clone(),
                auth_type,
                description: None,
            };
            config_manager.add_tenant(tenant.clone())?;
            println!("{} Tenant '{}' configuration saved", "✓".green(), name);
            tenant
        }
        (Some(name), _, _) => {
            let tenant = config_manager.get_tenant_or_env(name).map_err(|_| {
                BulkError::ConfigError(format!(
                    "Tenant '{}' not found. Add it with 'entra-bulk tenant add' or create {}.env in {}",
                    name,
                    name.to_lowercase(),
                    config_manager.config_dir().display()
                ))
            })?;
            println!("{} Loaded tenant: {}", "✓".green(), name.bold());
            println!("  Tenant ID: {}...", truncate_chars(&tenant.tenant_id, 8));
            println!("  Client ID: {}...", truncate_chars(&tenant.client_id, 8));
            tenant
        }
        (None, _, _) => match config_manager.get_active_tenant()? {
            Some(tenant) => tenant,
            None => {
                return Err(BulkError::InvalidConfig(
                    "Usage:\n  \
                    entra-bulk login NAME                          # configured tenant or NAME.env\n  \
                    entra-bulk login --tenant-id ID --client-id ID # first-time setup"
                        .into(),
                ));
            }
        },
    };

    match tenant_config.auth_type {
        AuthType::DeviceCode => auth.login_device_code(&tenant_config).await?,
        AuthType::ClientCredentials => auth.login_client_credentials(&tenant_config).await?,
    };

    config_manager.set_active_tenant(&tenant_config.name)?;
    println!(
        "\n{} Active tenant: {}",
        "→".cyan(),
        tenant_config.name.bold()
    );
    println!(
        "{} The app registration needs: {}",
        "→".cyan(),
        REQUIRED_SCOPES.join(", ").dimmed()
    );
    Ok(())
}

pub async fn logout(args: LogoutArgs) -> Result<()> {
    let config_manager = ConfigManager::new()?;
    let auth = GraphAuth::new(config_manager.clone());

    if args.all {
        for tenant in config_manager.load_tenants()? {
            auth.logout(&tenant.name)?;
        }
        println!("{} Logged out from all tenants", "✓".green());
    } else if let Some(tenant_name) = &args.tenant {
        auth.logout(tenant_name)?;
        println!("{} Logged out from '{}'", "✓".green(), tenant_name);
    } else {
        match config_manager.load_config()?.current_tenant {
            Some(current) => {
                auth.logout(&current)?;
                println!("{} Logged out from '{}'", "✓".green(), current);
            }
            None => println!("{} No active tenant", "!".yellow()),
        }
    }

    Ok(())
}

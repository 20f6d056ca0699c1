use clap::{Parser, Subcommand};
use colored::Colorize;
use entra_bulk::cmd::{self, RunStatus};
use entra_bulk::config::ConfigManager;
use entra_bulk::error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "entra-bulk",
    about = "Batched, throttle-aware bulk changes for Microsoft Entra ID users",
    version,
    long_about = "Run per-user Entra ID changes over thousands of users\n\n\
                  Items are processed in batches with bounded concurrency. Throttled calls\n\
                  are retried with backoff, every outcome lands in a CSV report, and failed\n\
                  users are written to a CSV that can be fed straight back in."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authenticate to Microsoft Graph API
    Login(cmd::login::LoginArgs),

    /// Logout and clear cached credentials
    Logout(cmd::login::LogoutArgs),

    /// Manage tenant configurations
    #[command(subcommand)]
    Tenant(TenantCommands),

    /// Legacy per-user MFA state
    #[command(subcommand)]
    Mfa(MfaCommands),

    /// Group membership
    #[command(subcommand)]
    Group(GroupCommands),

    /// Password management
    #[command(subcommand)]
    Password(PasswordCommands),
}

#[derive(Subcommand, Debug)]
enum TenantCommands {
    /// Add a new tenant configuration
    Add(cmd::tenant::TenantAddArgs),

    /// List configured tenants
    List(cmd::tenant::TenantListArgs),

    /// Switch active tenant
    Switch(cmd::tenant::TenantSwitchArgs),
}

#[derive(Subcommand, Debug)]
enum MfaCommands {
    /// Export per-user MFA state (all users when --input is omitted)
    Export(cmd::mfa::MfaExportArgs),

    /// Disable per-user MFA for the users in --input
    Disable(cmd::mfa::MfaDisableArgs),
}

#[derive(Subcommand, Debug)]
enum GroupCommands {
    /// Add MFA-capable users to a group
    Sync(cmd::group::GroupSyncArgs),
}

#[derive(Subcommand, Debug)]
enum PasswordCommands {
    /// Reset passwords for the users in --input
    Reset(cmd::password::PasswordResetArgs),
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(status) => status.exit_code(),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

/// RUST_LOG wins, then --verbose, then `log_level` from config.toml
fn init_logging(verbose: bool) {
    let configured = ConfigManager::new()
        .and_then(|manager| manager.load_config())
        .map(|config| config.log_level)
        .unwrap_or_default();

    let default = if verbose {
        "entra_bulk=debug".to_string()
    } else if !configured.trim().is_empty() {
        format!("entra_bulk={}", configured.trim())
    } else {
        "entra_bulk=info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Ctrl-C stops the run at the next batch boundary
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} Interrupt received, finishing the current batch...",
                "!".yellow()
            );
            token.cancel();
        }
    });
    cancel
}

async fn run() -> error::Result<RunStatus> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Login(args) => cmd::login::login(args).await?,
        Commands::Logout(args) => cmd::login::logout(args).await?,
        Commands::Tenant(tenant_cmd) => match tenant_cmd {
            TenantCommands::Add(args) => cmd::tenant::add(args).await?,
            TenantCommands::List(args) => cmd::tenant::list(args).await?,
            TenantCommands::Switch(args) => cmd::tenant::switch(args).await?,
        },
        Commands::Mfa(mfa_cmd) => {
            let cancel = cancel_on_ctrl_c();
            return match mfa_cmd {
                MfaCommands::Export(args) => cmd::mfa::export(args, cancel).await,
                MfaCommands::Disable(args) => cmd::mfa::disable(args, cancel).await,
            };
        }
        Commands::Group(GroupCommands::Sync(args)) => {
            return cmd::group::sync(args, cancel_on_ctrl_c()).await;
        }
        Commands::Password(PasswordCommands::Reset(args)) => {
            return cmd::password::reset(args, cancel_on_ctrl_c()).await;
        }
    }

    Ok(RunStatus::Clean)
}

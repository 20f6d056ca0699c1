//! Shared plumbing for the bulk commands

use super::progress::{BatchProgressBar, create_spinner, finish_spinner_error, finish_spinner_success};
use crate::config::{ConfigManager, EngineSettings, TenantConfig};
use crate::engine::{
    BulkOperationDriver, EngineConfig, ItemOperation, RetryingInvoker, RunReport, SessionOwnership,
    SessionProvider, WorkItem,
};
use crate::error::{BulkError, Result};
use crate::graph::GraphClient;
use crate::graph::users::DirectoryUser;
use crate::graph::session::GraphSession;
use crate::input;
use crate::report::{self, CsvReportSink};
use clap::Args;
use colored::Colorize;
use dialoguer::{Confirm, theme::ColorfulTheme};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Flags shared by every bulk command
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// CSV with a UserPrincipalName/UPN and/or ObjectId/Id column
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Report file (default: <command>_<timestamp>.csv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Tenant to run against (default: active tenant)
    #[arg(short, long)]
    pub tenant: Option<String>,

    /// Items per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Concurrent calls within a batch
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=20))]
    pub concurrency: Option<u16>,

    /// Seconds to wait between batches
    #[arg(long)]
    pub delay: Option<u64>,

    /// Retries per item after throttling
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Report what would change without calling the mutation endpoints
    #[arg(long)]
    pub dry_run: bool,

    /// Skip items the report at --output already lists as done, and append to it
    #[arg(long, requires = "output")]
    pub resume: bool,

    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl RunArgs {
    /// `[engine]` defaults from config.toml, overridden by flags
    pub fn engine_config(&self, settings: &EngineSettings) -> EngineConfig {
        let mut config = settings.to_engine_config();
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency_limit = usize::from(concurrency);
        }
        if let Some(delay) = self.delay {
            config.inter_batch_delay = Duration::from_secs(delay);
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        config.dry_run = self.dry_run;

        let range = crate::engine::CONCURRENCY_RANGE;
        if !range.contains(&config.concurrency_limit) {
            let clamped = config.concurrency_limit.clamp(*range.start(), *range.end());
            warn!(
                configured = config.concurrency_limit,
                using = clamped,
                "Concurrency limit out of range"
            );
            config.concurrency_limit = clamped;
        }
        config
    }

    pub fn report_path(&self, command: &str) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| report::default_report_path(command))
    }
}

/// Outcome of a command, mapped to the process exit code by `main`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    ItemsFailed,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Clean => 0,
            RunStatus::ItemsFailed => 2,
        }
    }

    pub fn from_report(report: &RunReport) -> Self {
        if report.statistics.has_failures() {
            RunStatus::ItemsFailed
        } else {
            RunStatus::Clean
        }
    }
}

/// A bulk command ready to run: where the items come from, and whether it
/// changes anything
pub struct BulkCommand<'a> {
    pub name: &'a str,
    pub action: &'a str,
    pub mutating: bool,
    pub args: &'a RunArgs,
    /// List every directory user when no `--input` is given
    pub all_users_fallback: bool,
}

impl BulkCommand<'_> {
    pub async fn execute<B>(self, cancel: CancellationToken, build_operation: B) -> Result<RunStatus>
    where
        B: FnOnce(&Arc<GraphClient>) -> Result<Arc<dyn ItemOperation>>,
    {
        let config_manager = ConfigManager::new()?;
        let settings = config_manager.load_config()?.engine;
        let tenant = config_manager.resolve_tenant(self.args.tenant.as_deref())?;
        let engine_config = self.args.engine_config(&settings);
        let report_path = self.args.report_path(self.name);

        let mut items = self.load_items(&config_manager, &tenant, &engine_config).await?;

        if self.args.resume {
            let completed = report::read_completed_identifiers(&report_path)?;
            let before = items.len();
            items = report::filter_completed(items, &completed);
            println!(
                "{} Resuming: {} of {} item(s) already done",
                "→".cyan(),
                before - items.len(),
                before
            );
            if items.is_empty() {
                println!("{} Nothing left to do", "✓".green());
                return Ok(RunStatus::Clean);
            }
        }

        println!(
            "\n{} {} for {} item(s) in tenant {}",
            "→".cyan(),
            self.action.bold(),
            items.len(),
            tenant.name.bold()
        );
        println!(
            "  Batches of {}, {} concurrent, {}s between batches{}",
            engine_config.batch_size,
            engine_config.concurrency_limit,
            engine_config.inter_batch_delay.as_secs(),
            if engine_config.dry_run { ", dry run" } else { "" }
        );

        if self.mutating && !engine_config.dry_run && !self.args.yes {
            let proceed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("{} {} user(s)?", self.action, items.len()))
                .default(false)
                .interact()?;
            if !proceed {
                println!("{} Cancelled", "!".yellow());
                return Ok(RunStatus::Clean);
            }
        }

        let mut sink = CsvReportSink::new(&report_path).appending(self.args.resume);
        let progress = BatchProgressBar::new(items.len(), self.action);
        let mut driver = BulkOperationDriver::new(GraphSession::new(config_manager, tenant), engine_config)
            .with_cancellation(cancel);

        let outcome = driver
            .run(items, build_operation, &mut sink, &progress)
            .await;

        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                progress.finish(1);
                return Err(e);
            }
        };
        progress.finish(report.statistics.failure_count);
        print_summary(&report, &report_path);
        Ok(RunStatus::from_report(&report))
    }

    async fn load_items(
        &self,
        config_manager: &ConfigManager,
        tenant: &TenantConfig,
        engine_config: &EngineConfig,
    ) -> Result<Vec<WorkItem>> {
        match &self.args.input {
            Some(path) => {
                let loaded = input::load_work_items(path)?;
                for (row, reason) in &loaded.skipped_rows {
                    println!("  {} Row {}: {}", "⚠".yellow(), row, reason);
                }
                info!(path = %path.display(), items = loaded.items.len(), "Loaded input");
                Ok(loaded.items)
            }
            None if self.all_users_fallback => {
                list_directory_users(config_manager, tenant, engine_config).await
            }
            None => Err(BulkError::InvalidInput(format!(
                "'{}' needs --input <csv>",
                self.name
            ))),
        }
    }
}

/// Every user in the tenant; a throttled page restarts the listing with the
/// run's retry budget and backoff
pub async fn list_users_retrying(client: &GraphClient, config: &EngineConfig) -> Result<Vec<DirectoryUser>> {
    RetryingInvoker::new(config.max_retries, config.backoff.clone())
        .invoke("list users", move || client.list_users())
        .await
}

/// Every user in the tenant, listed through the same session rules as a run
async fn list_directory_users(
    config_manager: &ConfigManager,
    tenant: &TenantConfig,
    engine_config: &EngineConfig,
) -> Result<Vec<WorkItem>> {
    let session = GraphSession::new(config_manager.clone(), tenant.clone());
    let (client, ownership) = match session.existing().await? {
        Some(client) => (client, SessionOwnership::External),
        None => (session.connect().await?, SessionOwnership::Owned),
    };

    let spinner = create_spinner("Listing directory users...");
    let listed = list_users_retrying(&client, engine_config).await;

    if ownership == SessionOwnership::Owned {
        if let Err(e) = session.disconnect(client).await {
            warn!(error = %e, "Failed to close listing session");
        }
    }

    match listed {
        Ok(users) => {
            finish_spinner_success(&spinner, &format!("Found {} user(s)", users.len()));
            let items = input::items_from_users(users);
            if items.is_empty() {
                return Err(BulkError::EmptyInput);
            }
            Ok(items)
        }
        Err(e) => {
            finish_spinner_error(&spinner, "Listing users failed");
            Err(e)
        }
    }
}

pub fn print_summary(report: &RunReport, report_path: &std::path::Path) {
    let stats = &report.statistics;

    println!("\n{}", "Summary".bold());
    println!("{}", "─".repeat(60));
    println!("  Processed:  {}/{}", stats.processed_count, stats.total_items);
    println!("  Succeeded:  {}", stats.success_count.to_string().green());
    println!("  Skipped:    {}", stats.skipped_count.to_string().yellow());
    if stats.failure_count > 0 {
        println!("  Failed:     {}", stats.failure_count.to_string().red().bold());
    } else {
        println!("  Failed:     0");
    }
    println!("  Duration:   {}s", stats.duration().num_seconds());
    if report.cancelled {
        println!("  {} Run interrupted, remaining batches were not started", "!".yellow());
    }
    println!("{}", "─".repeat(60));
    println!("{} Report: {}", "→".cyan(), report_path.display());

    if !report.failed.is_empty() {
        println!("\n{}", "Failed items:".red().bold());
        for result in report.failed.iter().take(10) {
            println!(
                "  {} {}: {}",
                "✗".red(),
                result.identifier,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        if report.failed.len() > 10 {
            println!("  ... and {} more", report.failed.len() - 10);
        }
        if let Some(path) = &report.failed_artifact {
            println!(
                "\n{} Retry with: {}",
                "→".cyan(),
                format!("--input {}", path.display()).bold()
            );
        }
    }
}

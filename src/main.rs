use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use whatssound_boost_regen::{
    cli::{Cli, Commands, OutputFormat},
    config::Config,
    regen::{CycleOutcome, EligibilityChecker, RegenerationService},
    server,
    storage::Database,
    utils,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("whatssound_boost_regen=debug,info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve { bind } => {
            info!("Starting regeneration trigger server...");
            serve(&config, bind).await
        }

        Commands::Run { force, format } => {
            info!("Running regeneration cycle...");
            run_once(&config, force, format).await
        }

        Commands::Auto => {
            info!("Starting in-process weekly scheduler ({})", config.schedule.describe());
            run_auto_service(&config).await
        }

        Commands::Stats { format } => show_stats(&config, format),

        Commands::History { limit, format } => show_history(&config, limit, format),

        Commands::Accounts { format } => list_accounts(&config, format),

        Commands::Init => initialize(&config),
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    Database::new(&config.database.path)
        .with_context(|| format!("failed to open database at {}", config.database.path))
}

fn build_service(config: &Config) -> anyhow::Result<RegenerationService> {
    let db = open_database(config)?;
    Ok(RegenerationService::new(Arc::new(db), config))
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        server::shutdown_signal().await;
        token.cancel();
    });
}

async fn serve(config: &Config, bind: Option<String>) -> anyhow::Result<()> {
    let service = build_service(config)?;
    let secret = config.trigger_secret()?;
    let bind_addr = bind.unwrap_or_else(|| config.server.bind_addr.clone());

    server::serve(&bind_addr, service, secret).await
}

async fn run_once(config: &Config, force: bool, format: OutputFormat) -> anyhow::Result<()> {
    let mut service = build_service(config)?;
    if force {
        warn!("Same-period guard disabled for this run");
        service = service.without_period_guard();
    }

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    let outcome = service.run_cycle(&cancel).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome.summary())?),
        OutputFormat::Table => outcome.summary().print_summary(),
    }

    match outcome {
        CycleOutcome::Completed(_) => Ok(()),
        CycleOutcome::AuditIncomplete { error, .. } => {
            println!("{}", "Accounts were updated but the audit trail is incomplete".yellow());
            Err(error.into())
        }
    }
}

async fn run_auto_service(config: &Config) -> anyhow::Result<()> {
    println!("{}", "Starting automated regeneration service...".green());
    println!("Schedule: {}", config.schedule.describe());

    let service = build_service(config)?;
    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    loop {
        let next = config.schedule.next_boundary(Utc::now());
        info!("Next regeneration cycle at {}", utils::format_timestamp(&next));

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.cancelled() => {
                info!("Scheduler stopped");
                return Ok(());
            }
        }

        match service.run_cycle(&shutdown).await {
            Ok(CycleOutcome::Completed(summary)) => summary.print_summary(),
            Ok(CycleOutcome::AuditIncomplete { summary, error }) => {
                summary.print_summary();
                warn!("Audit trail incomplete for this cycle: {}", error);
            }
            Err(e) => {
                error!("Regeneration cycle failed: {}", e);
            }
        }

        if shutdown.is_cancelled() {
            info!("Scheduler stopped");
            return Ok(());
        }
    }
}

fn show_stats(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let stats = db.get_stats(config.regen.bonus_threshold)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "=== Golden Boost Statistics ===".cyan().bold());
    println!("\nAccounts:");
    println!("  Total:          {}", stats.total_accounts);
    println!("  Active:         {}", stats.active_accounts.to_string().green());
    println!("  Boosts Held:    {}", stats.total_balance.to_string().yellow());
    println!(
        "  Bonus Pending:  {} (usage >= {})",
        stats.accounts_over_threshold.to_string().cyan(),
        config.regen.bonus_threshold
    );

    println!("\nRegeneration Runs:");
    println!("  Total:          {}", stats.audit_runs);
    println!(
        "  Last Run:       {}",
        utils::format_optional_timestamp(stats.last_run_at.as_ref())
    );
    println!(
        "  Next Boundary:  {}",
        utils::format_timestamp(&config.schedule.next_boundary(Utc::now()))
    );

    Ok(())
}

fn show_history(config: &Config, limit: usize, format: OutputFormat) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let history = db.get_audit_history(Some(limit))?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("{}", "No regeneration runs recorded yet".yellow());
        return Ok(());
    }

    println!("{}", "Recent Regeneration Runs:".yellow());
    utils::print_table_border(84);
    utils::print_table_row(
        &["Executed", "Action", "Updated", "Bonuses", "Errors"],
        &[24, 28, 8, 8, 6],
    );
    utils::print_table_border(84);

    for record in history {
        utils::print_table_row(
            &[
                &utils::format_timestamp(&record.executed_at),
                &record.action,
                &record.accounts_updated.to_string(),
                &record.bonuses_granted.to_string(),
                &record.error_count.to_string(),
            ],
            &[24, 28, 8, 8, 6],
        );
    }
    utils::print_table_border(84);

    Ok(())
}

fn list_accounts(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let accounts = db.list_accounts()?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
        return Ok(());
    }

    let period_start = config.schedule.trigger_period(Utc::now());
    let guard = config
        .regen
        .skip_if_current_period
        .then(|| config.schedule.window_opens(period_start));
    let checker = EligibilityChecker::new(config.regen.eligibility, guard);

    println!("{}", format!("Accounts ({})", accounts.len()).cyan());
    utils::print_table_border(110);
    utils::print_table_row(
        &["Account", "Balance", "Usage", "Last Regenerated", "Status"],
        &[18, 12, 6, 24, 40],
    );
    utils::print_table_border(110);

    for account in &accounts {
        utils::print_table_row(
            &[
                &utils::format_id(&account.id),
                &utils::format_boosts(account.entitlement_balance),
                &account.usage_counter.to_string(),
                &utils::format_optional_timestamp(account.last_regen_at.as_ref()),
                &checker.reason(account),
            ],
            &[18, 12, 6, 24, 40],
        );
    }
    utils::print_table_border(110);

    Ok(())
}

fn initialize(config: &Config) -> anyhow::Result<()> {
    println!("{}", "Initializing Golden Boost regeneration...".green());
    let _db = open_database(config)?;
    println!("{}", "✓ Database initialized".green());
    println!("{}", "✓ Configuration loaded".green());

    let secret = config.trigger_secret()?;
    println!(
        "{}",
        if secret.is_some() {
            "✓ Trigger secret configured".green()
        } else {
            "! No trigger secret configured (HTTP trigger is open)".yellow()
        }
    );

    println!("\n{}", "Effective configuration:".cyan());
    println!("{}", toml::to_string_pretty(config)?);

    println!("{}", "Ready to use! Try running:".cyan());
    println!("  {} to run a cycle now", "boost-regen run".yellow());
    println!("  {} to serve the scheduler trigger", "boost-regen serve".yellow());
    println!("  {} to view statistics", "boost-regen stats".yellow());
    Ok(())
}

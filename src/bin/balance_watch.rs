//! balance-watch: ask the Quantus faucet bot for every configured address's
//! balance, report 12h/24h changes to the webhook and record a snapshot.
//!
//! Reads `config.toml` (optional) and the environment / `.env`. Without a
//! `[[groups]]` manifest, every `nodes*.txt` in the working directory is a
//! group.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quantus_balance_watch::config::{self, AppConfig, CONFIG_PATH, RuntimeEnv};
use quantus_balance_watch::delta::DeltaEngine;
use quantus_balance_watch::fetch::BalanceFetcher;
use quantus_balance_watch::groups::{discover_sources, load_groups};
use quantus_balance_watch::history::HistoryStore;
use quantus_balance_watch::report::ReportFormatter;
use quantus_balance_watch::reporter;
use quantus_balance_watch::runner::Runner;
use quantus_balance_watch::transport::{ChatTransport, Credentials, RelayTransport, SignIn};
use quantus_balance_watch::types::OwnerGroup;
use quantus_balance_watch::webhook::WebhookPublisher;

#[derive(Parser)]
#[command(name = "balance-watch", about = "Quantus faucet balance tracker")]
struct Args {
    /// Path to the TOML config (defaults apply when it doesn't exist)
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Override the history file path from the config
    #[arg(long)]
    history: Option<PathBuf>,

    /// Fetch and print the report, but don't publish or save history
    #[arg(long)]
    dry_run: bool,

    /// Print the run summary as JSON to stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let default_filter = if config::debug_from_env() { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Everything fatal happens before the first network call
    let app_config = AppConfig::load_or_default(&args.config)?;
    let env = RuntimeEnv::from_env()?;

    let sources = if app_config.groups.is_empty() {
        discover_sources(Path::new("."))?
    } else {
        app_config.groups.clone()
    };
    let groups = load_groups(&sources)?;
    if groups.is_empty() {
        bail!(
            "No address files found: add nodes*.txt files or [[groups]] to {}",
            args.config.display()
        );
    }
    let total: usize = groups.iter().map(|g| g.nodes.len()).sum();
    info!(
        "Loaded {} group(s), {total} address(es); relay={} session={}",
        groups.len(),
        env.relay_url,
        env.session_name
    );

    let transport = RelayTransport::new(&env.relay_url, &env.session_name)?;
    ensure_authorized(&transport, &env.credentials).await?;

    let result = run(&args, &app_config, &env, &transport, &groups).await;

    if let Err(e) = transport.disconnect().await {
        warn!("Failed to disconnect session: {e}");
    }
    result
}

/// Walk through the relay's login flow if the session isn't authorized yet.
async fn ensure_authorized(transport: &dyn ChatTransport, credentials: &Credentials) -> Result<()> {
    if transport
        .is_authorized()
        .await
        .context("failed to query session state")?
    {
        return Ok(());
    }

    info!("Session not authorized, requesting login code for {}", credentials.phone);
    transport
        .request_login_code(credentials)
        .await
        .context("failed to request login code")?;

    let code = prompt_line("Login code: ")?;
    let outcome = transport
        .sign_in(&credentials.phone, &code)
        .await
        .context("sign-in failed")?;

    if outcome == SignIn::PasswordRequired {
        let password = rpassword::prompt_password("2FA password: ")
            .context("failed to read 2FA password")?;
        transport
            .check_password(password.trim())
            .await
            .context("2FA password rejected")?;
    }
    info!("Session authorized");
    Ok(())
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    let line = line.trim().to_string();
    if line.is_empty() {
        bail!("login code cannot be empty");
    }
    Ok(line)
}

async fn run(
    args: &Args,
    app_config: &AppConfig,
    env: &RuntimeEnv,
    transport: &RelayTransport,
    groups: &[OwnerGroup],
) -> Result<()> {
    let history_path = args
        .history
        .clone()
        .unwrap_or_else(|| app_config.history.path.clone());
    let runner = Runner::new(
        BalanceFetcher::new(transport, app_config.bot.username.as_str(), env.fetch.clone()),
        DeltaEngine::new(
            app_config.timeframes.clone(),
            app_config.history.baseline_policy,
        ),
        ReportFormatter::new(app_config.timeframes.clone(), app_config.report.grand_total),
        HistoryStore::new(history_path, app_config.history.retention()?),
    );

    let fetched = runner.fetch_all(groups, reporter::report_group).await;
    let report = runner.evaluate(fetched, Local::now().naive_local());

    if args.dry_run {
        info!("Dry run: skipping webhook and history write");
        reporter::report_messages(&report.messages);
        if args.json {
            reporter::report_summary(&report.summary(0, false));
        }
        return Ok(());
    }

    let published = match &env.webhook_url {
        Some(url) => {
            runner
                .publish(&report, &WebhookPublisher::new(url.clone()))
                .await
        }
        None => {
            info!("DISCORD_WEBHOOK not set, printing report instead");
            reporter::report_messages(&report.messages);
            0
        }
    };

    // History is written last so a crash above never loses stored snapshots
    let saved = runner.persist(&report, Local::now().naive_local());
    if let Err(e) = &saved {
        error!("Failed to save history: {e:#}");
    }
    if args.json {
        reporter::report_summary(&report.summary(published, saved.is_ok()));
    }
    saved
}

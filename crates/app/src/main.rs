use std::path::{Path, PathBuf};

use anyhow::Context;
use cartledger_core::{Order, Provider};
use cartledger_reconcile::{cancel_pair, AuditedLedger, ProgressEvent, SyncOptions, SyncRunner};
use cartledger_storage::SqliteRecordStore;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod config;
mod file_ledger;

use config::Config;
use file_ledger::FileLedger;

#[derive(Parser)]
#[command(name = "cartledger", version)]
#[command(about = "Match online orders to bank transactions and split them by category")]
struct Cli {
    /// Config file (defaults to ./cartledger.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile one provider's orders against a ledger file
    Sync(SyncArgs),
    /// List recent processing records
    Records {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Args)]
struct SyncArgs {
    #[arg(long)]
    provider: Provider,

    /// JSON array of orders
    #[arg(long)]
    orders: PathBuf,

    /// JSON array of bank transactions; rewritten unless --dry-run
    #[arg(long)]
    ledger: PathBuf,

    #[arg(long)]
    dry_run: bool,

    /// Reprocess orders already recorded as successful
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Sync(args) => sync(&config, args).await,
        Command::Records { limit } => records(&config, limit).await,
    }
}

fn load_orders(path: &Path, provider: Provider) -> anyhow::Result<Vec<Order>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read orders {}", path.display()))?;
    let orders: Vec<Order> =
        serde_json::from_str(&content).with_context(|| format!("invalid orders file {}", path.display()))?;
    let total = orders.len();
    let orders: Vec<Order> = orders.into_iter().filter(|o| o.provider == provider).collect();
    if orders.len() < total {
        tracing::warn!(ignored = total - orders.len(), %provider, "ignoring orders from other providers");
    }
    Ok(orders)
}

async fn sync(config: &Config, args: SyncArgs) -> anyhow::Result<()> {
    let options = SyncOptions {
        dry_run: args.dry_run || config.dry_run,
        force: args.force || config.force,
    };
    let orders = load_orders(&args.orders, args.provider)?;
    let ledger = FileLedger::load(&args.ledger)?;

    let pool = cartledger_storage::create_db(&config.database_path)
        .await
        .with_context(|| format!("failed to open database {}", config.database_path.display()))?;
    let store = SqliteRecordStore::new(pool);

    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing the current order");
            cancel.cancel();
        }
    });

    let runner = SyncRunner::new(
        AuditedLedger::new(&ledger, &store),
        config.classifier()?,
        &store,
        config.provider_settings(args.provider),
        config.categories(),
    );
    let summary = runner
        .run_with_progress(&orders, options, &signal, |event| {
            if let ProgressEvent::Processing { index, total, order_id } = event {
                tracing::debug!(%order_id, "order {}/{}", index + 1, total);
            }
        })
        .await?;

    if !options.dry_run {
        ledger.save().await?;
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !summary.failed.is_empty() {
        tracing::warn!(failed = summary.failed.len(), "some orders failed");
    }
    Ok(())
}

async fn records(config: &Config, limit: i64) -> anyhow::Result<()> {
    let pool = cartledger_storage::create_db(&config.database_path).await?;
    for r in cartledger_storage::recent_records(&pool, limit).await? {
        println!(
            "{}  {:<8} {:<20} {:<8} {:>10}  {}{}",
            r.processed_at.format("%Y-%m-%d %H:%M"),
            r.provider.as_str(),
            r.order_id,
            r.status.as_str(),
            r.order_total.to_string(),
            r.transaction_id.as_deref().unwrap_or("-"),
            r.error_message.map(|e| format!("  ({e})")).unwrap_or_default(),
        );
    }
    Ok(())
}

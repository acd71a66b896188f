//! GTNet Admin
//!
//! One-shot operations against a node's store: registering peers, recording
//! handshakes, seeding local securities, running a sync pass and driving import
//! reconciliation by hand.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gtnet::application::bootstrap::{GtNetServices, PersistenceBootstrap, ServicesBootstrap};
use gtnet::config::Config;
use gtnet::domain::context::ActorContext;
use gtnet::domain::exchange::SyncMode;
use gtnet::domain::import::AdvertisedInstrument;
use gtnet::domain::peer::{DataKind, DataKinds, NewPeer};
use gtnet::domain::repositories::LocalEntityRepository;
use gtnet::infrastructure::observability::Metrics;
use std::str::FromStr;
use tokio::sync::watch;
use tracing::{Level, info};

#[derive(Parser)]
#[command(author, version, about = "GTNet node administration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a peer node
    RegisterPeer {
        /// Base URL of the node
        #[arg(long)]
        domain: String,

        /// IANA time zone of the node
        #[arg(long, default_value = "UTC")]
        time_zone: String,

        /// Comma-separated kinds the node consumes (LAST_PRICE,HISTORICAL_PRICES)
        #[arg(long, default_value = "")]
        consumes: String,

        /// Comma-separated kinds the node supplies
        #[arg(long, default_value = "")]
        supplies: String,

        /// Marks this node's own entry
        #[arg(long)]
        local: bool,
    },
    /// Record a completed handshake with a peer
    Handshake {
        #[arg(long)]
        peer_id: i64,

        /// Token issued by the remote node
        #[arg(long)]
        token: String,
    },
    /// List registered peers
    Peers,
    /// Add a local security
    AddSecurity {
        #[arg(long)]
        isin: String,

        #[arg(long)]
        currency: String,

        #[arg(long, default_value = "")]
        name: String,
    },
    /// Run one exchange sync pass
    Sync {
        /// INCREMENTAL or FULL_RECREATION
        #[arg(long, default_value = "INCREMENTAL")]
        mode: String,
    },
    /// Create an import header from a JSON file of advertised instruments
    ImportCreate {
        #[arg(long)]
        name: String,

        /// JSON array of {isin, currency, ticker_symbol?, name?}
        #[arg(long)]
        file: String,

        #[arg(long, default_value = "1")]
        tenant: i64,

        #[arg(long, default_value = "1")]
        user: i64,
    },
    /// Queue the lookup job of an import header
    QueueImport {
        #[arg(long)]
        head_id: i64,

        #[arg(long, default_value = "1")]
        tenant: i64,

        #[arg(long, default_value = "1")]
        user: i64,
    },
    /// Process every pending import job once
    RunImports,
    /// Show the gaps of an import header
    Gaps {
        #[arg(long)]
        head_id: i64,

        #[arg(long, default_value = "1")]
        tenant: i64,
    },
}

fn parse_kinds(value: &str) -> Result<DataKinds> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(DataKind::from_str)
        .collect::<Result<Vec<_>>>()
        .map(|kinds| kinds.into_iter().collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let persistence = PersistenceBootstrap::init(&config.database).await?;
    let services = ServicesBootstrap::init(&config.gtnet, persistence, Metrics::new()?);

    run(cli.command, &services).await
}

async fn run(command: Commands, services: &GtNetServices) -> Result<()> {
    match command {
        Commands::RegisterPeer {
            domain,
            time_zone,
            consumes,
            supplies,
            local,
        } => {
            let peer = services
                .registry
                .register_peer(NewPeer {
                    domain_name: domain,
                    time_zone,
                    consumer_usage: parse_kinds(&consumes)?,
                    supplier_capability: parse_kinds(&supplies)?,
                    is_local: local,
                })
                .await?;
            println!("Registered peer {} ({})", peer.id, peer.domain_name);
        }
        Commands::Handshake { peer_id, token } => {
            let config = services.registry.complete_handshake(peer_id, &token).await?;
            println!("Handshake recorded; token for the remote: {}", config.token_this);
        }
        Commands::Peers => {
            for peer in services.registry.list_peers().await? {
                println!(
                    "{:>5}  {:<40} {:<20} consumes=[{}] supplies=[{}]{}",
                    peer.id,
                    peer.domain_name,
                    peer.time_zone,
                    peer.consumer_usage,
                    peer.supplier_capability,
                    if peer.is_local { "  (local)" } else { "" }
                );
            }
        }
        Commands::AddSecurity {
            isin,
            currency,
            name,
        } => {
            let security = services
                .persistence
                .local_entity_repository
                .save_security(&isin, &currency, &name)
                .await?;
            println!("Local security {} {}/{}", security.id, security.isin, security.currency);
        }
        Commands::Sync { mode } => {
            let mode = SyncMode::from_str(&mode)?;
            let (_cancel_tx, cancel_rx) = watch::channel(false);
            let report = services.exchange_sync.run(mode, &cancel_rx).await?;
            println!(
                "{}: {} processed, {} queued, {} answered from cache, {} failed",
                report.mode,
                report.processed,
                report.messages_queued,
                report.answers_applied,
                report.failures.len()
            );
            for failure in &report.failures {
                println!("  instrument {}: {}", failure.instrument_id, failure.reason);
            }
        }
        Commands::ImportCreate {
            name,
            file,
            tenant,
            user,
        } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file))?;
            let advertised: Vec<AdvertisedInstrument> =
                serde_json::from_str(&raw).context("Failed to parse advertised instruments")?;
            let ctx = ActorContext::new(tenant, user);
            let head = services.imports.create_header(&ctx, &name).await?;
            let positions = services
                .imports
                .add_positions(&ctx, head.id, &advertised)
                .await?;
            println!("Import header {} with {} positions", head.id, positions.len());
        }
        Commands::QueueImport {
            head_id,
            tenant,
            user,
        } => {
            let ctx = ActorContext::new(tenant, user);
            if services
                .imports
                .queue_import_job_if_not_exists(&ctx, head_id)
                .await?
            {
                println!("Lookup job queued for header {}", head_id);
            } else {
                println!("Header {} already has an active job", head_id);
            }
        }
        Commands::RunImports => {
            let worker = services.import_worker();
            let (_cancel_tx, cancel_rx) = watch::channel(false);
            while let Some(report) = worker.run_next(&cancel_rx).await? {
                println!(
                    "Job {} (header {}): {} resolved, {} unmatched, {} failed",
                    report.job_id,
                    report.head_id,
                    report.resolved,
                    report.unmatched,
                    report.failures.len()
                );
            }
        }
        Commands::Gaps { head_id, tenant } => {
            let ctx = ActorContext::new(tenant, 0);
            for gap in services.imports.gaps_for_header(&ctx, head_id).await? {
                println!("position {:>6}  {:<18} {}", gap.position_id, gap.reason, gap.detail);
            }
        }
    }

    info!("Done.");
    Ok(())
}

//! `sellerdesk`: worker, producer, retention sweeps and account linking.

mod app;
mod shutdown;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use sellerdesk_core::{LinkedAccountId, TenantId};
use sellerdesk_infra::{AppConfig, SweepKind, requeue, schema};

use crate::app::App;

#[derive(Parser, Debug)]
#[command(name = "sellerdesk", version, about = "Marketplace inbox auto-responder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create tables and indexes if missing.
    Migrate,
    /// Claim and process tasks until interrupted.
    Work {
        /// Concurrent workers in this process.
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Enqueue one task per linked account, once.
    Produce,
    /// Run one retention sweep.
    Sweep {
        #[arg(value_enum)]
        target: SweepTarget,
    },
    /// Run the producer and sweeps on their intervals until interrupted.
    Schedule,
    /// Re-enqueue an account on behalf of a tenant.
    Requeue {
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        account: LinkedAccountId,
    },
    /// Print the consent URL for linking a marketplace account.
    AuthorizeUrl {
        #[arg(long)]
        tenant: TenantId,
    },
    /// Finish linking with the code from the OAuth redirect.
    Link {
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        code: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SweepTarget {
    Idempotency,
    Metadata,
}

impl From<SweepTarget> for SweepKind {
    fn from(target: SweepTarget) -> Self {
        match target {
            SweepTarget::Idempotency => SweepKind::IdempotencyLog,
            SweepTarget::Metadata => SweepKind::MessageMetadata,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    sellerdesk_observability::init_with(&sellerdesk_observability::LogConfig::from_env());

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("load configuration")?;
    let app = App::connect(config).await?;

    match cli.command {
        Commands::Migrate => {
            schema::apply(&app.pool).await.context("apply schema")?;
            info!("schema applied");
        }
        Commands::Work { workers } => {
            let token = shutdown::install_signal_handler();
            app.work(workers, token).await?;
        }
        Commands::Produce => {
            let report = app.producer().enqueue_all().await.context("producer cycle")?;
            println!("{}", serde_json::to_string(&report)?);
        }
        Commands::Sweep { target } => {
            let deleted = app.sweep(target.into()).await?;
            println!("{deleted}");
        }
        Commands::Schedule => {
            let token = shutdown::install_signal_handler();
            app.scheduler().run(token).await;
        }
        Commands::Requeue { tenant, account } => {
            let inserted = requeue(&app.access_guard(), &app.queue(), tenant, account)
                .await
                .context("requeue")?;
            if inserted {
                println!("account {account} queued");
            } else {
                println!("account {account} already has an active task");
            }
        }
        Commands::AuthorizeUrl { tenant } => {
            println!("{}", app.linker()?.authorization_url(tenant)?);
        }
        Commands::Link { tenant, code } => {
            let account = app.linker()?.link(tenant, &code).await.context("link account")?;
            println!("linked account {} ({})", account.id, account.login);
        }
    }

    Ok(())
}

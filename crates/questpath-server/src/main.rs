mod config;
mod serve_cmd;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use questpath_core::billing::StripeGateway;
use questpath_core::producer::OpenAiProducer;
use questpath_db::pool;

use config::AppConfig;
use serve_cmd::AppState;

#[derive(Parser)]
#[command(name = "questpath", about = "Goal planning service with premium billing")]
struct Cli {
    /// Database URL (overrides QUESTPATH_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a questpath config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/questpath")]
        db_url: String,
        /// Stripe secret API key
        #[arg(long)]
        stripe_api_key: Option<String>,
        /// Stripe webhook signing secret
        #[arg(long)]
        webhook_secret: Option<String>,
        /// OpenAI API key used for plan generation
        #[arg(long)]
        openai_api_key: Option<String>,
        /// Base URL of the web frontend (checkout redirects)
        #[arg(long)]
        frontend_url: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create and migrate the questpath database
    DbInit,
    /// Run the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
}

struct InitArgs {
    db_url: String,
    stripe_api_key: Option<String>,
    webhook_secret: Option<String>,
    openai_api_key: Option<String>,
    frontend_url: Option<String>,
    force: bool,
}

fn cmd_init(args: InitArgs) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !args.force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: args.db_url.clone(),
        },
        billing: config::BillingSection {
            stripe_api_key: args.stripe_api_key,
            webhook_secret: args.webhook_secret,
            frontend_url: args.frontend_url,
            price_cents: None,
        },
        producer: config::ProducerSection {
            openai_api_key: args.openai_api_key,
            ..Default::default()
        },
        quota: config::QuotaSection::default(),
    };

    config::save_config(&cfg)?;

    let show = |value: &Option<String>| match value {
        Some(v) => config::mask_secret(v),
        None => "(unset)".to_owned(),
    };
    println!("Config written to {}", path.display());
    println!("  database.url = {}", args.db_url);
    println!("  billing.stripe_api_key = {}", show(&cfg.billing.stripe_api_key));
    println!("  billing.webhook_secret = {}", show(&cfg.billing.webhook_secret));
    println!("  producer.openai_api_key = {}", show(&cfg.producer.openai_api_key));
    println!();
    println!("Next: run `questpath db-init` to create and migrate the database.");

    Ok(())
}

async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = AppConfig::resolve(cli_db_url)?;

    println!("Initializing questpath database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("questpath db-init complete.");
    Ok(())
}

async fn cmd_serve(cli_db_url: Option<&str>, bind: &str, port: u16) -> anyhow::Result<()> {
    let resolved = AppConfig::resolve(cli_db_url)?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let gateway = StripeGateway::new(resolved.billing.clone()).context("failed to build payment gateway")?;
    let generation_timeout = resolved.producer.timeout;
    let producer = OpenAiProducer::new(resolved.producer).context("failed to build plan producer")?;

    let state = AppState::new(
        db_pool.clone(),
        Arc::new(producer),
        Arc::new(gateway),
        resolved.billing,
        resolved.quota,
        generation_timeout,
    );

    let result = serve_cmd::run_serve(state, bind, port).await;
    db_pool.close().await;
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            stripe_api_key,
            webhook_secret,
            openai_api_key,
            frontend_url,
            force,
        } => {
            cmd_init(InitArgs {
                db_url,
                stripe_api_key,
                webhook_secret,
                openai_api_key,
                frontend_url,
                force,
            })?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            cmd_serve(cli.database_url.as_deref(), &bind, port).await?;
        }
    }

    Ok(())
}

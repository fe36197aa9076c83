use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use diesel_migrations::MigrationHarness;
use freshers::{
    MIGRATIONS,
    config::{AppConfig, create_app},
    gate::{
        AdminStatus, DbStatusSource, FireStatus, GatePoller, GateState, Gates,
    },
    state::{AppState, DbPool, make_pool},
    storage::{Bucket, FsStore},
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "freshers", about = "Freshers event registration portal")]
struct Cli {
    /// Path to a TOML config file. Environment variables override it.
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web server (the default).
    Serve,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Lock or unlock the admin dashboard.
    AdminAccess {
        #[arg(value_enum)]
        state: OnOff,
    },
    /// Open or close registrations for every event.
    Fire {
        #[arg(value_enum)]
        status: FireArg,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum OnOff {
    On,
    Off,
}

#[derive(ValueEnum, Clone, Copy)]
enum FireArg {
    Open,
    Closed,
}

fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool.get()?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!("could not run migrations: {e}"))?;
    for version in applied {
        tracing::info!("applied migration {version}");
    }
    Ok(())
}

async fn serve(config: AppConfig, pool: DbPool) -> anyhow::Result<()> {
    let config = Arc::new(config);

    tokio::fs::create_dir_all(&config.storage_dir)
        .await
        .with_context(|| {
            format!("creating {}", config.storage_dir.display())
        })?;
    let bucket: Bucket = Arc::new(FsStore::new(
        config.storage_dir.clone(),
        config.public_url.clone(),
    ));

    let gates = Gates::new(GateState::unknown());
    let _public_poller = GatePoller::spawn(
        DbStatusSource::new(pool.clone()),
        gates.public.clone(),
        config.public_poll(),
    );
    let _admin_poller = GatePoller::spawn(
        DbStatusSource::new(pool.clone()),
        gates.admin.clone(),
        config.admin_poll(),
    );

    let app = create_app(
        AppState {
            pool,
            bucket,
            gates: gates.clone(),
            config: config.clone(),
        },
        Some(config.storage_dir.clone()),
    );

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!("listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("could not listen for ctrl-c: {e}");
            }
        })
        .await?;

    gates.shutdown();
    tracing::info!("shut down");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("freshers=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let config =
        AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let pool = make_pool(&config.database_url)
        .with_context(|| format!("opening {}", config.database_url))?;
    migrate(&pool)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool).await?,
        Command::Migrate => {}
        Command::AdminAccess { state } => {
            let mut conn = pool.get()?;
            let state = AdminStatus::set_admin_access(
                &mut conn,
                matches!(state, OnOff::On),
            )?;
            println!("admin access is now {}", if state.admin_access { "on" } else { "off" });
        }
        Command::Fire { status } => {
            let fire = match status {
                FireArg::Open => FireStatus::Open,
                FireArg::Closed => FireStatus::Closed,
            };
            let mut conn = pool.get()?;
            let state = AdminStatus::set_fire(&mut conn, fire)?;
            println!("fire status is now {}", fire.code());
            tracing::debug!("admin status version {}", state.version);
        }
    }

    Ok(())
}

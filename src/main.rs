use clap::Parser;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vazz_fulfillment::cli::{self, Cli, Commands, DbCommands, OrderCommands, PaymentCommands};
use vazz_fulfillment::config::{Config, LogFormat};
use vazz_fulfillment::middleware::request_logger::RequestLogConfig;
use vazz_fulfillment::startup::Components;
use vazz_fulfillment::{create_app, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
        Commands::Order(command) => {
            let pool = db::create_pool(&config).await?;
            let components = Components::build(&config, pool);
            match command {
                OrderCommands::Retry { order_id, operator } => {
                    cli::handle_order_retry(&components.manual_retry, &order_id, &operator).await
                }
                OrderCommands::Status { order_id } => {
                    cli::handle_order_status(components.store.as_ref(), &order_id).await
                }
            }
        }
        Commands::Payment(PaymentCommands::Status { order_id }) => {
            let pool = db::create_pool(&config).await?;
            let components = Components::build(&config, pool);
            cli::handle_payment_status(components.gateway.as_ref(), &order_id).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let components = Components::build(&config, pool);
    let state = components.app_state(&config);
    let app = create_app(
        state,
        RequestLogConfig {
            log_body: config.log_request_body,
        },
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

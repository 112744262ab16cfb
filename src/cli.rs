use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::gateway::PaymentGateway;
use crate::services::ManualRetry;
use crate::services::checkout::lookup_status;
use crate::ports::Store;

#[derive(Parser)]
#[command(name = "vazz-fulfillment")]
#[command(about = "Digital goods order fulfillment and settlement service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Order operations
    #[command(subcommand)]
    Order(OrderCommands),

    /// Payment gateway queries
    #[command(subcommand)]
    Payment(PaymentCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum OrderCommands {
    /// Resubmit a FAILED top-up to the provider, charging the buyer's balance again
    Retry {
        #[arg(value_name = "ORDER_ID")]
        order_id: String,

        /// Operator recorded on the retry
        #[arg(short, long, default_value = "cli")]
        operator: String,
    },

    /// Show the public status of an order
    Status {
        #[arg(value_name = "ORDER_ID")]
        order_id: String,
    },
}

#[derive(Subcommand)]
pub enum PaymentCommands {
    /// Ask the gateway for the current state of a payment
    Status {
        #[arg(value_name = "ORDER_ID")]
        order_id: String,
    },
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_order_retry(retry: &ManualRetry, order_id: &str, operator: &str) -> anyhow::Result<()> {
    let outcome = retry.retry(order_id, operator).await?;

    println!("Order {}: {}", outcome.order_id, outcome.message);
    println!("  Manual transaction: {}", outcome.manual_transaction_id);
    println!("  Retry status: {}", outcome.status);
    println!("  Order status: {}", outcome.order_status);
    Ok(())
}

pub async fn handle_order_status(store: &dyn Store, order_id: &str) -> anyhow::Result<()> {
    let view = lookup_status(store, order_id).await?;

    println!("Order {} ({}): {}", view.order_id, view.kind, view.status);
    if let Some(sn) = view.serial_number {
        println!("  Serial number: {}", sn);
    }
    Ok(())
}

pub async fn handle_payment_status(gateway: &dyn PaymentGateway, order_id: &str) -> anyhow::Result<()> {
    let query = gateway.query_payment(order_id).await?;

    println!("Payment for {}: {:?}", query.merchant_order_id, query.state);
    if let Some(reference) = query.reference {
        println!("  Reference: {}", reference);
    }
    if let Some(amount) = query.amount {
        println!("  Amount: {}", amount);
    }
    println!("  Message: {}", query.message);
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Database Max Connections: {}", config.database_max_connections);
    println!("  Provider URL: {}", config.provider_base_url);
    println!("  Provider Username: {}", config.provider_username);
    println!("  Provider API Key: {}", mask_secret(&config.provider_api_key));
    println!("  Provider Timeout: {}s", config.provider_timeout_secs);
    println!(
        "  Provider Webhook Secret: {}",
        config.provider_webhook_secret.as_deref().map(mask_secret).unwrap_or_else(|| "(unset)".to_string())
    );
    println!("  Gateway URL: {}", config.gateway_base_url);
    println!("  Gateway Merchant Code: {}", config.gateway_merchant_code);
    println!("  Gateway API Key: {}", mask_secret(&config.gateway_api_key));
    println!("  Gateway Callback URL: {}", config.gateway_callback_url);
    println!(
        "  Counterparties: {} / {} / {}",
        config.counterparties.gateway, config.counterparties.provider, config.counterparties.balance
    );
    println!("  Order ID Prefix: {}", config.order_id_prefix);

    if config.provider_timeout_secs == 0 {
        anyhow::bail!("PROVIDER_TIMEOUT_SECS must be greater than zero");
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let head: String = secret.chars().take(2).collect();
    format!("{}****", head)
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

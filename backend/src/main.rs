//! # Litecoin Settlement Backend Service
//!
//! This is the main entry point for the service that accepts Litecoin
//! payments on single-use addresses and sweeps them into one custodial
//! address. It provides:
//!
//! - REST API for creating payment requests and reading their status
//! - A background poller that settles, expires and sweeps payments
//! - Encrypted custody of every per-payment private key
//! - Database storage for payment records
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────────────┐        ┌─────────────────────────────┐  │
//! │  │  REST API (Actix)   │        │  Settlement Poller          │  │
//! │  │  POST /payments     │        │  • Confirmation Tracker     │  │
//! │  │  GET  /payments/:id │        │  • Sweep Builder            │  │
//! │  │  GET  /health       │        │  • Completion webhook       │  │
//! │  └─────────────────────┘        └─────────────────────────────┘  │
//! │             │                                 │                   │
//! │             └────────────────┬────────────────┘                   │
//! │                              │                                    │
//! │  ┌───────────────────────────┴───────────────────────────────┐   │
//! │  │  PaymentService     KeyVault (AES-256-GCM)                  │   │
//! │  └───────────────────────────────────────────────────────────┘   │
//! │                              │                                    │
//! │         ┌────────────────────┴────────────┐                      │
//! │  ┌──────┴──────┐                   ┌──────┴──────┐               │
//! │  │  PostgreSQL │                   │  Electrum   │               │
//! │  │  Database   │                   │  server     │               │
//! │  └─────────────┘                   └─────────────┘               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! 1. Set up PostgreSQL and create the database
//! 2. Copy `.env.example` to `.env` and configure
//! 3. Start the server: `cargo run` (migrations run at startup)
//!
//! ## Environment Variables
//!
//! See `.env.example` for all required configuration.

use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod api;
mod chain;
mod config;
mod db;
mod models;
mod services;
mod utils;
mod vault;

use chain::ElectrumChain;
use config::AppConfig;
use db::Database;
use services::{
    ConfirmationTracker, PaymentService, SettlementPoller, SharedChain, SharedStore, SweepBuilder,
    WebhookNotifier,
};
use vault::KeyVault;

/// Application state shared across all handlers.
///
/// Wrapped in an `Arc` so every worker thread shares one copy.
pub struct AppState {
    /// Payment creation and status lookups
    pub payments: PaymentService,
}

/// Log a fatal startup error and turn it into an `io::Error` for `main`.
fn fatal<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> io::Error {
    move |e| {
        error!("❌ {}: {}", context, e);
        io::Error::other(format!("{}: {}", context, e))
    }
}

/// Main entry point for the backend service.
///
/// This function:
/// 1. Loads configuration from environment
/// 2. Initializes the database connection
/// 3. Sets up the key vault and Electrum client
/// 4. Starts the settlement poller
/// 5. Launches the HTTP server
#[actix_web::main]
async fn main() -> io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    // RUST_LOG overrides the default level
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;

    info!("🚀 Starting Litecoin Settlement Backend Service");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    let config = AppConfig::from_env().map_err(fatal("Failed to load configuration"))?;

    info!("📋 Configuration loaded");
    info!("   Network: {:?}", config.network);
    info!("   Main address: {}", config.main_address);
    info!("   Confirmations: {}", config.confirmations);

    // =========================================
    // STEP 3: Initialize Database
    // =========================================
    let db = Database::connect(&config.database_url)
        .await
        .map_err(fatal("Failed to connect to database"))?;

    info!("🗄️  Database connected");

    db.run_migrations()
        .await
        .map_err(fatal("Failed to run migrations"))?;

    info!("📦 Database migrations complete");

    // =========================================
    // STEP 4: Initialize Key Vault and Chain Client
    // =========================================
    let vault = KeyVault::new(&config.master_key, config.network);
    info!("🔐 Key vault ready");

    let chain: SharedChain = Arc::new(ElectrumChain::new(&config));
    info!("⛓️  Electrum client initialized");

    // =========================================
    // STEP 5: Initialize Services
    // =========================================
    let store: SharedStore = Arc::new(db);

    let payments = PaymentService::new(
        store.clone(),
        chain.clone(),
        vault.clone(),
        config.confirmations,
        config.payment_ttl_secs,
    );

    let tracker = ConfirmationTracker::new(
        store.clone(),
        chain.clone(),
        config.network,
        config.confirmations,
    );

    let sweeper = SweepBuilder::new(chain, vault, &config.main_address, config.confirmations)
        .map_err(fatal("Invalid main address"))?;

    let webhook = match &config.webhook {
        Some(webhook_config) => Some(
            WebhookNotifier::new(webhook_config)
                .map_err(fatal("Failed to create webhook client"))?,
        ),
        None => {
            warn!("No WEBHOOK_URL configured, completion notifications disabled");
            None
        }
    };

    info!("🔧 Services initialized");

    // =========================================
    // STEP 6: Start Settlement Poller
    // =========================================
    let poller = SettlementPoller::new(
        store,
        tracker,
        sweeper,
        webhook,
        config.poll_interval_secs,
        config.cold_sweep_every,
    );

    tokio::spawn(async move {
        poller.start().await;
    });

    info!("🔄 Settlement poller started");

    // =========================================
    // STEP 7: Create Application State
    // =========================================
    let app_state = Arc::new(AppState { payments });

    // =========================================
    // STEP 8: Start HTTP Server
    // =========================================
    let bind_address = format!("{}:{}", config.server_host, config.server_port);
    info!("🌐 Starting HTTP server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(api::json_error_handler))
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .configure(api::configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}

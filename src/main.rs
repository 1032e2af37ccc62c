//! bms-client - command-line client for the business management API
//!
//! Every command goes through one authenticated pipeline that refreshes
//! expired access tokens transparently.

mod api;
mod auth;
mod config;
mod hooks;
mod models;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::{Parser, Subcommand};
use reqwest::Method;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::error::ApiError;

#[derive(Parser)]
#[command(name = "bms-client")]
#[command(about = "Command-line client for the business management API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with username and password
    Login {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        password: String,

        /// Tenant code, for users belonging to several tenants
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Exchange the refresh token for a new access token now
    Refresh,

    /// GET a path and print the result
    Get {
        /// Path relative to the API base (e.g. /api/orders)
        path: String,
    },

    /// POST a JSON body to a path
    Post {
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },

    /// PUT a JSON body to a path
    Put {
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },

    /// DELETE a path
    Delete { path: String },
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Login {
            username,
            password,
            tenant,
        } => {
            tracing::info!("Logging in as {}...", username);
            auth::login(&username, &password, tenant.as_deref()).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Refresh => {
            auth::refresh_session().await?;
        }
        Commands::Get { path } => {
            api::call(Method::GET, &path, None).await?;
        }
        Commands::Post { path, data } => {
            api::call(Method::POST, &path, data.as_deref()).await?;
        }
        Commands::Put { path, data } => {
            api::call(Method::PUT, &path, data.as_deref()).await?;
        }
        Commands::Delete { path } => {
            api::call(Method::DELETE, &path, None).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(e) = run(cli.command).await {
        // Pipeline errors were already shown to the user by the notifier.
        if e.downcast_ref::<ApiError>().is_some() {
            std::process::exit(1);
        }
        return Err(e);
    }

    Ok(())
}

mod cli;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use flareauth::AuthFacade;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing_with_level(&cli.log_level);

    let config = config::load_config(cli.config.as_deref())?;
    tracing::debug!(project_id = %config.project_id, backend = ?config.cache.backend, "configuration loaded");

    let auth = AuthFacade::new(config).context("failed to initialise credential engine")?;

    match &cli.command {
        Commands::SignIn(args) => commands::sign_in(&auth, args).await,
        Commands::Lookup(args) => commands::lookup(&auth, args).await,
        Commands::VerifyIdToken(args) => commands::verify_id_token(&auth, args).await,
        Commands::VerifySessionCookie(args) => commands::verify_session_cookie(&auth, args).await,
        Commands::CreateSessionCookie(args) => commands::create_session_cookie(&auth, args).await,
        Commands::AccessToken => commands::access_token(&auth).await,
    }
}

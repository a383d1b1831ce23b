use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flareauth")]
#[command(about = "flareauth CLI: verify and mint Firebase credentials")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./flareauth.toml when present)
    #[arg(short, long, global = true, env = "FLAREAUTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    SignIn(SignInArgs),
    /// Look up the user an ID token belongs to
    Lookup(TokenArgs),
    /// Verify an ID token and print its claims
    VerifyIdToken(TokenArgs),
    /// Verify a session cookie and print its claims
    VerifySessionCookie(TokenArgs),
    /// Mint a session cookie from an ID token
    CreateSessionCookie(CreateSessionCookieArgs),
    /// Print a service-account bearer token
    AccessToken,
}

#[derive(Args)]
pub struct SignInArgs {
    /// User email
    #[arg(short, long)]
    pub email: String,

    /// User password
    #[arg(short, long, env = "FLAREAUTH_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Args)]
pub struct TokenArgs {
    /// The token or cookie value
    pub token: String,
}

#[derive(Args)]
pub struct CreateSessionCookieArgs {
    /// ID token to exchange
    pub id_token: String,

    /// Cookie lifetime, between 5m and 14d
    #[arg(long, default_value = "14d", value_parser = humantime::parse_duration)]
    pub expires_in: Duration,
}

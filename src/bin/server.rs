//! Helpdesk authentication server.

use clap::Parser;
use helpdesk_auth::{
    api::{ApiServer, AppState},
    config::ConfigBuilder,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "helpdesk-auth-server")]
#[command(about = "SAML / OIDC / local sign-in and session gate for the helpdesk")]
#[command(version)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/helpdesk-auth.toml")]
    pub config: String,

    /// Environment variable prefix
    #[arg(long, default_value = "HELPDESK")]
    pub env_prefix: String,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_logging(args.verbose);

    let config = ConfigBuilder::new()
        .with_env_prefix(&args.env_prefix)
        .add_file(&args.config, false)
        .load()?;
    tracing::info!(path = %args.config, "configuration loaded");

    let state = AppState::from_config(config)?;
    ApiServer::new(state).start().await
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "helpdesk_auth=debug,tower_http=debug"
    } else {
        "helpdesk_auth=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

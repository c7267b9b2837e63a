//! Shared CLI plumbing for the `mercurio-pub`/`mercurio-sub` binaries.

use clap::Args;
use mercurio_client::ConnectOptions;
use tracing_subscriber::EnvFilter;

/// Connection options shared by every Mercurio CLI tool.
#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// Broker host to connect to
    #[arg(short = 'H', long, default_value = "localhost")]
    pub host: String,

    /// Broker port
    #[arg(short = 'p', long, default_value_t = 1883)]
    pub port: u16,

    /// Client identifier (generated if not provided)
    #[arg(short = 'i', long)]
    pub client_id: Option<String>,

    /// Username for authentication
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password for authentication
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[arg(short = 'k', long, default_value_t = 60)]
    pub keep_alive: u16,

    /// Enable verbose (debug) logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl ConnectionArgs {
    /// Build `ConnectOptions` from the parsed CLI arguments.
    pub fn to_connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new(self.host.clone(), self.port)
            .keep_alive(self.keep_alive)
            .clean_start(true);

        if let Some(ref client_id) = self.client_id {
            options = options.client_id(client_id.clone());
        }

        if let Some(ref username) = self.username {
            options = options.username(username.clone());
        }

        if let Some(ref password) = self.password {
            options = options.password(password.clone().into_bytes());
        }

        options
    }
}

/// Initialize tracing, at `debug` level when `verbose` is set.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

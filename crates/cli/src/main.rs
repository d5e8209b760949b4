mod client_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use client_commands::DEFAULT_URL;

#[derive(Parser)]
#[command(name = "courier", about = "Courier: WhatsApp messaging gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory to load courier.{toml,yaml,yml,json} from.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show the session status of a running gateway.
    Status {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Send a message through a running gateway.
    Send {
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        message: String,
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Ask a running gateway to start pairing.
    Connect {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Ask a running gateway to drop its session.
    Disconnect {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = cli.config_dir.clone() {
        courier_config::set_config_dir(dir);
    }

    match cli.command {
        Commands::Gateway { bind, port } => {
            info!(version = env!("CARGO_PKG_VERSION"), "courier starting");
            let mut config = courier_config::discover_and_load();
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            courier_gateway::start_gateway(config).await
        },
        Commands::Status { url } => client_commands::status(&url).await,
        Commands::Send { to, message, url } => client_commands::send(&url, to, message).await,
        Commands::Connect { url } => client_commands::command(&url, "/connect").await,
        Commands::Disconnect { url } => client_commands::command(&url, "/disconnect").await,
    }
}

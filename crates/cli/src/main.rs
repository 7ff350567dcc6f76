use anyhow::Context;
use clap::{Parser, Subcommand};
use lib::config::{self, Config};
use lib::gateway;
use lib::relay;
use lib::responder::{HttpQuoteSource, QuoteSource, Responder, SeededRandom};
use lib::slack::{rtm, SlackClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "relaybot")]
#[command(about = "Slack relay bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Connect over RTM and answer messages until the connection drops or Ctrl+C.
    Rtm {
        /// Config file path (default: RELAYBOT_CONFIG_PATH or ~/.relaybot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the webhook gateway (outgoing webhook, /vote and /whatthecommit commands, stand-up alert).
    Serve {
        /// Config file path (default: RELAYBOT_CONFIG_PATH or ~/.relaybot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from PORT, then config, then 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print one commit-message quote.
    Quote {
        /// Config file path (default: RELAYBOT_CONFIG_PATH or ~/.relaybot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("relaybot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Rtm { config }) => {
            if let Err(e) = run_rtm(config).await {
                log::error!("rtm failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Quote { config }) => {
            if let Err(e) = run_quote(config).await {
                log::error!("quote failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn load(config_path: Option<PathBuf>) -> anyhow::Result<Config> {
    let (config, path) = config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    Ok(config)
}

async fn run_rtm(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let token = config::resolve_slack_token(&config)?;
    let client = SlackClient::new(token, config.slack.api_base.clone());
    let (session, socket) = rtm::connect(&client)
        .await
        .context("rtm handshake failed")?;

    let responder = Arc::new(
        Responder::new(
            &session.self_id,
            &config.responder,
            Arc::new(SeededRandom::from_clock()),
            Arc::new(HttpQuoteSource::new(config.responder.quote_url.clone())),
        )
        .with_alias(config.slack.mention_alias.clone())
        .with_bot_name(config.slack.bot_name.clone()),
    );

    let cancel = CancellationToken::new();
    let port = config::resolve_port(&config);
    let listener = gateway::bind(&config.gateway.bind, port).await?;
    let health = {
        let cancel = cancel.clone();
        tokio::spawn(gateway::serve(
            listener,
            gateway::health_router(port),
            async move { cancel.cancelled().await },
        ))
    };
    let signal = tokio::spawn(gateway::shutdown_signal(cancel.clone()));

    relay::run(socket, &session.self_id, responder, cancel.clone()).await;
    cancel.cancel();
    let _ = signal.await;
    health.await??;
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = load(config_path)?;
    config.gateway.port = port.unwrap_or_else(|| config::resolve_port(&config));
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    gateway::run_gateway(config).await
}

async fn run_quote(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let quote = HttpQuoteSource::new(config.responder.quote_url).fetch().await;
    if quote.is_empty() {
        anyhow::bail!("quote service returned nothing");
    }
    println!("{}", quote);
    Ok(())
}

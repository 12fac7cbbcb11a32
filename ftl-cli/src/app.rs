use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ftl_binance::{LeaderboardClient, LeaderboardConfig, DEFAULT_BASE_URL};
use ftl_broker::{AccountId, RateLimiter, SnapshotSource};
use ftl_config::AppConfig;
use ftl_core::PositionRecord;
use ftl_events::EventBus;
use tracing::{info, warn};

use crate::live::{AccountPoller, LiveRuntime, ShutdownSignal};
use crate::output::{render, OutputFormat};
use crate::telemetry::{init_tracing, spawn_metrics_server, LiveMetrics};

#[derive(Parser, Debug)]
#[command(author, version, about = "Follow leaderboard accounts and mirror their position changes")]
pub struct Cli {
    /// TOML settings file; `FTL_*` environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Log filter, e.g. `info` or `ftl_tracker=debug`.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll accounts continuously and print every change with its replica order
    Watch(WatchArgs),
    /// Print the open positions of one account
    Positions { uid: String },
    /// Print the public profile of one account
    Profile { uid: String },
    /// Resolve nicknames to encrypted uids
    Search {
        #[arg(required = true)]
        nicknames: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Account uid to follow; repeat for several. Added to the configured list.
    #[arg(long = "account", value_name = "UID")]
    accounts: Vec<String>,
    /// Override `poll.interval_ms`
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Print JSON lines instead of text
    #[arg(long)]
    json: bool,
    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

impl WatchArgs {
    /// Stdout rendering; independent of how log lines are formatted.
    fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    let _guard = init_tracing(&config.log, cli.log_level.as_deref())?;

    match cli.command {
        Commands::Watch(args) => {
            if let Some(interval_ms) = args.interval_ms {
                config.poll.interval_ms = interval_ms;
            }
            config.merge_accounts(args.accounts.iter().cloned());
            config.validate()?;
            watch(config, args).await
        }
        Commands::Positions { uid } => print_positions(&config, &uid).await,
        Commands::Profile { uid } => print_profile(&config, &uid).await,
        Commands::Search { nicknames } => search(&config, &nicknames).await,
    }
}

/// Build the leaderboard client described by `config`.
pub fn build_client(config: &AppConfig) -> Result<LeaderboardClient> {
    let api = &config.api;
    let settings = LeaderboardConfig {
        base_url: api
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        timeout: api.timeout(),
        ..LeaderboardConfig::default()
    }
    .with_headers(api.headers.clone());
    let mut client = LeaderboardClient::new(settings)?;
    if let Some(rps) = api.requests_per_second {
        let quota = RateLimiter::per_second(rps).context("requests_per_second must be non-zero")?;
        client = client.with_rate_limiter(RateLimiter::direct(quota));
    }
    Ok(client)
}

/// One poller per configured account, all publishing into `bus`.
pub fn build_pollers(
    config: &AppConfig,
    source: Arc<dyn SnapshotSource>,
    bus: &EventBus,
    metrics: Option<Arc<LiveMetrics>>,
) -> Vec<AccountPoller> {
    config
        .accounts
        .iter()
        .map(|account| {
            let poller = AccountPoller::new(
                AccountId::new(account.uid.clone()),
                source.clone(),
                config.poll.interval(),
                bus.clone(),
            )
            .with_label(account.display_name());
            match &metrics {
                Some(metrics) => poller.with_metrics(metrics.clone()),
                None => poller,
            }
        })
        .collect()
}

async fn watch(config: AppConfig, args: WatchArgs) -> Result<()> {
    if config.accounts.is_empty() {
        bail!("no accounts to follow; pass --account or list [[accounts]] in the config file");
    }
    let format = args.output_format();
    let shutdown = ShutdownSignal::new();
    let metrics = Arc::new(LiveMetrics::new()?);
    let metrics_task = match args.metrics_addr {
        Some(addr) => Some(spawn_metrics_server(addr, metrics.clone(), shutdown.clone())?.1),
        None => None,
    };

    let source: Arc<dyn SnapshotSource> = Arc::new(build_client(&config)?);
    let (bus, mut stream) = EventBus::channel(config.poll.channel_capacity);
    let pollers = build_pollers(&config, source, &bus, Some(metrics));
    drop(bus);
    info!(
        accounts = pollers.len(),
        interval_ms = config.poll.interval_ms,
        "following leaderboard accounts"
    );
    let runtime = LiveRuntime::start(pollers, shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping pollers");
        }
        signal.trigger();
    });

    while let Some(event) = stream.recv().await {
        match render(&event, format) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, "failed to render event"),
        }
    }

    runtime.join().await;
    if let Some(task) = metrics_task {
        shutdown.trigger();
        let _ = task.await;
    }
    Ok(())
}

async fn print_positions(config: &AppConfig, uid: &str) -> Result<()> {
    let client = build_client(config)?;
    let snapshot = client
        .get_other_position(uid)
        .await
        .with_context(|| format!("failed to fetch positions for {uid}"))?;
    if snapshot.is_empty() {
        println!("no open positions");
        return Ok(());
    }
    println!(
        "{:<14} {:<6} {:>16} {:>14} {:>14} {:>14} {:>4}",
        "TICKER", "SIDE", "SIZE", "ENTRY", "MARK", "PNL", "LEV"
    );
    for raw in snapshot.entries {
        let record = PositionRecord::from_raw(raw);
        println!(
            "{:<14} {:<6} {:>16} {:>14} {:>14} {:>14} {:>4}",
            record.ticker,
            record.direction.to_string(),
            record.magnitude.to_string(),
            record.entry_price.to_string(),
            record.mark_price.to_string(),
            record.pnl.round_dp(4).to_string(),
            record.leverage,
        );
    }
    Ok(())
}

async fn print_profile(config: &AppConfig, uid: &str) -> Result<()> {
    let client = build_client(config)?;
    let profile = client
        .get_base_info(uid)
        .await
        .with_context(|| format!("failed to fetch profile for {uid}"))?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

async fn search(config: &AppConfig, nicknames: &[String]) -> Result<()> {
    let client = build_client(config)?;
    let resolved = client
        .nicknames_to_uids(nicknames)
        .await
        .context("nickname search failed")?;
    for nickname in nicknames {
        match resolved.get(nickname).map(Vec::as_slice) {
            Some([]) | None => println!("{nickname}: no match"),
            Some(uids) => println!("{nickname}: {}", uids.join(", ")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_watch_flags() {
        let cli = Cli::try_parse_from([
            "ftl",
            "--log-level",
            "debug",
            "watch",
            "--account",
            "AAA",
            "--account",
            "BBB",
            "--interval-ms",
            "2500",
            "--json",
            "--metrics-addr",
            "127.0.0.1:9100",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.accounts, vec!["AAA", "BBB"]);
        assert_eq!(args.interval_ms, Some(2500));
        assert_eq!(args.output_format(), OutputFormat::Json);
        assert_eq!(args.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
    }

    #[test]
    fn watch_prints_text_without_json_flag() {
        let cli = Cli::try_parse_from(["ftl", "watch", "--account", "AAA"]).unwrap();
        let Commands::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.output_format(), OutputFormat::Human);
    }

    #[test]
    fn search_requires_a_nickname() {
        assert!(Cli::try_parse_from(["ftl", "search"]).is_err());
    }

    #[test]
    fn builds_one_poller_per_account() {
        let mut config = AppConfig::default();
        config.merge_accounts(["AAA", "BBB"]);
        config.api.requests_per_second = Some(2);
        let source: Arc<dyn SnapshotSource> = Arc::new(build_client(&config).unwrap());
        let (bus, _stream) = EventBus::channel(4);
        let pollers = build_pollers(&config, source, &bus, None);
        assert_eq!(pollers.len(), 2);
        assert_eq!(pollers[1].account().as_str(), "BBB");
    }
}

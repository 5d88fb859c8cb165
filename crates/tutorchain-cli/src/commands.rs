use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use tutorchain_core::config::ConfigError;
use tutorchain_core::event_bus::next_matching;
use tutorchain_core::gateway::{ContractGateway, RpcGateway};
use tutorchain_core::provider::rpc::{RpcClient, RpcTransport};
use tutorchain_core::provider::{JsonRpcProvider, WalletProvider};
use tutorchain_core::view::{network_name, short_address, ConnectButtonView};
use tutorchain_core::{
    logging, paths, Address, ConnectionError, MarketplaceContext, MarketplaceError,
    TutorchainConfig,
};

use crate::cli::{Cli, Commands};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Home(String),

    #[error("{0}")]
    Connection(#[from] ConnectionError),

    #[error("{0}")]
    Marketplace(#[from] MarketplaceError),

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Prints either JSON or a human-readable line.
struct Output {
    json: bool,
}

impl Output {
    fn emit(&self, value: Value, text: impl FnOnce() -> String) -> Result<(), CliError> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

struct App {
    config: TutorchainConfig,
    config_dir: PathBuf,
    provider: Arc<JsonRpcProvider>,
    context: MarketplaceContext,
    out: Output,
}

pub async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let (config, config_dir) = load_config(&cli)?;
    let app = App::new(config, config_dir, &cli)?;

    match cli.command {
        Commands::Init => app.init(),
        Commands::Connect => app.connect().await,
        Commands::Status => app.status().await,
        Commands::Watch => app.watch().await,
        Commands::Tutor { address } => app.tutor(address).await,
        Commands::Sessions { address } => app.sessions(address).await,
        Commands::Book { tutor, hours } => app.book(tutor, hours).await,
        Commands::Register { name, rate_eth } => app.register(&name, &rate_eth).await,
        Commands::Rate { session_id, rating } => app.rate(session_id, rating).await,
    }
}

/// Defaults, then config.json, then environment, then flags.
fn load_config(cli: &Cli) -> Result<(TutorchainConfig, PathBuf), CliError> {
    let config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => paths::config_dir().map_err(CliError::Home)?,
    };
    let mut config = TutorchainConfig::load(&config_dir)?;
    config.apply_env()?;

    if let Some(url) = &cli.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(contract) = cli.contract {
        config.contract_address = Some(contract);
    }
    if let Some(dir) = &cli.log_dir {
        config.log_dir = Some(dir.clone());
    }
    Ok((config, config_dir))
}

impl App {
    fn new(config: TutorchainConfig, config_dir: PathBuf, cli: &Cli) -> Result<Self, CliError> {
        // wallet-only commands never call the contract; the gateway still needs a target
        let contract = if cli.command.needs_contract() {
            config.contract()?
        } else {
            config.contract_address.unwrap_or(Address::ZERO)
        };

        let wire_log = logging::open_log_file(config.log_dir.as_deref(), "rpc");
        let client = RpcClient::new(config.rpc_url.as_str(), wire_log);
        log::debug!("Using JSON-RPC endpoint {}", client.url());

        let transport: Arc<dyn RpcTransport> = Arc::new(client);
        let provider = Arc::new(JsonRpcProvider::new(Arc::clone(&transport)));
        let gateway: Arc<dyn ContractGateway> = Arc::new(RpcGateway::new(
            transport,
            contract,
            config.receipt_polling(),
        ));
        let wallet: Arc<dyn WalletProvider> = provider.clone();
        let context = MarketplaceContext::builder(gateway)
            .provider(wallet)
            .config_dir(config_dir.clone())
            .build();

        Ok(Self {
            config,
            config_dir,
            provider,
            context,
            out: Output { json: cli.json },
        })
    }

    fn init(&self) -> Result<(), CliError> {
        self.config.save(&self.config_dir)?;
        let path = self.config_dir.join(tutorchain_core::config::CONFIG_FILE);
        self.out.emit(
            json!({ "path": path, "config": self.config }),
            || format!("Wrote {}", path.display()),
        )
    }

    async fn connect(&self) -> Result<(), CliError> {
        let session = self.context.session();
        session.connect().await?;
        let state = session.state();
        self.out.emit(serde_json::to_value(&state)?, || {
            ConnectButtonView::from_state(&state, false).label()
        })
    }

    async fn status(&self) -> Result<(), CliError> {
        let session = self.context.session();
        // a failed attempt is reported through the state's last_error
        if let Err(e) = session.connect().await {
            log::debug!("Connect for status failed: {}", e);
        }
        let state = session.state();
        let view = ConnectButtonView::from_state(&state, session.is_connecting());
        self.out.emit(
            json!({ "state": state, "view": view, "network": network_name(state.chain_id) }),
            || {
                let mut lines = vec![format!("Wallet:  {}", view.label())];
                if let Some(chain) = state.chain_id {
                    lines.push(format!("Network: {} ({})", network_name(Some(chain)), chain));
                }
                lines.join("\n")
            },
        )
    }

    async fn watch(&self) -> Result<(), CliError> {
        let _watcher = self.provider.spawn_watcher(self.config.poll_interval());
        let mut events = self.context.event_bus.subscribe();

        if let Err(e) = self.context.session().connect().await {
            log::warn!("Initial connect failed: {}", e);
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Interrupted, stopping watch");
                    break;
                }
                event = next_matching(&mut events, "") => {
                    let Some(event) = event else { break };
                    let line = format!("{} {}", event.event_type, event.payload);
                    self.out.emit(serde_json::to_value(&event)?, || line)?;
                }
                fresh = self.context.restart_when_requested() => {
                    let Some(session) = fresh else { break };
                    if let Err(e) = session.connect().await {
                        log::warn!("Reconnect after network change failed: {}", e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn tutor(&self, address: Address) -> Result<(), CliError> {
        let profile = self.context.marketplace().tutor_profile(&address).await?;
        self.out.emit(serde_json::to_value(&profile)?, || {
            let record = &profile.record;
            if !record.is_listed {
                return format!("{} is not a listed tutor", short_address(&address));
            }
            let rating = profile
                .average_rating
                .map(|r| format!("{:.1}", r))
                .unwrap_or_else(|| "no ratings yet".to_string());
            format!(
                "{}{} ({})\n  Rate:     {}/hour\n  Sessions: {}\n  Rating:   {}",
                record.name,
                if record.is_verified { " [verified]" } else { "" },
                short_address(&address),
                record.rate_per_hour,
                record.total_sessions,
                rating
            )
        })
    }

    async fn sessions(&self, address: Option<Address>) -> Result<(), CliError> {
        let marketplace = self.context.marketplace();
        let user = match address {
            Some(address) => address,
            None => marketplace.with_wallet(|account| async move { Ok(account) }).await?,
        };
        let sessions = marketplace.user_sessions(&user).await?;
        let stats = tutorchain_core::marketplace::ProfileStats::from_sessions(&sessions);

        self.out.emit(
            json!({ "user": user, "sessions": sessions, "stats": stats }),
            || {
                let mut lines = vec![format!(
                    "{}: {} session(s), {} hour(s) learned, average rating {}",
                    short_address(&user),
                    stats.total_sessions,
                    stats.hours_learned,
                    stats
                        .average_rating
                        .map(|r| format!("{:.1}", r))
                        .unwrap_or_else(|| "-".to_string())
                )];
                for entry in &sessions.awaiting_rating {
                    lines.push(format!(
                        "  #{}  {}h  awaiting rating",
                        entry.id,
                        entry.record.hours()
                    ));
                }
                for entry in &sessions.rated {
                    lines.push(format!(
                        "  #{}  {}h  rated {}",
                        entry.id,
                        entry.record.hours(),
                        entry.record.rating
                    ));
                }
                lines.join("\n")
            },
        )
    }

    async fn book(&self, tutor: Address, hours: u32) -> Result<(), CliError> {
        let booking = self
            .context
            .marketplace()
            .book_session(&tutor, hours)
            .await?;
        self.out.emit(serde_json::to_value(&booking)?, || {
            format!(
                "Booked {}h with {} for {} (tx {})",
                booking.quote.hours,
                short_address(&tutor),
                booking.quote.total,
                booking.receipt.transaction_hash
            )
        })
    }

    async fn register(&self, name: &str, rate_eth: &str) -> Result<(), CliError> {
        let receipt = self
            .context
            .marketplace()
            .register_tutor(name, rate_eth)
            .await?;
        self.out.emit(serde_json::to_value(&receipt)?, || {
            format!("Listed as tutor (tx {})", receipt.transaction_hash)
        })
    }

    async fn rate(&self, session_id: u64, rating: u8) -> Result<(), CliError> {
        let receipt = self
            .context
            .marketplace()
            .rate_session(session_id, rating)
            .await?;
        self.out.emit(serde_json::to_value(&receipt)?, || {
            format!(
                "Rated session #{} with {} star(s) (tx {})",
                session_id, rating, receipt.transaction_hash
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("tutorchain").chain(args.iter().copied()))
    }

    #[test]
    fn flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        TutorchainConfig {
            rpc_url: "http://file:8545".into(),
            ..Default::default()
        }
        .save(dir.path())
        .unwrap();
        let dir_arg = dir.path().to_string_lossy().to_string();

        let cli = parse(&["--config-dir", &dir_arg, "--rpc-url", "http://flag:8545", "status"]);
        let (config, config_dir) = load_config(&cli).unwrap();

        assert_eq!(config_dir, dir.path());
        assert_eq!(config.rpc_url, "http://flag:8545");
    }

    #[test]
    fn contract_commands_require_contract() {
        let dir = TempDir::new().unwrap();
        let dir_arg = dir.path().to_string_lossy().to_string();
        let cli = parse(&[
            "--config-dir",
            &dir_arg,
            "tutor",
            "0x0000000000000000000000000000000000007070",
        ]);

        let mut config = TutorchainConfig::load(dir.path()).unwrap();
        config.contract_address = None;
        let result = App::new(config, dir.path().to_path_buf(), &cli);

        assert!(matches!(
            result,
            Err(CliError::Config(ConfigError::MissingContract))
        ));
    }

    #[tokio::test]
    async fn wallet_commands_build_without_contract() {
        let dir = TempDir::new().unwrap();
        let dir_arg = dir.path().to_string_lossy().to_string();
        let cli = parse(&["--config-dir", &dir_arg, "connect"]);

        let app = App::new(TutorchainConfig::default(), dir.path().to_path_buf(), &cli).unwrap();
        assert!(!app.context.session().is_connected());
    }

    #[test]
    fn init_writes_config_file() {
        let dir = TempDir::new().unwrap();
        let dir_arg = dir.path().to_string_lossy().to_string();
        let cli = parse(&["--config-dir", &dir_arg, "init"]);
        let config = TutorchainConfig {
            poll_interval_ms: 250,
            ..Default::default()
        };

        let app = App::new(config.clone(), dir.path().to_path_buf(), &cli).unwrap();
        app.init().unwrap();

        assert_eq!(TutorchainConfig::load(dir.path()).unwrap(), config);
    }
}

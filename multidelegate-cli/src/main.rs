use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use multidelegate_crypto::signatures::{address_of, generate_keypair, signed_call, SigningKey};
use multidelegate_execution::{
    execute_call, retrieve_proxy_contract_address, CallError, CallReceipt, GlobalState,
    VotableAsset,
};
use multidelegate_storage::Storage;
use multidelegate_types::primitives::parse_address;
use multidelegate_types::{Address, Amount, DelegationInstruction, ProcessorConfig, SettlementMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Multi-delegate CLI: split and move voting weight across delegates"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,
    #[arg(short, long, default_value = "wallet.json")]
    wallet_path: PathBuf,
    /// JSON processor config used by `init`
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Overrides the stored settlement mode for this invocation
    #[arg(long)]
    settlement: Option<SettlementMode>,
    #[arg(long, default_value = "info")]
    log_level: Level,
}

#[derive(Subcommand)]
enum Commands {
    /// Create processor state for an asset
    Init {
        #[arg(long, value_parser = parse_address)]
        asset: Option<Address>,
        #[arg(long)]
        uri_template: Option<String>,
    },
    /// Generate a new wallet
    Wallet,
    /// Show wallet and processor state
    Show,
    /// Mint test units of the asset (local faucet)
    Mint {
        #[arg(long)]
        amount: Amount,
        /// Defaults to the wallet
        #[arg(long, value_parser = parse_address)]
        to: Option<Address>,
    },
    /// Let the processor move wallet funds
    Approve {
        #[arg(long, default_value_t = Amount::MAX)]
        amount: Amount,
    },
    /// Withdraw from every source and deposit the given amounts on the targets
    Delegate {
        #[arg(long, value_delimiter = ',', value_parser = parse_address)]
        sources: Vec<Address>,
        #[arg(long, value_delimiter = ',', value_parser = parse_address)]
        targets: Vec<Address>,
        #[arg(long, value_delimiter = ',')]
        amounts: Vec<Amount>,
    },
    /// Ledger balance on a delegate, or asset balance without --delegate
    Balance {
        /// Defaults to the wallet
        #[arg(long, value_parser = parse_address)]
        address: Option<Address>,
        #[arg(long, value_parser = parse_address)]
        delegate: Option<Address>,
    },
    /// Total weight held for a delegate across all depositors
    DelegateBalance {
        #[arg(long, value_parser = parse_address)]
        delegate: Address,
    },
    /// Address of a delegate's proxy, provisioned or not
    ProxyAddress {
        #[arg(long, value_parser = parse_address)]
        delegate: Address,
    },
    /// Metadata URI of a delegate position
    Uri {
        #[arg(long, value_parser = parse_address)]
        delegate: Address,
    },
    /// Check ledger and custody invariants
    Audit,
}

#[derive(Serialize, Deserialize)]
struct Wallet {
    secret_key: String,
    public_key: String,
}

impl Wallet {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read wallet {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn to_keypair(&self) -> Result<SigningKey> {
        let secret = hex::decode(&self.secret_key)?;
        Ok(SigningKey::from_bytes(secret.as_slice().try_into()?))
    }

    fn address(&self) -> Result<Address> {
        Ok(parse_address(&self.public_key)?)
    }
}

/// On-disk form of [`ProcessorConfig`], with the asset as hex.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ConfigFile {
    asset: String,
    #[serde(default)]
    uri_template: Option<String>,
    #[serde(default)]
    settlement: SettlementMode,
}

impl ConfigFile {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content).context("Invalid config file")
    }

    fn into_config(self) -> Result<ProcessorConfig> {
        let asset = parse_address(&self.asset).context("Invalid asset in config")?;
        Ok(ProcessorConfig {
            asset,
            uri_template: self.uri_template,
            settlement: self.settlement,
        })
    }
}

/// Loads the stored state and applies a per-invocation settlement override. Returns the
/// stored mode alongside so [`persist`] can put it back before writing.
fn load_state(
    storage: &Storage,
    settlement: Option<SettlementMode>,
) -> Result<(GlobalState, SettlementMode)> {
    let mut state = storage
        .load_state()?
        .ok_or_else(|| anyhow!("No processor state found, run `init` first"))?;
    let stored = state.config.settlement;
    if let Some(mode) = settlement {
        state.config.settlement = mode;
    }
    Ok((state, stored))
}

/// Writes `state` under its stored settlement mode, together with `receipt` if given.
fn persist(
    storage: &Storage,
    state: &mut GlobalState,
    stored: SettlementMode,
    receipt: Option<&CallReceipt>,
) -> Result<()> {
    let active = std::mem::replace(&mut state.config.settlement, stored);
    let written = storage.commit(state, receipt);
    state.config.settlement = active;
    written
}

/// Signs `instruction` with the wallet key at the sender's next nonce, executes it and
/// commits the new state together with the receipt.
fn submit(
    storage: &Storage,
    state: &mut GlobalState,
    stored: SettlementMode,
    key: &SigningKey,
    instruction: DelegationInstruction,
) -> Result<CallReceipt> {
    let call = signed_call(key, state.nonce_of(&address_of(key)), instruction);
    let receipt = execute_call(&call, state).context("Call rejected")?;
    persist(storage, state, stored, Some(&receipt))?;
    Ok(receipt)
}

fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Wallet => {
            let kp = generate_keypair();
            let wallet = Wallet {
                secret_key: hex::encode(kp.to_bytes()),
                public_key: hex::encode(address_of(&kp)),
            };
            wallet.save(&cli.wallet_path)?;
            println!("Wallet initialized at {:?}", cli.wallet_path);
            println!("Public Key: {}", wallet.public_key);
            return Ok(());
        }
        Commands::Init {
            asset,
            uri_template,
        } => {
            let storage = Storage::open(&cli.data_dir)?;
            if storage.load_state()?.is_some() {
                bail!("Processor state already exists at {}", cli.data_dir.display());
            }

            let file_config = match &cli.config {
                Some(path) => Some(ConfigFile::load(path)?.into_config()?),
                None => None,
            };
            let mut config = match (*asset, file_config) {
                (Some(asset), Some(mut config)) => {
                    config.asset = asset;
                    config
                }
                (Some(asset), None) => ProcessorConfig::new(asset),
                (None, Some(config)) => config,
                (None, None) => bail!("An asset is required: pass --asset or --config"),
            };
            if uri_template.is_some() {
                config.uri_template = uri_template.clone();
            }
            if let Some(mode) = cli.settlement {
                config.settlement = mode;
            }

            let state = GlobalState::new(config);
            storage.save_state(&state)?;
            info!(asset = %hex::encode(state.config.asset), settlement = ?state.config.settlement, "Processor initialized");
            println!("Processor: {}", hex::encode(state.registry.processor()));
            return Ok(());
        }
        _ => {}
    }

    // The open handle locks the data directory until this invocation returns.
    let storage = Storage::open(&cli.data_dir).context("Failed to initialize storage")?;
    let (mut state, stored) = load_state(&storage, cli.settlement)?;

    match &cli.command {
        Commands::Wallet | Commands::Init { .. } => {}
        Commands::Show => {
            println!("Asset: {}", hex::encode(state.config.asset));
            println!("Processor: {}", hex::encode(state.registry.processor()));
            println!("Settlement: {:?}", state.config.settlement);
            println!("Proxies: {}", state.registry.len());
            println!("Total supply: {}", state.token.total_supply());
            println!("State root: {}", hex::encode(state.root_hash()));
            if let Ok(wallet) = Wallet::load(&cli.wallet_path) {
                let address = wallet.address()?;
                println!("Wallet: {}", wallet.public_key);
                println!("Nonce: {}", state.nonce_of(&address));
                println!("Calls: {}", storage.receipts_of(&address)?.len());
                for (delegate, amount) in state.ledger.entries_of(&address) {
                    println!("  {} -> {}", hex::encode(delegate), amount);
                }
            }
        }
        Commands::Mint { amount, to } => {
            let to = match to {
                Some(addr) => *addr,
                None => Wallet::load(&cli.wallet_path)?.address()?,
            };
            state
                .token
                .mint(to, *amount)
                .map_err(|e| anyhow!("Mint failed: {e}"))?;
            persist(&storage, &mut state, stored, None)?;
            info!(to = %hex::encode(to), amount = %amount, "Minted");
            println!("Balance: {}", state.token.balance_of(&to));
        }
        Commands::Approve { amount } => {
            let kp = Wallet::load(&cli.wallet_path)?.to_keypair()?;
            let receipt = submit(
                &storage,
                &mut state,
                stored,
                &kp,
                DelegationInstruction::ApproveProcessor { amount: *amount },
            )?;
            println!("Call: {}", hex::encode(receipt.call_id));
        }
        Commands::Delegate {
            sources,
            targets,
            amounts,
        } => {
            let kp = Wallet::load(&cli.wallet_path)?.to_keypair()?;
            let receipt = submit(
                &storage,
                &mut state,
                stored,
                &kp,
                DelegationInstruction::DelegateMulti {
                    sources: sources.clone(),
                    targets: targets.clone(),
                    amounts: amounts.clone(),
                },
            )?;
            println!("Call: {}", hex::encode(receipt.call_id));
            if let Some(delegation) = receipt.delegation {
                for step in &delegation.plan {
                    let side = |d: &Option<Address>| d.map_or_else(|| "wallet".to_string(), hex::encode);
                    println!("  {} -> {}: {}", side(&step.from), side(&step.to), step.amount);
                }
                println!("Asset moves: {}", delegation.moves.len());
            }
        }
        Commands::Balance { address, delegate } => {
            let address = match address {
                Some(addr) => *addr,
                None => Wallet::load(&cli.wallet_path)?.address()?,
            };
            match delegate {
                Some(delegate) => println!("{}", state.balance_of(&address, delegate)),
                None => println!("{}", state.token.balance_of(&address)),
            }
        }
        Commands::DelegateBalance { delegate } => {
            println!("Held: {}", state.get_balance_for_delegate(delegate));
            println!("Votes: {}", state.token.get_votes(delegate));
        }
        Commands::ProxyAddress { delegate } => {
            let address = retrieve_proxy_contract_address(&state.config.asset, delegate);
            let status = if state.registry.is_provisioned(delegate) {
                "provisioned"
            } else {
                "not provisioned"
            };
            println!("{} ({status})", hex::encode(address));
        }
        Commands::Uri { delegate } => match state.uri(delegate) {
            Some(uri) => println!("{uri}"),
            None => bail!("No URI template configured"),
        },
        Commands::Audit => {
            state.audit().context("Audit failed")?;
            println!("OK {}", hex::encode(state.root_hash()));
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(cli) {
        if let Some(CallError::Delegation(err)) = e.downcast_ref::<CallError>() {
            if err.is_fatal() {
                error!(error = %err, "Fatal delegation error, halting");
                std::process::exit(2);
            }
        }
        return Err(e);
    }
    Ok(())
}

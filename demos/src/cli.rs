use std::{path::Path, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};
use didcomm_connect::{
    AskarStateStorage, Error, HandshakeConfig, LocalKms, MemoryStateStore, Outcome, PairwiseAgent,
    SecureStorage, Snapshot, StateKey, StateStore,
    did::DidMethod,
    handshake::Version,
    messages::Message,
};
use tokio::io::AsyncReadExt;
use tracing::{info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_ENTRY: &str = "config";

#[derive(Debug, Parser)]
#[command(name = "didcomm-connect")]
#[command(about = "Establish pairwise DIDComm connections", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "wallet", help = "Wallet name")]
    wallet: String,
    #[arg(long, default_value = "unsecure", help = "Wallet password")]
    password: String,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum HandshakeArg {
    /// connections/1.0
    Legacy,
    /// didexchange/1.0
    Current,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DidMethodArg {
    Peer,
    Sov,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Set up the agent of this wallet
    #[command(arg_required_else_help = true)]
    Init {
        label: String,
        endpoint: url::Url,
        #[arg(long, value_enum, default_value = "current")]
        handshake: HandshakeArg,
        #[arg(long, value_enum, default_value = "peer")]
        did_method: DidMethodArg,
    },
    /// Print a new invitation
    Invite {
        #[arg(long)]
        id: Option<String>,
    },
    /// Accept the invitation read from stdin and print the request
    Accept,
    /// Handle the handshake message read from stdin and print the reply, if any
    Receive,
    /// Print the state of a relationship
    #[command(arg_required_else_help = true)]
    Status { did: String, nonce: String },
    /// Pack the message read from stdin for an established relationship
    #[command(arg_required_else_help = true)]
    Send { did: String, nonce: String },
    /// Unpack a message read from stdin
    Open,
}

struct Wallet {
    vault: AskarStateStorage,
    store: MemoryStateStore,
    kms: LocalKms,
}

impl Wallet {
    async fn open(name: &str, password: &str) -> Result<Self, Error> {
        let url = format!("sqlite://{name}.sqlite");
        let store = MemoryStateStore::new();
        let kms = LocalKms::new();

        let vault = if Path::new(&format!("{name}.sqlite")).exists() {
            let vault = AskarStateStorage::open(&url, password.as_bytes()).await?;
            vault.read().await?.restore(&store, &kms)?;
            trace!("opened wallet {name}");

            vault
        } else {
            info!("created new wallet {name}");
            AskarStateStorage::new(&url, password.as_bytes()).await?
        };

        Ok(Self { vault, store, kms })
    }

    fn agent(&self) -> Result<PairwiseAgent, Error> {
        let config = self
            .store
            .get(CONFIG_ENTRY)?
            .ok_or(Error::MissingField("config"))?;
        let config: HandshakeConfig = serde_json::from_slice(&config)?;

        Ok(PairwiseAgent::from_config(
            config,
            self.kms.clone(),
            Arc::new(self.store.clone()),
        ))
    }

    async fn close(self) -> Result<(), Error> {
        self.vault
            .persist(Snapshot::capture(&self.store, &self.kms)?)
            .await?;

        self.vault.close().await
    }
}

async fn read_stdin() -> Vec<u8> {
    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .expect("Could not read from stdin");

    input
}

async fn run() -> Result<(), Error> {
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .without_time()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if args.verbose {
                    "didcomm_connect=trace"
                } else {
                    "didcomm_connect=info"
                }
                .into()
            }),
        )
        .init();

    let wallet = Wallet::open(&args.wallet, &args.password).await?;

    match args.command {
        Commands::Init {
            label,
            endpoint,
            handshake,
            did_method,
        } => {
            let version = match handshake {
                HandshakeArg::Legacy => Version::Legacy,
                HandshakeArg::Current => Version::Current,
            };
            let did_method = match did_method {
                DidMethodArg::Peer => DidMethod::Peer,
                DidMethodArg::Sov => DidMethod::Sov,
            };
            let config = HandshakeConfig::new(&label, endpoint)
                .with_version(version)
                .with_did_method(did_method);

            wallet
                .store
                .put(CONFIG_ENTRY, serde_json::to_vec(&config)?)?;

            info!("{label} will be reachable at {}", config.endpoint);
        }
        Commands::Invite { id } => {
            let agent = wallet.agent()?;
            let invitation = match id {
                Some(id) => agent.callee().invite_with_id(&id)?,
                None => agent.callee().invite()?,
            };

            println!("{}", String::from_utf8_lossy(&invitation.encode()?));
        }
        Commands::Accept => {
            let agent = wallet.agent()?;
            let invitation = Message::decode(&read_stdin().await)?;
            let (state_key, outbound) = agent.caller().connect(&invitation.invitation_target()?)?;

            info!("sending request to {} ({state_key})", outbound.endpoint);
            println!("{}", String::from_utf8_lossy(&outbound.message));
        }
        Commands::Receive => {
            let agent = wallet.agent()?;

            match agent.handle_inbound(&read_stdin().await)? {
                Outcome::Reply {
                    state_key,
                    outbound,
                } => {
                    info!("sending reply to {} ({state_key})", outbound.endpoint);
                    println!("{}", String::from_utf8_lossy(&outbound.message));
                }
                Outcome::Completed { state_key } => {
                    info!("connection {state_key} established");
                }
                Outcome::Duplicate { state_key } => {
                    warn!("message for {state_key} was already handled");
                }
                Outcome::Problem(report) => {
                    warn!("problem report: {} {}", report.problem_code, report.explain);
                }
            }
        }
        Commands::Status { did, nonce } => {
            let agent = wallet.agent()?;
            let state_key = StateKey::new(&did, &nonce);

            match agent.tracker().status(&state_key)? {
                Some(status) => println!("{:?} with {}", status.state, status.theirs.did),
                None => return Err(Error::MissingPendingState(state_key.to_string())),
            }
        }
        Commands::Send { did, nonce } => {
            let agent = wallet.agent()?;
            let outbound = agent.pack_for(&StateKey::new(&did, &nonce), &read_stdin().await)?;

            info!("deliver to {}", outbound.endpoint);
            println!("{}", String::from_utf8_lossy(&outbound.message));
        }
        Commands::Open => {
            let agent = wallet.agent()?;
            let envelope = agent.unpack(&read_stdin().await)?;

            if let Some(sender) = envelope.from_key {
                info!("received message from {sender}");
            }
            println!("{}", String::from_utf8_lossy(&envelope.message));
        }
    }

    wallet.close().await
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

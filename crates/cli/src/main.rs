mod config;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use permitter::policies::{authorize_acquire, authorize_release};
use permitter::{
    AcquireRequest, Account, Acquisition, Authorization, Capabilities, CapabilityId, Context,
    IdentityId, Permitter, Persistent, Release, ReleaseRequest, capability,
};
use registry::{AnyPermitter, Registry};
use storage::{DecisionLog, Event, StateStore};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "permitter.toml";

#[derive(Parser)]
#[command(name = "permitter")]
#[command(about = "Grant and release time-bound identity permits", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "PERMITTER_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which capabilities the configured permitter supports
    Capabilities,
    /// Compute the capability id of an interface from its method signatures
    CapabilityId {
        /// Method signatures, e.g. "supportsCapability(bytes4)"
        #[arg(required = true)]
        signatures: Vec<String>,
    },
    /// Ask for a permit to hold an identity
    Acquire {
        #[arg(short, long)]
        identity: IdentityId,
        /// Requesting account
        #[arg(short, long)]
        account: Account,
        /// Requested lifetime in seconds
        #[arg(short, long)]
        duration: u64,
        /// Context bytes (hex)
        #[arg(long, value_parser = Context::from_hex)]
        context: Option<Context>,
        /// Authorization bytes (hex)
        #[arg(long, value_parser = Authorization::from_hex)]
        authorization: Option<Authorization>,
    },
    /// Give up a permit
    Release {
        #[arg(short, long)]
        identity: IdentityId,
        /// Possessing account
        #[arg(short, long)]
        account: Account,
        /// Context bytes (hex)
        #[arg(long, value_parser = Context::from_hex)]
        context: Option<Context>,
        /// Authorization bytes (hex)
        #[arg(long, value_parser = Authorization::from_hex)]
        authorization: Option<Authorization>,
    },
    /// Sign an acquire authorization with an Ed25519 authority seed
    SignAcquire {
        /// 32-byte signing seed (hex)
        #[arg(long, env = "PERMITTER_SIGNING_SEED", hide_env_values = true)]
        seed: String,
        #[arg(short, long)]
        identity: IdentityId,
        #[arg(short, long)]
        account: Account,
        #[arg(short, long)]
        duration: u64,
        /// Single-use nonce; defaults to the current time in nanoseconds
        #[arg(short, long)]
        nonce: Option<u64>,
        #[arg(long, value_parser = Context::from_hex)]
        context: Option<Context>,
    },
    /// Sign a release authorization with an Ed25519 authority seed
    SignRelease {
        /// 32-byte signing seed (hex)
        #[arg(long, env = "PERMITTER_SIGNING_SEED", hide_env_values = true)]
        seed: String,
        #[arg(short, long)]
        identity: IdentityId,
        #[arg(short, long)]
        account: Account,
        #[arg(short, long)]
        nonce: Option<u64>,
        #[arg(long, value_parser = Context::from_hex)]
        context: Option<Context>,
    },
    /// Show the decision log
    Log {
        /// Only events for this identity
        #[arg(short, long)]
        identity: Option<IdentityId>,
        /// Filter by event kind (bound, acquired, acquire_denied, released, release_refused, fault)
        #[arg(short, long, requires = "identity")]
        kind: Option<String>,
        /// Show only the last N events
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Capabilities => cmd_capabilities(&cli.config).await,
        Commands::CapabilityId { signatures } => {
            cmd_capability_id(&signatures);
            Ok(())
        }
        Commands::Acquire {
            identity,
            account,
            duration,
            context,
            authorization,
        } => {
            let request = AcquireRequest::new(identity, account, Duration::from_secs(duration))
                .with_context(context.unwrap_or_default())
                .with_authorization(authorization.unwrap_or_default());
            cmd_acquire(&cli.config, &request).await
        }
        Commands::Release {
            identity,
            account,
            context,
            authorization,
        } => {
            let request = ReleaseRequest::new(identity, account)
                .with_context(context.unwrap_or_default())
                .with_authorization(authorization.unwrap_or_default());
            cmd_release(&cli.config, &request).await
        }
        Commands::SignAcquire {
            seed,
            identity,
            account,
            duration,
            nonce,
            context,
        } => {
            let key = signing_key(&seed)?;
            let auth = authorize_acquire(
                &key,
                &identity,
                &account,
                Duration::from_secs(duration),
                nonce.unwrap_or_else(default_nonce),
                &context.unwrap_or_default(),
            );
            println!("{}", auth.to_hex());
            Ok(())
        }
        Commands::SignRelease {
            seed,
            identity,
            account,
            nonce,
            context,
        } => {
            let key = signing_key(&seed)?;
            let auth = authorize_release(
                &key,
                &identity,
                &account,
                nonce.unwrap_or_else(default_nonce),
                &context.unwrap_or_default(),
            );
            println!("{}", auth.to_hex());
            Ok(())
        }
        Commands::Log {
            identity,
            kind,
            limit,
        } => cmd_log(&cli.config, identity, kind.as_deref(), limit),
    }
}

async fn cmd_capabilities(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let permitter = AnyPermitter::from_config(&config.permitter).await?;

    println!("Permitter: {} ({})", permitter.kind(), permitter.negotiation());
    println!("{:<22}  {:<10}  SUPPORTED", "CAPABILITY", "ID");
    println!("{}", "-".repeat(46));
    let well_known = [
        ("capability-discovery", *capability::CAPABILITY_DISCOVERY),
        ("permitter", *capability::PERMITTER),
        ("configurable", *capability::CONFIGURABLE),
        ("approver", *capability::APPROVER),
        ("invalid", CapabilityId::INVALID),
    ];
    for (name, id) in well_known {
        let supported = if permitter.supports_capability(id) {
            "yes"
        } else {
            "no"
        };
        println!("{name:<22}  {:<10}  {supported}", id.to_string());
    }
    Ok(())
}

fn cmd_capability_id(signatures: &[String]) {
    for signature in signatures {
        println!(
            "{}  {signature}",
            hex::encode(CapabilityId::selector(signature))
        );
    }
    println!("{}", CapabilityId::from_signatures(signatures));
}

async fn cmd_acquire(config_path: &Path, request: &AcquireRequest) -> Result<()> {
    let config = Config::load(config_path)?;

    match acquire(&config, request).await? {
        Acquisition::Granted { expiry } => {
            let local = Local.from_utc_datetime(&expiry.naive_utc());
            println!("granted until {} ({})", expiry.to_rfc3339(), local.format("%Y-%m-%d %H:%M:%S"));
        }
        Acquisition::Denied { reason } => println!("denied: {reason}"),
    }
    Ok(())
}

async fn cmd_release(config_path: &Path, request: &ReleaseRequest) -> Result<()> {
    let config = Config::load(config_path)?;

    match release(&config, request).await? {
        Release::Gone => println!("released"),
        Release::Retained { reason } => println!("retained: {reason}"),
    }
    Ok(())
}

fn cmd_log(config_path: &Path, identity: Option<IdentityId>, kind: Option<&str>, limit: usize) -> Result<()> {
    let db_path = match Config::load(config_path) {
        Ok(config) => database_path(&config)?,
        Err(e) => {
            debug!(error = %e, "no usable config, using default decision log");
            default_database_path()?
        }
    };
    if !db_path.exists() {
        return Err(Error::DatabaseNotFound { path: db_path });
    }
    let log = DecisionLog::open(&db_path)?;

    let events = match identity {
        Some(identity) => {
            let mut events = log.load_identity(identity, kind)?;
            let skip = events.len().saturating_sub(limit);
            events.drain(..skip);
            events
        }
        None => {
            let mut events = log.recent(limit)?;
            events.reverse();
            events
        }
    };

    if events.is_empty() {
        println!("No events found.");
        return Ok(());
    }
    for event in &events {
        print_event(event);
    }
    Ok(())
}

fn print_event(event: &Event) {
    let time = Local
        .from_utc_datetime(&event.timestamp.naive_utc())
        .format("%Y-%m-%d %H:%M:%S");
    println!("[{time}] {event}");
}

/// Acquire with the policy state of earlier invocations restored, saving
/// the updated state once the decision is made.
async fn acquire(config: &Config, request: &AcquireRequest) -> Result<Acquisition> {
    let (registry, permitter) = open_registry(config).await?;
    let mut store = open_state(config)?;
    let txn = store.begin()?;
    permitter.restore(txn.load(permitter.kind())?)?;

    let acquisition = registry.acquire(request).await?;
    txn.save(permitter.kind(), &permitter.snapshot())?;
    txn.commit()?;
    Ok(acquisition)
}

async fn release(config: &Config, request: &ReleaseRequest) -> Result<Release> {
    let (registry, permitter) = open_registry(config).await?;
    let mut store = open_state(config)?;
    let txn = store.begin()?;
    permitter.restore(txn.load(permitter.kind())?)?;

    let outcome = registry.release(request).await?;
    txn.save(permitter.kind(), &permitter.snapshot())?;
    txn.commit()?;
    Ok(outcome)
}

async fn open_registry(config: &Config) -> Result<(Registry<AnyPermitter>, Arc<AnyPermitter>)> {
    let permitter = Arc::new(AnyPermitter::from_config(&config.permitter).await?);
    let mut registry = Registry::new().with_max_lifetime(config.registry.max_lifetime());
    if config.log.enabled {
        let path = database_path(config)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        registry = registry.with_log(DecisionLog::open(&path)?);
    }
    for identity in config.permitter.identities() {
        registry.bind(identity, permitter.clone())?;
    }
    Ok((registry, permitter))
}

fn open_state(config: &Config) -> Result<StateStore> {
    let path = match &config.state.database {
        Some(path) => path.clone(),
        None => dirs_data_dir().map(|dir| dir.join("state.db")).ok_or(Error::NoDataDir)?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(StateStore::open(&path)?)
}

fn signing_key(seed: &str) -> Result<SigningKey> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(seed.trim_start_matches("0x"), &mut bytes)
        .map_err(|e| Error::InvalidArgument(format!("seed must be 32 hex bytes: {e}")))?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn default_nonce() -> u64 {
    let now = chrono::Utc::now();
    now.timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or_default()
}

fn database_path(config: &Config) -> Result<PathBuf> {
    match &config.log.database {
        Some(path) => Ok(path.clone()),
        None => default_database_path(),
    }
}

fn default_database_path() -> Result<PathBuf> {
    dirs_data_dir()
        .map(|dir| dir.join("decisions.db"))
        .ok_or(Error::NoDataDir)
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/permitter"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("permitter"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("permitter"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
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
    fn parses_acquire_arguments() {
        let cli = Cli::try_parse_from([
            "permitter",
            "acquire",
            "--identity",
            "0x0101010101010101010101010101010101010101010101010101010101010101",
            "--account",
            "0x0202020202020202020202020202020202020202",
            "--duration",
            "600",
            "--authorization",
            "deadbeef",
        ])
        .unwrap();
        match cli.command {
            Commands::Acquire {
                identity,
                account,
                duration,
                context,
                authorization,
            } => {
                assert_eq!(identity, IdentityId([1; 32]));
                assert_eq!(account, Account([2; 20]));
                assert_eq!(duration, 600);
                assert!(context.is_none());
                assert_eq!(
                    authorization.unwrap().as_bytes(),
                    &[0xde, 0xad, 0xbe, 0xef]
                );
            }
            _ => panic!("expected acquire"),
        }
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE));
    }

    #[test]
    fn rejects_short_identity() {
        let parsed = Cli::try_parse_from([
            "permitter",
            "release",
            "--identity",
            "0x01",
            "--account",
            "0x0202020202020202020202020202020202020202",
        ]);
        assert!(parsed.is_err());
    }

    struct Scratch {
        dir: PathBuf,
        config: Config,
        authority: SigningKey,
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    const IDENTITY: IdentityId = IdentityId([1; 32]);
    const HOLDER: Account = Account([2; 20]);

    fn scratch() -> Scratch {
        let dir = std::env::temp_dir().join(format!("permitter-cli-{}", uuid::Uuid::new_v4()));
        let authority = SigningKey::from_bytes(&[7; 32]);
        let config = Config::parse(&format!(
            r#"
            [log]
            database = "{log}"

            [state]
            database = "{state}"

            [permitter]
            kind = "signature"
            max_duration_secs = 600

            [permitter.keys]
            "{IDENTITY}" = "{key}"
            "#,
            log = dir.join("decisions.db").display(),
            state = dir.join("state.db").display(),
            key = hex::encode(authority.verifying_key().as_bytes()),
        ))
        .unwrap();
        Scratch {
            dir,
            config,
            authority,
        }
    }

    impl Scratch {
        fn acquire(&self, nonce: u64) -> AcquireRequest {
            let duration = Duration::from_secs(60);
            let auth = authorize_acquire(
                &self.authority,
                &IDENTITY,
                &HOLDER,
                duration,
                nonce,
                &Context::empty(),
            );
            AcquireRequest::new(IDENTITY, HOLDER, duration).with_authorization(auth)
        }

        fn release(&self, nonce: u64) -> ReleaseRequest {
            let auth = authorize_release(&self.authority, &IDENTITY, &HOLDER, nonce, &Context::empty());
            ReleaseRequest::new(IDENTITY, HOLDER).with_authorization(auth)
        }
    }

    #[tokio::test]
    async fn used_nonce_stays_used_across_invocations() {
        let s = scratch();
        assert!(acquire(&s.config, &s.acquire(1)).await.unwrap().is_allowed());

        // Each call rebuilds the permitter from config, as separate runs do.
        let replay = acquire(&s.config, &s.acquire(1)).await.unwrap();
        assert_eq!(replay, Acquisition::denied("nonce already used"));
    }

    #[tokio::test]
    async fn grant_outlives_the_invocation_that_made_it() {
        let s = scratch();
        assert!(acquire(&s.config, &s.acquire(1)).await.unwrap().is_allowed());

        assert!(!release(&s.config, &s.release(1)).await.unwrap().is_gone());
        assert!(release(&s.config, &s.release(2)).await.unwrap().is_gone());
        assert!(release(&s.config, &s.release(3)).await.unwrap().is_gone());

        let log = DecisionLog::open(s.dir.join("decisions.db")).unwrap();
        let refused = log.load_identity(IDENTITY, Some("release_refused")).unwrap();
        assert_eq!(refused.len(), 1);
    }

    #[test]
    fn signing_key_requires_32_bytes() {
        assert!(signing_key(&"11".repeat(32)).is_ok());
        assert!(matches!(
            signing_key("1234"),
            Err(Error::InvalidArgument(_))
        ));
    }
}

//! `quiver-fetch`: find records through a store and print them as JSON.
//!
//! ```text
//! quiver-fetch [--config PATH] [--origin URL] [--force] [--limit N]
//!              [--filter FIELD=VALUE]... [--state-out PATH] TYPE [ID]
//! ```

use quiver_core::{ConfigError, FindOptions, ModelRegistry, StoreConfig, StoreError};
use quiver_http::{HttpTransport, HttpTransportError};
use quiver_store::{StateBox, Store};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] HttpTransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Default, PartialEq)]
struct FetchArgs {
    record_type: String,
    id: Option<String>,
    origin: Option<String>,
    force: bool,
    limit: Option<u32>,
    filters: Vec<(String, String)>,
    state_out: Option<PathBuf>,
}

impl FetchArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, FetchError> {
        let mut parsed = FetchArgs::default();
        let mut positional = Vec::new();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                // Read by StoreConfig::load.
                "--config" => {
                    args.next();
                }
                "--origin" => parsed.origin = Some(value_for(&mut args, "--origin")?),
                "--force" => parsed.force = true,
                "--limit" => {
                    let raw = value_for(&mut args, "--limit")?;
                    let limit = raw
                        .parse()
                        .map_err(|_| FetchError::Usage(format!("--limit expects a number, got {:?}", raw)))?;
                    parsed.limit = Some(limit);
                }
                "--filter" => {
                    let raw = value_for(&mut args, "--filter")?;
                    let (field, value) = raw
                        .split_once('=')
                        .ok_or_else(|| FetchError::Usage(format!("--filter expects FIELD=VALUE, got {:?}", raw)))?;
                    parsed.filters.push((field.to_string(), value.to_string()));
                }
                "--state-out" => parsed.state_out = Some(PathBuf::from(value_for(&mut args, "--state-out")?)),
                flag if flag.starts_with("--") => {
                    return Err(FetchError::Usage(format!("unknown option {}", flag)));
                }
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        parsed.record_type = positional
            .next()
            .ok_or_else(|| FetchError::Usage("usage: quiver-fetch [options] TYPE [ID]".to_string()))?;
        parsed.id = positional.next();
        if let Some(extra) = positional.next() {
            return Err(FetchError::Usage(format!("unexpected argument {:?}", extra)));
        }
        Ok(parsed)
    }

    fn find_options(&self) -> FindOptions {
        let mut opts = FindOptions::new();
        if self.force {
            opts = opts.force_reload();
        }
        if let Some(limit) = self.limit {
            opts = opts.limit(limit);
        }
        for (field, value) in &self.filters {
            opts = opts.filter(field.clone(), value.clone());
        }
        opts
    }
}

fn value_for(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, FetchError> {
    args.next()
        .ok_or_else(|| FetchError::Usage(format!("{} expects a value", flag)))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quiver_store=info,quiver_http=info,warn"));
    let registry = tracing_subscriber::registry().with(env_filter);
    // Logs go to stderr so stdout stays pure JSON.
    let result = if std::env::var("QUIVER_LOG_FORMAT").is_ok_and(|format| format == "json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("Failed to init tracing: {}", err);
    }
}

async fn run() -> Result<(), FetchError> {
    let args = FetchArgs::parse(std::env::args().skip(1))?;
    let mut config = StoreConfig::load()?;
    if let Some(origin) = &args.origin {
        config = config.with_origin(origin.clone());
    }

    let transport = HttpTransport::from_config(&config)?;
    tracing::info!(origin = transport.origin(), record_type = %args.record_type, id = ?args.id, "Fetching");
    let store = Store::new(config, ModelRegistry::new(), Arc::new(transport));

    let node = store
        .find(&args.record_type, args.id.as_deref(), args.find_options())
        .await?;
    println!("{}", serde_json::to_string_pretty(&store.to_json(&node))?);

    if let Some(path) = &args.state_out {
        let mut state_box = StateBox::new();
        store.put_state(&mut state_box)?;
        std::fs::write(path, state_box.to_json_string()?)?;
        tracing::info!(path = %path.display(), "Wrote store state");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("quiver-fetch: {}", err);
        std::process::exit(1);
    }
}

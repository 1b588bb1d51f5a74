//! Whisky Goggles - command-line client
//!
//! Keeps the web client's assets available offline and submits bottle
//! photos to the identification server.

mod history;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use goggles_common::{init_logging, GogglesError};
use goggles_core::AppConfig;
use goggles_net::{HttpFetcher, IdentifyClient, LoaderConfig};
use goggles_sw::{
    CacheRegistration, CacheStore, DiskCacheStore, EventOutcome, FetchPolicy, FetchRequest,
    Fetcher, LifecycleEvent, OfflineCache, ServiceWorkerError,
};
use serde_json::json;
use tracing::{debug, error, info, warn};

use history::IdentificationHistory;

#[derive(Parser, Debug)]
#[command(name = "goggles")]
#[command(about = "Offline asset cache and identification client for Whisky Goggles")]
struct Args {
    /// Path to the JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install and activate the configured asset manifest
    Sync,

    /// Request a path through the offline cache
    Fetch {
        /// Path or URL, resolved against the base URL
        path: String,

        /// Override the configured policy (cache-first, network-first)
        #[arg(long)]
        policy: Option<FetchPolicy>,
    },

    /// Submit a bottle photo for identification
    Identify {
        image: PathBuf,
    },

    /// Show past identifications, newest first
    History {
        /// Forget all entries
        #[arg(long)]
        clear: bool,
    },

    /// List the buckets held in the offline store
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = match AppConfig::load(Some(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("goggles: {}", error_chain(&e));
            return ExitCode::FAILURE;
        }
    };

    let mut log = match config.log_config() {
        Ok(log) => log,
        Err(e) => {
            eprintln!("goggles: {e}");
            return ExitCode::FAILURE;
        }
    };
    if args.verbose {
        log.level = tracing::Level::DEBUG;
        log.filter = None;
    }
    if let Err(e) = init_logging(log) {
        eprintln!("goggles: {e}");
    }

    match run(args.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(category = e.category(), error = %e, "Command failed");
            eprintln!("goggles: {}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}

/// Render an error followed by each of its causes.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

async fn run(command: Command, config: &AppConfig) -> Result<(), GogglesError> {
    match command {
        Command::Sync => {
            let Some(cache) = open_cache(config, None).await? else {
                print_json(&json!({ "cache": null }))?;
                return Ok(());
            };
            let report = sync(&cache, config).await?;
            print_json(&report)
        }
        Command::Fetch { path, policy } => fetch(config, &path, policy).await,
        Command::Identify { image } => identify(config, image).await,
        Command::History { clear } => show_history(config, clear),
        Command::Status => status(config),
    }
}

fn loader_config(config: &AppConfig) -> LoaderConfig {
    let defaults = LoaderConfig::default();
    LoaderConfig {
        user_agent: config.loader.user_agent.clone().unwrap_or(defaults.user_agent),
        default_timeout: config.request_timeout(),
        ..defaults
    }
}

fn print_json(value: &serde_json::Value) -> Result<(), GogglesError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| GogglesError::internal(format!("Failed to render output: {e}")))?;
    println!("{out}");
    Ok(())
}

// ==================== Offline cache ====================

/// Register the cache against the configured origin.
///
/// A registration failure is logged and yields `None`; callers carry on
/// without the cache.
async fn open_cache(
    config: &AppConfig,
    policy: Option<FetchPolicy>,
) -> Result<Option<OfflineCache<DiskCacheStore>>, GogglesError> {
    let base = config.base_url()?;
    let registration = match CacheRegistration::register(
        &base,
        &config.cache.script_path,
        config.cache.scope.as_deref(),
    ) {
        Ok(registration) => registration,
        Err(e) => {
            warn!(error = %e, "Offline cache registration failed, continuing without it");
            return Ok(None);
        }
    };

    let store = DiskCacheStore::open(&config.cache.store_dir).map_err(ServiceWorkerError::from)?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(loader_config(config))?);

    let mut options = config.cache_options();
    if let Some(policy) = policy {
        options.policy = policy;
    }

    let (cache, mut events) = OfflineCache::new(registration, store, fetcher, options);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(?event, "Cache event");
        }
    });

    Ok(Some(cache))
}

/// Resume whatever generation is stored, then install and activate the
/// configured manifest on top of it.
async fn sync(
    cache: &OfflineCache<DiskCacheStore>,
    config: &AppConfig,
) -> Result<serde_json::Value, GogglesError> {
    let stored = cache.bucket_names().await;
    let resumed = stored
        .iter()
        .find(|tag| **tag == config.cache.tag)
        .or_else(|| stored.first())
        .cloned();
    if let Some(ref tag) = resumed {
        cache.resume(tag).await;
    }

    let manifest = config.manifest();
    let generation = match cache.handle_event(LifecycleEvent::Install(manifest)).await? {
        EventOutcome::Installed(id) => id,
        other => return Err(GogglesError::internal(format!("unexpected outcome {other:?}"))),
    };
    let report = match cache.handle_event(LifecycleEvent::Activate).await? {
        EventOutcome::Activated(report) => report,
        other => return Err(GogglesError::internal(format!("unexpected outcome {other:?}"))),
    };

    let entries = cache
        .store()
        .read()
        .await
        .entry_count(&report.tag)
        .unwrap_or(0);
    info!(tag = %report.tag, entries, "Offline cache synced");

    Ok(json!({
        "tag": report.tag,
        "generation": generation.raw(),
        "entries": entries,
        "resumed": resumed,
        "deleted": report.deleted,
        "scope": cache.registration().scope.as_str(),
    }))
}

async fn fetch(
    config: &AppConfig,
    path: &str,
    policy: Option<FetchPolicy>,
) -> Result<(), GogglesError> {
    let url = config
        .base_url()?
        .join(path)
        .map_err(|e| GogglesError::InvalidArgument(format!("{path}: {e}")))?;
    let request = FetchRequest::get(url.clone());

    let response = match open_cache(config, policy).await? {
        Some(cache) => {
            if let Err(e) = sync(&cache, config).await {
                warn!(error = %error_chain(&e), "Sync failed, serving from the stored generation");
            }
            cache.handle_event(LifecycleEvent::Fetch(request)).await?
        }
        None => {
            let fetcher = HttpFetcher::new(loader_config(config))?;
            EventOutcome::Response(fetcher.fetch(&request).await.ok())
        }
    };

    match response {
        EventOutcome::Response(Some(response)) => print_json(&json!({
            "url": url.as_str(),
            "status": response.status,
            "source": if response.from_cache { "cache" } else { "network" },
            "bytes": response.body.len(),
        })),
        EventOutcome::Response(None) => Err(GogglesError::NotFound(format!(
            "{url} is neither cached nor reachable"
        ))),
        other => Err(GogglesError::internal(format!("unexpected outcome {other:?}"))),
    }
}

fn status(config: &AppConfig) -> Result<(), GogglesError> {
    let store = DiskCacheStore::open(&config.cache.store_dir).map_err(ServiceWorkerError::from)?;
    let buckets: Vec<_> = store
        .keys()
        .into_iter()
        .map(|name| {
            let entries = store.entry_count(&name).unwrap_or(0);
            json!({ "name": name, "entries": entries, "current": name == config.cache.tag })
        })
        .collect();

    print_json(&json!({
        "store": store.root().display().to_string(),
        "buckets": buckets,
    }))
}

// ==================== Identification ====================

async fn identify(config: &AppConfig, image: PathBuf) -> Result<(), GogglesError> {
    let client = IdentifyClient::new(&config.base_url()?, &loader_config(config))?;
    let details = client.identify_file(&image).await?;

    println!("{}", details.name().unwrap_or("Unknown Bottle"));
    for (key, value) in details.display_fields() {
        println!("  {key}: {value}");
    }
    if let Some(matches) = details.good_matches() {
        println!("  Match Confidence: {matches} keypoints matched");
    }

    let mut history = IdentificationHistory::load(&config.history_path);
    let entry = history.record(&details);
    debug!(name = %entry.name, confidence = entry.confidence, "Recorded identification");
    history.save(&config.history_path)?;
    debug!(entries = history.len(), path = %config.history_path.display(), "History saved");
    Ok(())
}

fn show_history(config: &AppConfig, clear: bool) -> Result<(), GogglesError> {
    let mut history = IdentificationHistory::load(&config.history_path);
    if clear {
        history.clear();
        history.save(&config.history_path)?;
        info!("History cleared");
        return Ok(());
    }

    if history.is_empty() {
        println!("No identifications yet.");
    }
    for entry in history.entries() {
        println!("{entry}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::parse_from(["goggles", "--verbose", "fetch", "/static/js/main.js"]);
        assert!(args.verbose);
        assert!(matches!(
            args.command,
            Command::Fetch { ref path, policy: None } if path == "/static/js/main.js"
        ));

        let args = Args::parse_from([
            "goggles",
            "fetch",
            "/",
            "--policy",
            "network-first",
            "--config",
            "goggles.json",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("goggles.json")));
        assert!(matches!(
            args.command,
            Command::Fetch { policy: Some(FetchPolicy::NetworkFirst), .. }
        ));

        assert!(Args::try_parse_from(["goggles", "fetch", "/", "--policy", "fastest"]).is_err());
    }

    #[test]
    fn test_error_chain_includes_causes() {
        let err = GogglesError::config_with_source(
            "base_url 'nope'",
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "relative URL without a base"),
        );
        assert_eq!(
            error_chain(&err),
            "Config error: base_url 'nope': relative URL without a base"
        );
    }

    #[test]
    fn test_loader_config_uses_configured_timeout() {
        let mut config = AppConfig::default();
        config.loader.timeout_secs = 5;
        config.loader.user_agent = Some("goggles-test".to_string());

        let loader = loader_config(&config);
        assert_eq!(loader.default_timeout, std::time::Duration::from_secs(5));
        assert_eq!(loader.user_agent, "goggles-test");
    }
}

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use fieldsync::{
  Config, Error, GetOptions, HttpTransport, MutationMethod, NetworkMonitor, OfflineApi, Probe,
  SqliteStorage,
};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Api = OfflineApi<SqliteStorage, HttpTransport>;

#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Offline cache and sync queue for the field-operations API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the API as unreachable instead of probing it
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read a resource (served from cache when offline)
  Get {
    path: String,
    /// Query string, without the leading '?'
    #[arg(short, long)]
    query: Option<String>,
    /// Print null instead of failing on 404
    #[arg(long)]
    null_on_404: bool,
  },
  /// Send a write (queued when offline)
  Mutate {
    /// POST, PATCH, PUT or DELETE
    method: MutationMethod,
    path: String,
    /// JSON request body
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Replay queued writes now
  Sync,
  /// Show connectivity, pending changes and last sync time
  Status,
  /// Drop cached responses whose key contains FRAGMENT
  Invalidate {
    fragment: Option<String>,
    /// Drop every cached response
    #[arg(long, conflicts_with = "fragment")]
    all: bool,
  },
  /// Forget cached responses and pending changes
  Reset,
  /// Keep probing the API and sync every time it comes back
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&args.command, &config)?;

  let storage = Arc::new(SqliteStorage::open(&config.storage_path()?)?);
  let transport = HttpTransport::new(&config.api.base_url)?;
  let network = NetworkMonitor::new(false);
  let probe = Probe::new(
    transport.clone(),
    network.clone(),
    &config.network.probe_path,
    config.probe_interval(),
  );
  if !args.offline {
    probe.check().await;
  }

  let api: Arc<Api> = Arc::new(OfflineApi::from_config(
    &config, storage, transport, network,
  ));

  match args.command {
    Command::Get {
      path,
      query,
      null_on_404,
    } => {
      let opts = GetOptions {
        return_null_on_404: null_on_404,
      };
      let data: Option<Value> = api.get(&path, query.as_deref(), opts).await?;
      print_json(&data)?;
    }
    Command::Mutate { method, path, body } => {
      let body = body
        .map(|b| serde_json::from_str::<Value>(&b))
        .transpose()
        .map_err(|e| eyre!("--body is not valid JSON: {}", e))?;

      match api.mutate::<Value>(method, &path, body).await {
        Ok(result) => print_json(&result)?,
        Err(Error::Queued { id }) => println!("Offline: queued for sync ({})", id),
        Err(e) => return Err(e.into()),
      }
    }
    Command::Sync => {
      if !api.is_online() {
        return Err(eyre!(
          "API unreachable, {} change(s) stay queued",
          api.pending_count().await?
        ));
      }
      let report = api.perform_sync().await?;
      print_json(&report)?;
    }
    Command::Status => print_json(&api.status().await?)?,
    Command::Invalidate { fragment, all } => {
      let removed = if all {
        api.clear_cache().await?
      } else {
        let fragment = fragment.ok_or_else(|| eyre!("Give a key fragment or --all"))?;
        api.invalidate_by_prefix(&fragment).await?
      };
      println!("Removed {} cached response(s)", removed);
    }
    Command::Reset => {
      api.reset().await?;
      println!("Cleared cached responses and pending changes");
    }
    Command::Watch => watch(api, probe, args.offline, &config).await?,
  }

  Ok(())
}

/// Run until Ctrl-C: probe connectivity, log transitions, replay the queue
/// on every reconnect.
async fn watch(
  api: Arc<Api>,
  probe: Probe<HttpTransport>,
  offline: bool,
  config: &Config,
) -> Result<()> {
  println!(
    "Watching {} (logs in {})",
    config.api.base_url,
    config.log_dir()?.display()
  );

  let pending = Arc::clone(&api);
  let subscription = api.network().subscribe(
    move || tracing::info!("connectivity restored"),
    move || {
      let api = Arc::clone(&pending);
      tokio::spawn(async move {
        if let Ok(count) = api.pending_count().await {
          tracing::warn!(pending = count, "connectivity lost, writes will be queued");
        }
      });
    },
  );
  let auto_sync = api.spawn_auto_sync();

  // Changes left over from an earlier run
  if api.is_online() && api.pending_count().await? > 0 {
    let report = api.perform_sync().await?;
    tracing::info!(synced = report.synced, failed = report.failed, "startup sync");
  }

  let probing = if offline { None } else { Some(probe.spawn()) };

  tokio::signal::ctrl_c().await?;

  if let Some(handle) = probing {
    handle.abort();
  }
  auto_sync.abort();
  subscription.unsubscribe();
  Ok(())
}

fn init_tracing(command: &Command, config: &Config) -> Result<Option<WorkerGuard>> {
  // Defaults to "info" for this crate, can be overridden with RUST_LOG
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "fieldsync=info".into());

  if matches!(command, Command::Watch) {
    let dir = config.log_dir()?;
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
    let appender = tracing_appender::rolling::daily(&dir, "fieldsync.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
      .with(filter)
      .with(
        tracing_subscriber::fmt::layer()
          .with_writer(writer)
          .with_ansi(false),
      )
      .init();
    return Ok(Some(guard));
  }

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();
  Ok(None)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

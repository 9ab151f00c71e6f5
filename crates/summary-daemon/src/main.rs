//! summary-sync: keeps a local file in sync with a case summary.
//!
//! Edit the file in any editor. Changes are mirrored to other editors over
//! the presence hub while typing and saved to the server once the file has
//! been quiet for the debounce period. Send SIGUSR1 to save immediately.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use summary_core::{
    CaseId, PresenceEvent, Subscription, SummaryEvent, SummarySync, SyncSettings,
};
use summary_daemon::config::{default_config_dir, expand_tilde, Config};
use summary_daemon::file_editor::{apply_file_event, pull_disk_edits};
use summary_daemon::{FileEditor, FileEvent, FileWatcher, HttpStore, HubLink, SystemClipboard};

#[derive(Parser, Debug)]
#[command(name = "summary-sync")]
#[command(about = "Sync a case summary with a local file")]
struct Args {
    /// Case whose summary to edit
    #[arg(short, long)]
    case_id: CaseId,

    /// Local file to edit the summary in
    #[arg(short, long)]
    file: String,

    /// Config directory (defaults to ~/.config/summary-sync)
    #[arg(long)]
    config: Option<String>,

    /// Base URL of the case management server
    #[arg(long)]
    server_url: Option<String>,

    /// API key for the server
    #[arg(long, env = "SUMMARY_SYNC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// WebSocket URL of the presence hub
    #[arg(long)]
    presence_url: Option<String>,

    /// Name shown to other editors
    #[arg(long)]
    actor: Option<String>,

    /// Seconds of quiet after the last edit before saving
    #[arg(long)]
    debounce_secs: Option<u64>,

    /// Do not connect to the presence hub
    #[arg(long)]
    no_presence: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    /// Apply command line overrides on top of the config file.
    fn merge_into(&self, mut config: Config) -> Config {
        if let Some(url) = &self.server_url {
            config.server_url = url.clone();
        }
        if let Some(key) = &self.api_key {
            config.api_key = Some(key.clone());
        }
        if let Some(url) = &self.presence_url {
            config.presence_url = Some(url.clone());
        }
        if let Some(actor) = &self.actor {
            config.actor = actor.clone();
        }
        if let Some(secs) = self.debounce_secs {
            config.debounce_secs = secs;
        }
        if self.no_presence {
            config.presence_url = None;
        }
        config
    }
}

type Session = SummarySync<FileEditor, HttpStore>;

/// Daemon state holding all components.
struct Daemon {
    sync: Session,
    watcher: FileWatcher,
    /// None when presence is disabled
    hub: Option<HubLink>,
    /// Presence events from the current connection
    inbox_tx: mpsc::UnboundedSender<PresenceEvent>,
    inbox_rx: mpsc::UnboundedReceiver<PresenceEvent>,
    _status: Subscription,
}

impl Daemon {
    /// Handle a change to the summary file.
    async fn on_file_changed(&mut self, event: FileEvent) {
        if event == FileEvent::Deleted {
            warn!("{} was removed, writing it back", self.watcher.path().display());
        }
        if let Err(e) = apply_file_event(&mut self.sync, event).await {
            warn!("Failed to sync {}: {}", self.watcher.path().display(), e);
        }
    }

    /// Save now (debounce fired or SIGUSR1).
    async fn save(&mut self) {
        // The watcher may not have reported the user's last write yet
        if let Err(e) = pull_disk_edits(&mut self.sync).await {
            warn!("Failed to read {}: {}", self.watcher.path().display(), e);
        }
        match self.sync.reconcile().await {
            Ok(outcome) => debug!("Reconcile finished: {:?}", outcome),
            Err(e) => error!("Failed to sync case {}: {}", self.sync.case_id(), e),
        }
    }

    async fn on_presence(&mut self, event: PresenceEvent) {
        let closed = matches!(event, PresenceEvent::Closed);
        if let Err(e) = self.sync.handle_presence(event).await {
            error!("Failed to handle presence message: {}", e);
        }
        if closed {
            if let Some(hub) = self.hub.as_mut() {
                hub.lost(Instant::now());
            }
        }
    }

    /// Connect to the presence hub and join the case channel.
    async fn connect_presence(&mut self) {
        let Some(hub) = self.hub.as_mut() else {
            return;
        };
        let Some(presence) = hub.dial(self.inbox_tx.clone()).await else {
            return;
        };
        if self.sync.attach_presence(Box::new(presence)).await {
            hub.established();
        } else {
            hub.lost(Instant::now());
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = pull_disk_edits(&mut self.sync).await {
            warn!("Failed to read {}: {}", self.watcher.path().display(), e);
        }
        if self.sync.reconcile_pending() {
            info!("Saving pending edits before exit");
            self.save().await;
        }
        self.sync.close().await;
    }
}

/// Log session events the way an editor would show them.
fn report_events(sync: &Session) -> Subscription {
    sync.events().subscribe(|event| match event {
        SummaryEvent::StatusChanged { label, .. } => info!("Status: {}", label),
        SummaryEvent::RemoteSaved { actor, .. } => info!("Last saved by {}", actor),
        SummaryEvent::Conflict {
            saved_to_clipboard, ..
        } => {
            if *saved_to_clipboard {
                warn!("Summary changed on the server while you were editing, your text was saved aside");
            } else {
                error!("Summary changed on the server while you were editing, your text could not be saved aside");
            }
        }
        SummaryEvent::Typing { actor, .. } => debug!("{} is typing", actor),
        SummaryEvent::PeerPresence { actor, joined, .. } => {
            info!("{} {} the summary", actor, if *joined { "opened" } else { "closed" })
        }
        SummaryEvent::BufferCleared { .. } => info!("Summary cleared"),
        _ => {}
    })
}

/// Resolves at `deadline`, or never when there is none.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Explicit save request (SIGUSR1).
#[cfg(unix)]
struct SaveSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl SaveSignal {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self(
            signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?,
        ))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct SaveSignal;

#[cfg(not(unix))]
impl SaveSignal {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,summary_daemon=debug"
    } else {
        "info,summary_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_dir = args
        .config
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(default_config_dir);
    let config = args.merge_into(Config::load(&config_dir)?);
    let file: PathBuf = expand_tilde(&args.file);

    info!("Starting summary-sync");
    info!("Case: {}", args.case_id);
    info!("File: {:?}", file);
    info!("Server: {}", config.server_url);

    let editor = FileEditor::open(&file)
        .with_context(|| format!("Failed to open summary file {:?}", file))?;
    let store = HttpStore::new(&config.server_url, config.api_key.clone(), config.request_timeout())
        .context("Failed to create HTTP client")?;
    let clipboard = SystemClipboard::new(&file);

    let mut sync = SummarySync::new(
        args.case_id,
        editor,
        store,
        Box::new(clipboard),
        SyncSettings {
            actor: config.actor.clone(),
            debounce: config.debounce(),
        },
    );
    let status = report_events(&sync);

    let checksum = sync
        .initialize(None)
        .await
        .with_context(|| format!("Failed to load summary of case {}", args.case_id))?;
    info!("Loaded summary ({})", checksum);

    let watcher = FileWatcher::new(&file)?;
    info!("File watcher started");

    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let mut daemon = Daemon {
        sync,
        watcher,
        hub: config
            .presence_url
            .as_ref()
            .map(|url| HubLink::new(url.as_str(), config.reconnect.clone())),
        inbox_tx,
        inbox_rx,
        _status: status,
    };

    match &daemon.hub {
        Some(hub) => {
            info!("Presence hub: {}", hub.url());
            daemon.connect_presence().await;
        }
        None => info!("Presence disabled"),
    }

    let mut save_signal = SaveSignal::new()?;

    info!(
        "Daemon running (saves after {:?} of quiet). Press Ctrl+C to stop.",
        config.debounce()
    );

    // Main event loop
    loop {
        tokio::select! {
            // Handle file watcher events
            Some(event) = daemon.watcher.event_rx().recv() => {
                daemon.on_file_changed(event).await;
            }

            // Debounce timer elapsed
            _ = daemon.sync.reconcile_due() => {
                daemon.save().await;
            }

            // Handle presence messages
            Some(event) = daemon.inbox_rx.recv() => {
                daemon.on_presence(event).await;
            }

            // Reconnect to the presence hub
            _ = wait_until(daemon.hub.as_ref().and_then(HubLink::retry_at)) => {
                daemon.connect_presence().await;
            }

            // Explicit save
            _ = save_signal.recv() => {
                info!("Save requested");
                daemon.save().await;
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    daemon.shutdown().await;
    info!("Shutting down");
    Ok(())
}

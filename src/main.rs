use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, time::Duration};
use storage_console::{
    AppConfig, Console,
    config::ConnectionArgs,
    models::node::NodeStatus,
    services::{
        backend::CredentialCheck, batch::BatchOperation, console::local_destination,
        poller::CollectionKind, verification::VerificationState,
    },
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Admin console for the distributed storage backend")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the admin key and persist the session
    Login,
    /// Forget the persisted session
    Logout,
    /// Keep refreshing and log a summary after every cycle
    Watch,
    /// List files
    Files,
    /// Show node health
    Nodes,
    /// Show storage tiers and totals
    Tiers,
    /// Verify every chunk stored on a node
    Verify { node: String },
    /// List the versions of a file
    Versions { file: String },
    /// Make an older version current
    Rollback { file: String, version: u32 },
    /// Download a file, optionally a specific version
    Download {
        file: String,
        #[arg(long)]
        version: Option<u32>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Compare two versions of a file
    Diff { file: String, v1: u32, v2: u32 },
    /// Delete files by id
    Delete { ids: Vec<i64> },
    /// Archive files by id
    Archive { ids: Vec<i64> },
    /// Restore archived files by id
    Restore { ids: Vec<i64> },
    /// Move file chunks to other nodes
    Reallocate { ids: Vec<i64> },
    /// Download several files by id into a directory
    Fetch {
        ids: Vec<i64>,
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },
    /// Upload local files
    Upload { paths: Vec<PathBuf> },
    /// Show deduplication statistics
    Dedup,
    /// List backups
    Backups,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::from_env_and_args(&cli.connection)?;
    tracing::info!("Starting storage-console with config: {:?}", cfg);

    let console = Console::connect(&cfg)
        .await
        .context("opening session store")?;

    match cli.command {
        Command::Login => {
            let key = cfg
                .admin_key
                .clone()
                .context("an admin key is required (--admin-key or STORAGE_CONSOLE_ADMIN_KEY)")?;
            match console.login(&key).await? {
                CredentialCheck::Accepted => println!("login successful"),
                CredentialCheck::Rejected(reason) => anyhow::bail!("authentication rejected: {reason}"),
            }
        }
        Command::Logout => {
            console.logout().await?;
            println!("logged out");
        }
        Command::Watch => {
            open_session(&console, &cfg).await?;
            watch(&console, cfg.poll_interval).await?;
        }
        Command::Files => {
            console.refresh(CollectionKind::Files).await;
            report_error(&console, CollectionKind::Files);
            for view in console.files_view() {
                let f = &view.record;
                println!(
                    "{:>6}  {:<32} {:>12} {:>12}  {}",
                    f.id,
                    f.filename,
                    f.size,
                    f.compressed_size,
                    f.primary_location.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Nodes => {
            open_session(&console, &cfg).await?;
            console.refresh(CollectionKind::NodeHealth).await;
            report_error(&console, CollectionKind::NodeHealth);
            for node in console.nodes() {
                let status = match node.status {
                    NodeStatus::Active => "active",
                    NodeStatus::Inactive => "inactive",
                    NodeStatus::Unknown => "unknown",
                };
                println!(
                    "{:<12} {:<9} {:>12} bytes {:>6.2}%",
                    node.name, status, node.storage.used_bytes, node.storage.usage_percent
                );
            }
        }
        Command::Tiers => {
            open_session(&console, &cfg).await?;
            console.refresh(CollectionKind::StorageTiers).await;
            report_error(&console, CollectionKind::StorageTiers);
            for tier in console.tiers() {
                println!(
                    "{:<6} {:>6} files {:>14} raw {:>14} stored",
                    tier.name, tier.file_count, tier.total_size, tier.total_compressed_size
                );
            }
            let totals = console.tier_totals();
            println!(
                "total  {:>6} files {:>14} raw {:>14} stored  {:.2}% of nominal {} (placeholder)",
                totals.file_count,
                totals.total_size,
                totals.total_compressed_size,
                totals.usage_percent(),
                totals.nominal_capacity
            );
        }
        Command::Verify { node } => {
            open_session(&console, &cfg).await?;
            let counts = console.verify_node(&node).await?;
            println!(
                "{node}: verified {} corrupted {} missing {}",
                counts.verified, counts.corrupted, counts.missing
            );
            if counts.needs_attention() {
                println!("attention: {node} has damaged or missing chunks");
            }
        }
        Command::Versions { file } => {
            let set = select_by_name(&console, &file).await?;
            for v in &set.versions {
                println!(
                    "{}v{:<4} {:<26} {:>12} {:>12}  {}",
                    if v.is_current { "*" } else { " " },
                    v.version,
                    v.timestamp,
                    v.size,
                    v.compressed_size,
                    v.hash
                );
            }
            if let Some(problem) = console.versions().view().inconsistency {
                println!("warning: {problem}");
            }
        }
        Command::Rollback { file, version } => {
            select_by_name(&console, &file).await?;
            let receipt = console.versions().rollback(version).await?;
            println!(
                "{}",
                receipt
                    .message
                    .unwrap_or_else(|| format!("rolled back {file} to version {version}"))
            );
            if let Some(current) = console.versions().view().set.as_ref().and_then(|s| s.current()) {
                println!("current version is now {}", current.version);
            }
        }
        Command::Download { file, version, out } => {
            let dest = local_destination(&out, &file)?;
            let written = match version {
                Some(version) => {
                    select_by_name(&console, &file).await?;
                    console.versions().download(version, &dest).await?
                }
                None => {
                    console.refresh(CollectionKind::Files).await;
                    let record = console.resolve_name(&file)?;
                    let path = console.download_file(record.id, &out).await?;
                    tokio::fs::metadata(&path).await?.len()
                }
            };
            println!("saved {} ({} bytes)", dest.display(), written);
        }
        Command::Diff { file, v1, v2 } => {
            select_by_name(&console, &file).await?;
            let cmp = console.versions().compare(v1, v2).await?;
            println!(
                "{}: v{} -> v{}  size change {:+} bytes, {} seconds apart, {}",
                cmp.filename,
                cmp.version1.number,
                cmp.version2.number,
                cmp.differences.size_change,
                cmp.differences.time_between,
                if cmp.differences.is_identical { "identical" } else { "different" }
            );
        }
        Command::Delete { ids } => batch(&console, &cfg, BatchOperation::Delete, &ids).await?,
        Command::Archive { ids } => batch(&console, &cfg, BatchOperation::Archive, &ids).await?,
        Command::Restore { ids } => batch(&console, &cfg, BatchOperation::Restore, &ids).await?,
        Command::Reallocate { ids } => {
            batch(&console, &cfg, BatchOperation::Reallocate, &ids).await?
        }
        Command::Fetch { ids, dest } => {
            batch(&console, &cfg, BatchOperation::Download { dest_dir: dest }, &ids).await?
        }
        Command::Upload { paths } => {
            let mut failed = 0;
            for (name, result) in console.upload_files(&paths).await {
                match result {
                    Ok(receipt) => println!(
                        "{name}: uploaded{}",
                        receipt.version.map(|v| format!(" as version {v}")).unwrap_or_default()
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("{name}: failed: {e}");
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} upload(s) failed", paths.len());
            }
        }
        Command::Dedup => {
            open_session(&console, &cfg).await?;
            let stats = console.deduplication_stats().await?;
            println!(
                "references {}  space saved {} bytes",
                stats.total_references.unwrap_or(0),
                stats.total_space_saved.unwrap_or(0)
            );
        }
        Command::Backups => {
            open_session(&console, &cfg).await?;
            for b in console.backups().await? {
                println!(
                    "{:>4} {:<26} {:?} {:?} {:>12} bytes keep {}d",
                    b.id, b.timestamp, b.kind, b.status, b.size, b.retention_days
                );
            }
        }
    }

    Ok(())
}

/// Log in with the configured key, or resume the persisted session.
async fn open_session(console: &Console, cfg: &AppConfig) -> Result<()> {
    if let Some(key) = &cfg.admin_key {
        if let CredentialCheck::Rejected(reason) = console.login(key).await? {
            anyhow::bail!("authentication rejected: {reason}");
        }
        return Ok(());
    }
    if !console.resume().await? {
        tracing::warn!("no admin session; privileged data will not be fetched");
    }
    Ok(())
}

async fn select_by_name(
    console: &Console,
    file: &str,
) -> Result<storage_console::models::version::VersionSet> {
    console.refresh(CollectionKind::Files).await;
    let record = console.resolve_name(file)?;
    Ok(console.select_file(record.id).await?)
}

async fn batch(
    console: &Console,
    cfg: &AppConfig,
    operation: BatchOperation,
    ids: &[i64],
) -> Result<()> {
    if operation.is_privileged() {
        open_session(console, cfg).await?;
    }
    console.refresh(CollectionKind::Files).await;
    for id in ids {
        if let Err(e) = console.select(*id) {
            tracing::warn!("{}", e);
        }
    }
    let report = console.run_batch(operation).await?;
    println!(
        "{}: {} succeeded, {} skipped, {} failed",
        report.operation,
        report.succeeded.len(),
        report.skipped.len(),
        report.failures.len()
    );
    if let Some(message) = report.failure_message() {
        println!("{message}");
    }
    report.ensure_complete()?;
    Ok(())
}

async fn watch(console: &Console, interval: Duration) -> Result<()> {
    console.activate();
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tick.tick() => summarize(console),
        }
    }
    console.shutdown().await;
    Ok(())
}

fn summarize(console: &Console) {
    let files = console.files_view();
    let pending = files.iter().filter(|f| f.pending.is_some()).count();
    let nodes = console.nodes();
    let active = nodes.iter().filter(|n| n.status == NodeStatus::Active).count();
    let totals = console.tier_totals();
    tracing::info!(
        files = files.len(),
        pending,
        nodes = nodes.len(),
        active,
        usage_percent = totals.usage_percent(),
        session = console.gate().is_open(),
        "console snapshot"
    );
    for job in console.verifications().jobs() {
        match &job.state {
            VerificationState::Succeeded { counts, .. } if counts.needs_attention() => {
                tracing::warn!(node = %job.node, corrupted = counts.corrupted, missing = counts.missing, "verification flagged chunks");
            }
            VerificationState::Failed { reason, .. } => {
                tracing::warn!(node = %job.node, "verification failed: {}", reason);
            }
            _ => {}
        }
    }
    for kind in CollectionKind::ALL {
        report_error(console, kind);
    }
}

fn report_error(console: &Console, kind: CollectionKind) {
    if let Some(err) = console.collection_error(kind) {
        tracing::warn!(collection = kind.label(), "{}", err);
    }
}

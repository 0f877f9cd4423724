// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of LiverySync.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! LiverySync - command line front end
//!
//! Checks a package's release feed, applies the resulting plan after
//! confirmation, and removes installed content on request.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use liverysync_core::progress::Phase;
use liverysync_core::{
    CheckOutcome, ItemStatus, ProgressEvent, Summary, SyncConfig, UpdateOrchestrator,
};
use tracing_subscriber::EnvFilter;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "liverysync")]
#[command(about = "Keep livery packages in sync with their update server", long_about = None)]
struct Cli {
    /// Path to the JSON config (created with defaults if missing)
    #[arg(short, long, default_value = "liverysync.json")]
    config: PathBuf,

    /// Debug logging for the sync engine
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List configured packages with local and server versions
    Packages,

    /// Show what an update would download and remove
    Check {
        #[arg(short, long)]
        package: Option<String>,
    },

    /// Download, unpack and remove content up to the newest release
    Update {
        #[arg(short, long)]
        package: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove every file the manifest tracks for a package
    Uninstall {
        #[arg(short, long)]
        package: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "liverysync_core=debug"
    } else {
        "liverysync_core=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(directive.parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SyncConfig::load_or_create(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    let mut orch = UpdateOrchestrator::from_config(config)
        .with_context(|| format!("Fill in {} before syncing", cli.config.display()))?;

    match cli.command {
        Commands::Packages => list_packages(&orch).await,
        Commands::Check { package } => {
            let id = orch.config().resolve_package(package.as_deref())?.to_owned();
            check(&mut orch, &id).await
        }
        Commands::Update { package, yes } => {
            let id = orch.config().resolve_package(package.as_deref())?.to_owned();
            update(&mut orch, &id, yes).await
        }
        Commands::Uninstall { package, yes } => {
            let id = orch.config().resolve_package(package.as_deref())?.to_owned();
            uninstall(&mut orch, &id, yes)
        }
    }
}

async fn list_packages(orch: &UpdateOrchestrator) -> Result<()> {
    let ids: Vec<String> = orch.config().packages.keys().cloned().collect();
    for id in ids {
        let status = orch.package_status(&id).await?;
        println!(
            "{:<12} {:<28} local: {:<14} server: {:<14} {}",
            status.id,
            status.name,
            status.local_version.as_deref().unwrap_or("-"),
            status.remote_version.as_deref().unwrap_or("unavailable"),
            status.target_folder.display()
        );
    }
    Ok(())
}

async fn check(orch: &mut UpdateOrchestrator, id: &str) -> Result<()> {
    match orch.check_for_updates(id).await? {
        CheckOutcome::UpToDate { remote_version, .. } => {
            println!("{id} is up to date ({remote_version})");
        }
        CheckOutcome::Updates(update) => {
            print_plan(orch, &update)?;
        }
    }
    // A dry check never promotes the feed
    orch.cleanup()?;
    Ok(())
}

fn print_plan(orch: &UpdateOrchestrator, update: &liverysync_core::UpdateCheck) -> Result<()> {
    println!(
        "{}: {} -> {}",
        update.package_id,
        update.local_version.as_deref().unwrap_or("nothing installed"),
        update.remote_version
    );
    println!("{} file(s) to download:", update.plan.to_download.len());
    for path in &update.plan.to_download {
        println!("  + {path}");
    }
    let deletions = orch.existing_deletions(&update.plan, &update.package_id)?;
    println!("{} installed item(s) to remove:", deletions.len());
    for path in &deletions {
        println!("  - {path}");
    }
    Ok(())
}

async fn update(orch: &mut UpdateOrchestrator, id: &str, yes: bool) -> Result<()> {
    let update = match orch.check_for_updates(id).await? {
        CheckOutcome::UpToDate { remote_version, .. } => {
            println!("{id} is up to date ({remote_version})");
            return Ok(());
        }
        CheckOutcome::Updates(update) => update,
    };

    print_plan(orch, &update)?;
    if update.plan.is_empty() {
        info!("Plan is empty, recording {} as installed", update.remote_version);
    } else if !yes && !confirm("Apply these changes?")? {
        println!("Update cancelled");
        orch.cleanup()?;
        return Ok(());
    }

    let cancel = orch.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current item");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let mut sink = print_event;
    let summary = orch.apply_plan(&update.plan, id, &mut sink).await?;
    ctrl_c.abort();
    orch.cleanup()?;

    print_summary(&summary);
    if summary.cancelled {
        bail!("update of {id} was interrupted; run it again to finish");
    }
    if summary.has_failures() {
        bail!("update of {id} finished with {} failed item(s)", summary.failed().count());
    }
    Ok(())
}

fn uninstall(orch: &mut UpdateOrchestrator, id: &str, yes: bool) -> Result<()> {
    let tracked = orch.manifest().list(id)?.len();
    if tracked == 0 {
        println!("Nothing installed for {id}");
        return Ok(());
    }
    if !yes && !confirm(&format!("Remove {tracked} tracked path(s) of {id}?"))? {
        println!("Uninstall cancelled");
        return Ok(());
    }

    let mut sink = print_event;
    let summary = orch.delete_installed(id, &mut sink)?;
    print_summary(&summary);
    if summary.has_failures() {
        bail!("{} path(s) of {id} could not be removed", summary.failed().count());
    }
    Ok(())
}

fn print_event(event: ProgressEvent) {
    match event.phase {
        Phase::Start => {}
        Phase::Done => println!("  ok    {}", event.message),
        Phase::Warning => println!("  warn  {}", event.message),
        Phase::Error => println!("  FAIL  {}", event.message),
    }
}

fn print_summary(summary: &Summary) {
    println!(
        "{}: {} succeeded, {} partial, {} failed, {} kept, {} skipped",
        summary.package_id,
        summary.succeeded().count(),
        summary.partial().count(),
        summary.failed().count(),
        summary.with_status(ItemStatus::Kept).count(),
        summary.with_status(ItemStatus::Skipped).count()
    );
    for outcome in summary.failed().chain(summary.partial()) {
        println!("  {}: {}", outcome.item_id, outcome.message);
        for entry in &outcome.failed_entries {
            println!("    {entry}");
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

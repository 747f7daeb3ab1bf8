use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use patchbay_engine::{
    apply_bundle, apply_patch, patch_history, rollback_last, rollback_patch, ContentPolicy,
    GarbageLocator, InstalledImage,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "patchbay")]
#[command(about = "Offline patch manager for layered product installations", long_about = None)]
struct Cli {
    /// Root directory of the installation to operate on.
    #[arg(long, default_value = ".")]
    image: PathBuf,
    /// Identity name of the installed product.
    #[arg(long)]
    identity: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply a single unpacked patch bundle.
    Apply {
        bundle: PathBuf,
        #[arg(long)]
        override_all: bool,
        #[arg(long)]
        ignore_module_changes: bool,
    },
    /// Apply a multi-patch bundle, all members or none.
    ApplyBundle {
        bundle: PathBuf,
        #[arg(long)]
        override_all: bool,
        #[arg(long)]
        ignore_module_changes: bool,
    },
    /// Roll back to the state before the given patch was applied.
    Rollback {
        patch_id: String,
        #[arg(long)]
        override_all: bool,
        #[arg(long)]
        reset_configuration: bool,
        /// Allow rolling back a patch that is not the newest one by
        /// rolling back everything applied after it as well.
        #[arg(long)]
        rollback_to: bool,
    },
    /// Roll back the most recently applied patch.
    RollbackLast {
        #[arg(long)]
        override_all: bool,
        #[arg(long)]
        reset_configuration: bool,
    },
    /// Show the applied-patch history, newest first.
    History,
    /// Show the installation identity and applied patches.
    Info,
    /// List history entries and overlays nothing references anymore, and
    /// optionally remove them.
    Gc {
        #[arg(long)]
        delete: bool,
    },
}

fn policy(override_all: bool, ignore_module_changes: bool) -> ContentPolicy {
    if override_all {
        ContentPolicy::OverrideAll
    } else if ignore_module_changes {
        ContentPolicy::IgnoreModuleChanges
    } else {
        ContentPolicy::Strict
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            bundle,
            override_all,
            ignore_module_changes,
        } => {
            let image = InstalledImage::load(&cli.image, &cli.identity)?;
            let staged = apply_patch(&image, &bundle, policy(override_all, ignore_module_changes))?;
            let patch_id = staged.patch_id().to_string();
            let version = staged.new_version().clone();
            staged.commit()?;
            println!("applied {patch_id}, installation is at {version}");
        }
        Commands::ApplyBundle {
            bundle,
            override_all,
            ignore_module_changes,
        } => {
            let committed = apply_bundle(
                &cli.image,
                &cli.identity,
                &bundle,
                policy(override_all, ignore_module_changes),
            )?;
            for patch_id in &committed {
                println!("applied {patch_id}");
            }
            println!("{} patch(es) applied", committed.len());
        }
        Commands::Rollback {
            patch_id,
            override_all,
            reset_configuration,
            rollback_to,
        } => {
            let image = InstalledImage::load(&cli.image, &cli.identity)?;
            let outcome = rollback_patch(
                &image,
                &patch_id,
                policy(override_all, false),
                reset_configuration,
                rollback_to,
            )?;
            for rolled_back in &outcome.rolled_back {
                println!("rolled back {rolled_back}");
            }
            println!("installation is at {}", outcome.restored_version);
        }
        Commands::RollbackLast {
            override_all,
            reset_configuration,
        } => {
            let image = InstalledImage::load(&cli.image, &cli.identity)?;
            let outcome =
                rollback_last(&image, policy(override_all, false), reset_configuration)?;
            for rolled_back in &outcome.rolled_back {
                println!("rolled back {rolled_back}");
            }
            println!("installation is at {}", outcome.restored_version);
        }
        Commands::History => {
            let image = InstalledImage::load(&cli.image, &cli.identity)?;
            let entries = patch_history(&image)?;
            if entries.is_empty() {
                println!("no patches applied");
            }
            for entry in entries {
                let patch_type = entry
                    .patch_type
                    .map(|patch_type| patch_type.as_str())
                    .unwrap_or("unknown");
                let note = if entry.rollback_usable {
                    ""
                } else {
                    " (rollback record missing)"
                };
                println!("{} [{patch_type}]{note}", entry.patch_id);
            }
        }
        Commands::Info => {
            let image = InstalledImage::load(&cli.image, &cli.identity)?;
            println!("identity: {}", image.identity_name());
            println!("version: {}", image.version());
            println!("layers: {}", image.layers().join(", "));
            if !image.add_ons().is_empty() {
                println!("add-ons: {}", image.add_ons().join(", "));
            }
            for target in image.targets() {
                let state = image.load_target_state(&target)?;
                let cumulative = state.cumulative.as_deref().unwrap_or("-");
                let one_offs = if state.one_offs.is_empty() {
                    "-".to_string()
                } else {
                    state.one_offs.join(", ")
                };
                println!(
                    "{} {}: cumulative {cumulative}, one-offs {one_offs}",
                    target.kind.as_str(),
                    target.name
                );
            }
        }
        Commands::Gc { delete } => {
            let image = InstalledImage::load(&cli.image, &cli.identity)?;
            let mut locator = GarbageLocator::new(&image);
            if delete {
                let report = locator.delete_inactive_content()?;
                println!(
                    "removed {} history entr(ies), {} overlay(s)",
                    report.removed_history, report.removed_overlays
                );
            } else {
                let mut inactive = locator.inactive_history()?;
                inactive.extend(locator.inactive_overlays()?);
                if inactive.is_empty() {
                    println!("no inactive content");
                }
                for path in inactive {
                    println!("{}", path.display());
                }
            }
        }
    }

    Ok(())
}

//! Hotfix command implementation.

use courier_engine::hotfix::{HotFix, HotFixDirectory, HotFixReport, Version};
use courier_store::{FileStore, MetadataStore};
use std::path::Path;
use std::sync::Arc;

/// Runs the hotfix command against a metadata store.
///
/// Only metadata repairs run. A patch that needs the object graph ends the
/// pass and its marker stays below it, so the app applies it after sync.
pub fn run(
    path: &Path,
    current: &str,
    after_sync: bool,
    skip: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let current = Version::parse(current)?;
    let store: Arc<dyn MetadataStore> = Arc::new(FileStore::open(path)?);
    let report = apply(store.clone(), &current, after_sync, skip)?;
    store.flush()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report(&report),
    }

    if let Some(failure) = &report.failed {
        return Err(format!(
            "patch {} ({}) failed: {}",
            failure.name, failure.version, failure.message
        )
        .into());
    }
    Ok(())
}

/// Applies one hotfix phase with the built-in patches.
pub fn apply(
    store: Arc<dyn MetadataStore>,
    current: &Version,
    after_sync: bool,
    skip: bool,
) -> Result<HotFixReport, Box<dyn std::error::Error>> {
    let hotfix = HotFix::store_only(HotFixDirectory::built_in(), store).with_skip(skip);
    let report = if after_sync {
        hotfix.apply_patches_after_sync_completed(current)?
    } else {
        hotfix.apply_patches_at_startup(current)?
    };
    Ok(report)
}

/// Lists the built-in patches.
pub fn list(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let patches = HotFixDirectory::built_in().list();
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&patches)?),
        _ => {
            println!("Built-in hotfix patches:");
            for patch in &patches {
                println!("  {:<8} {:?} {}", patch.version, patch.phase, patch.name);
            }
        }
    }
    Ok(())
}

fn print_report(report: &HotFixReport) {
    println!("Phase:   {:?}", report.phase);
    if report.skipped {
        println!("Status:  bypassed");
    } else if report.fresh_install {
        println!("Status:  fresh install, marker recorded");
    } else if report.is_success() {
        println!("Status:  ok");
    } else {
        println!("Status:  failed");
    }
    println!("Marker:  {}", report.marker.as_deref().unwrap_or("-"));
    if !report.applied.is_empty() {
        println!("Applied:");
        for name in &report.applied {
            println!("  - {name}");
        }
    }
}

//! Versioned one-time data patches.
//!
//! A hotfix patch repairs local data written by an older client. Each
//! patch is tagged with the client version that introduced it and with the
//! phase it runs in: at startup, or after the first sync completed.
//!
//! ## Markers
//!
//! Each phase keeps a persisted marker, the version up to which its patches
//! were applied. A pass runs every patch with `marker < version <= current`
//! in ascending order and advances the marker after each success, so a
//! crash in the middle of a pass never re-runs a finished patch.
//!
//! - A missing marker means a fresh install: the current version is stored
//!   and no patch runs, since there is no old data to repair.
//! - The first failing patch ends the pass. The marker stays at the last
//!   success and the failed patch is retried on the next pass.
//! - Patches sharing a version form one group. The marker only moves past
//!   a group once every patch in it succeeded; the members applied so far
//!   are recorded in a separate list and not re-run.
//! - After a full pass the marker becomes `max(marker, current)`.
//!
//! The object graph is filled by the sync, so patches that use it only run
//! after sync and only on a runner that was given the session graph. Anywhere
//! else such a patch ends the pass like a failure, leaving the marker below it.
//!
//! ## Usage
//!
//! ```rust
//! use courier_engine::hotfix::{HotFix, HotFixDirectory, Version};
//! use courier_engine::ObjectGraph;
//! use courier_store::InMemoryStore;
//! use std::sync::Arc;
//!
//! let hotfix = HotFix::new(
//!     HotFixDirectory::built_in(),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(ObjectGraph::new()),
//! );
//! let report = hotfix.apply_patches_at_startup(&Version::parse("1.4.0").unwrap()).unwrap();
//! assert!(report.fresh_install);
//! ```

mod directory;
mod patches;
mod version;

pub use directory::{HotFixDirectory, HotFixInfo};
pub use patches::{
    InsertNewConversationSystemMessages, PurgePreviouslyReceivedEventIds,
    ResetPushTokenRegistration,
};
pub use version::Version;

use crate::config::{is_truthy, SKIP_HOTFIX_ENV};
use crate::error::SyncResult;
use crate::model::ObjectGraph;
use courier_store::{keys, MetaValue, MetadataStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// When a patch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HotFixPhase {
    /// While the session starts, before any sync.
    Startup,
    /// After the first sync completed.
    AfterSync,
}

impl HotFixPhase {
    /// Returns the store key of the phase marker.
    pub fn marker_key(&self) -> &'static str {
        match self {
            HotFixPhase::Startup => keys::HOTFIX_STARTUP_VERSION,
            HotFixPhase::AfterSync => keys::HOTFIX_AFTER_SYNC_VERSION,
        }
    }

    /// Returns the store key listing the patches applied above the marker.
    pub fn partial_key(&self) -> &'static str {
        match self {
            HotFixPhase::Startup => keys::HOTFIX_STARTUP_PARTIAL,
            HotFixPhase::AfterSync => keys::HOTFIX_AFTER_SYNC_PARTIAL,
        }
    }
}

/// State a patch may read and modify.
pub struct HotFixContext<'a> {
    /// Metadata store.
    pub store: &'a dyn MetadataStore,
    /// Local object graph.
    pub graph: &'a ObjectGraph,
    /// Phase being applied.
    pub phase: HotFixPhase,
}

/// A one-time data patch.
pub trait HotFixPatch: Send + Sync {
    /// Client version that introduced the patch.
    fn version(&self) -> &Version;

    /// Phase the patch runs in.
    fn phase(&self) -> HotFixPhase;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Returns true if the patch reads or modifies the object graph.
    fn uses_graph(&self) -> bool {
        false
    }

    /// Applies the patch.
    ///
    /// # Errors
    ///
    /// An error ends the pass; the patch is retried on the next pass.
    fn apply(&self, ctx: &HotFixContext<'_>) -> SyncResult<()>;
}

type PatchFn = Box<dyn Fn(&HotFixContext<'_>) -> SyncResult<()> + Send + Sync>;

/// A patch backed by a closure.
pub struct ClosurePatch {
    version: Version,
    phase: HotFixPhase,
    name: String,
    uses_graph: bool,
    apply: PatchFn,
}

impl ClosurePatch {
    /// Creates a patch.
    pub fn new(
        version: Version,
        phase: HotFixPhase,
        name: impl Into<String>,
        apply: impl Fn(&HotFixContext<'_>) -> SyncResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            version,
            phase,
            name: name.into(),
            uses_graph: false,
            apply: Box::new(apply),
        }
    }

    /// Marks the patch as one that needs the object graph.
    pub fn using_graph(mut self) -> Self {
        self.uses_graph = true;
        self
    }
}

impl HotFixPatch for ClosurePatch {
    fn version(&self) -> &Version {
        &self.version
    }

    fn phase(&self) -> HotFixPhase {
        self.phase
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn uses_graph(&self) -> bool {
        self.uses_graph
    }

    fn apply(&self, ctx: &HotFixContext<'_>) -> SyncResult<()> {
        (self.apply)(ctx)
    }
}

/// A patch that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotFixFailure {
    /// Patch name.
    pub name: String,
    /// Patch version.
    pub version: String,
    /// Error description.
    pub message: String,
}

/// Outcome of a hotfix pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotFixReport {
    /// Phase that was applied.
    pub phase: HotFixPhase,
    /// Names of applied patches, in order.
    pub applied: Vec<String>,
    /// The patch that ended the pass, if any.
    pub failed: Option<HotFixFailure>,
    /// The pass was bypassed.
    pub skipped: bool,
    /// No marker existed; only the marker was written.
    pub fresh_install: bool,
    /// The marker after the pass.
    pub marker: Option<String>,
}

impl HotFixReport {
    fn new(phase: HotFixPhase) -> Self {
        Self {
            phase,
            applied: Vec::new(),
            failed: None,
            skipped: false,
            fresh_install: false,
            marker: None,
        }
    }

    /// Returns true if no patch failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}

/// Applies hotfix patches against the persisted phase markers.
pub struct HotFix {
    directory: HotFixDirectory,
    store: Arc<dyn MetadataStore>,
    graph: Arc<ObjectGraph>,
    graph_loaded: bool,
    skip: bool,
    run: Mutex<()>,
}

impl HotFix {
    /// Creates a runner over the session graph.
    pub fn new(
        directory: HotFixDirectory,
        store: Arc<dyn MetadataStore>,
        graph: Arc<ObjectGraph>,
    ) -> Self {
        Self {
            directory,
            store,
            graph,
            graph_loaded: true,
            skip: false,
            run: Mutex::new(()),
        }
    }

    /// Creates a runner without an object graph. Patches that use the graph
    /// end the pass and stay pending.
    pub fn store_only(directory: HotFixDirectory, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            graph_loaded: false,
            ..Self::new(directory, store, Arc::new(ObjectGraph::new()))
        }
    }

    /// Bypasses every pass when `skip` is true.
    pub fn with_skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Returns the patch directory.
    pub fn directory(&self) -> &HotFixDirectory {
        &self.directory
    }

    /// Returns true if hotfixes are disabled by configuration, environment
    /// or the persisted flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted flag cannot be read.
    pub fn is_bypassed(&self) -> SyncResult<bool> {
        if self.skip || is_truthy(std::env::var(SKIP_HOTFIX_ENV).ok().as_deref()) {
            return Ok(true);
        }
        Ok(self.store.get_bool(keys::SKIP_HOTFIX)?.unwrap_or(false))
    }

    /// Returns the marker of a phase. An unreadable marker reads as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn marker(&self, phase: HotFixPhase) -> SyncResult<Option<Version>> {
        let Some(text) = self.store.get_text(phase.marker_key())? else {
            return Ok(None);
        };
        match Version::parse(&text) {
            Ok(version) => Ok(Some(version)),
            Err(e) => {
                warn!(
                    phase = ?phase,
                    marker = %text,
                    error = %e,
                    "ignoring unreadable hotfix marker"
                );
                Ok(None)
            }
        }
    }

    /// Applies the startup patches.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; patch failures are reported in
    /// the returned [`HotFixReport`].
    pub fn apply_patches_at_startup(&self, current: &Version) -> SyncResult<HotFixReport> {
        self.apply_patches_for_current_version(current, HotFixPhase::Startup)
    }

    /// Applies the after-sync patches.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; patch failures are reported in
    /// the returned [`HotFixReport`].
    pub fn apply_patches_after_sync_completed(
        &self,
        current: &Version,
    ) -> SyncResult<HotFixReport> {
        self.apply_patches_for_current_version(current, HotFixPhase::AfterSync)
    }

    /// Applies the pending patches of one phase.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; patch failures are reported in
    /// the returned [`HotFixReport`].
    pub fn apply_patches_for_current_version(
        &self,
        current: &Version,
        phase: HotFixPhase,
    ) -> SyncResult<HotFixReport> {
        let _run = self.run.lock();
        let mut report = HotFixReport::new(phase);

        if self.is_bypassed()? {
            info!(phase = ?phase, "hotfixes bypassed");
            report.skipped = true;
            report.marker = self.marker(phase)?.map(|v| v.to_string());
            return Ok(report);
        }

        let Some(mut marker) = self.marker(phase)? else {
            debug!(phase = ?phase, version = %current, "fresh install, recording hotfix marker");
            self.write_marker(phase, current)?;
            report.fresh_install = true;
            report.marker = Some(current.to_string());
            return Ok(report);
        };

        let ctx = HotFixContext {
            store: self.store.as_ref(),
            graph: self.graph.as_ref(),
            phase,
        };

        let graph_ready = self.graph_loaded && phase == HotFixPhase::AfterSync;
        let mut partial = self.store.get_text_list(phase.partial_key())?;
        let pending = self.directory.pending(phase, &marker, current);

        for (index, patch) in pending.iter().enumerate() {
            let tag = format!("{}/{}", patch.version(), patch.name());
            if !partial.contains(&tag) {
                let outcome = if patch.uses_graph() && !graph_ready {
                    Err("needs the object graph".to_string())
                } else {
                    patch.apply(&ctx).map_err(|e| e.to_string())
                };
                if let Err(message) = outcome {
                    warn!(
                        patch = patch.name(),
                        version = %patch.version(),
                        error = %message,
                        "hotfix failed"
                    );
                    report.failed = Some(HotFixFailure {
                        name: patch.name().to_string(),
                        version: patch.version().to_string(),
                        message,
                    });
                    report.marker = Some(marker.to_string());
                    return Ok(report);
                }
                info!(patch = patch.name(), version = %patch.version(), "applied hotfix");
                report.applied.push(patch.name().to_string());
                partial.push(tag);
            }

            let closes_group = pending
                .get(index + 1)
                .is_none_or(|next| next.version() != patch.version());
            if closes_group {
                marker = patch.version().clone();
                self.write_marker(phase, &marker)?;
                partial.clear();
                self.store.remove(phase.partial_key())?;
            } else {
                self.store
                    .set(phase.partial_key(), MetaValue::TextList(partial.clone()))?;
            }
        }

        if *current > marker {
            marker = current.clone();
            self.write_marker(phase, &marker)?;
            self.store.remove(phase.partial_key())?;
        }
        report.marker = Some(marker.to_string());
        Ok(report)
    }

    fn write_marker(&self, phase: HotFixPhase, version: &Version) -> SyncResult<()> {
        self.store
            .set(phase.marker_key(), MetaValue::Text(version.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for HotFix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotFix")
            .field("directory", &self.directory)
            .field("graph_loaded", &self.graph_loaded)
            .field("skip", &self.skip)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use courier_store::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        runs: Arc<Vec<AtomicUsize>>,
    }

    /// Registers startup patches at the given versions; `failing` names
    /// the index of a patch that always fails.
    fn runner(versions: &[&str], failing: Option<usize>) -> (HotFix, Fixture) {
        let store = Arc::new(InMemoryStore::new());
        let runs: Arc<Vec<AtomicUsize>> =
            Arc::new(versions.iter().map(|_| AtomicUsize::new(0)).collect());

        let mut directory = HotFixDirectory::new();
        for (index, version) in versions.iter().enumerate() {
            let runs = Arc::clone(&runs);
            directory.register(Box::new(ClosurePatch::new(
                v(version),
                HotFixPhase::Startup,
                format!("patch-{version}"),
                move |_| {
                    runs[index].fetch_add(1, Ordering::SeqCst);
                    if failing == Some(index) {
                        return Err(SyncError::transport_fatal("boom"));
                    }
                    Ok(())
                },
            )));
        }

        let hotfix = HotFix::new(directory, store.clone(), Arc::new(ObjectGraph::new()));
        (hotfix, Fixture { store, runs })
    }

    fn set_marker(store: &InMemoryStore, phase: HotFixPhase, version: &str) {
        store.set(phase.marker_key(), version.into()).unwrap();
    }

    fn runs(fixture: &Fixture) -> Vec<usize> {
        fixture.runs.iter().map(|r| r.load(Ordering::SeqCst)).collect()
    }

    #[test]
    fn fresh_install_runs_nothing() {
        let (hotfix, fixture) = runner(&["1.0.0", "1.1.0"], None);

        let report = hotfix.apply_patches_at_startup(&v("1.1.0")).unwrap();
        assert!(report.fresh_install);
        assert!(report.applied.is_empty());
        assert_eq!(runs(&fixture), vec![0, 0]);
        assert_eq!(
            fixture.store.get_text(keys::HOTFIX_STARTUP_VERSION).unwrap().as_deref(),
            Some("1.1.0")
        );
    }

    #[test]
    fn runs_window_in_order_once() {
        let (hotfix, fixture) = runner(&["1.10.0", "1.2.0", "1.9.0", "2.1.0"], None);
        set_marker(&fixture.store, HotFixPhase::Startup, "1.2.0");

        let report = hotfix.apply_patches_at_startup(&v("2.0")).unwrap();
        assert_eq!(report.applied, vec!["patch-1.9.0", "patch-1.10.0"]);
        assert_eq!(report.marker.as_deref(), Some("2.0"));
        assert_eq!(runs(&fixture), vec![1, 0, 1, 0]);

        // Second pass at the same version runs nothing
        let report = hotfix.apply_patches_at_startup(&v("2.0")).unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(runs(&fixture), vec![1, 0, 1, 0]);
    }

    #[test]
    fn failure_stops_pass_and_retries_later() {
        let (hotfix, fixture) = runner(&["1.1.0", "1.2.0", "1.3.0"], Some(1));
        set_marker(&fixture.store, HotFixPhase::Startup, "1.0.0");

        let report = hotfix.apply_patches_at_startup(&v("1.3.0")).unwrap();
        assert_eq!(report.applied, vec!["patch-1.1.0"]);
        let failed = report.failed.unwrap();
        assert_eq!(failed.version, "1.2.0");
        assert_eq!(report.marker.as_deref(), Some("1.1.0"));
        assert_eq!(runs(&fixture), vec![1, 1, 0]);

        let report = hotfix.apply_patches_at_startup(&v("1.3.0")).unwrap();
        assert!(!report.is_success());
        assert_eq!(runs(&fixture), vec![1, 2, 0]);
    }

    #[test]
    fn marker_never_moves_backwards() {
        let (hotfix, fixture) = runner(&["1.1.0"], None);
        set_marker(&fixture.store, HotFixPhase::Startup, "3.0");

        let report = hotfix.apply_patches_at_startup(&v("2.0")).unwrap();
        assert_eq!(report.marker.as_deref(), Some("3.0"));
        assert_eq!(runs(&fixture), vec![0]);
    }

    #[test]
    fn phases_keep_separate_markers() {
        let (hotfix, fixture) = runner(&["1.1.0"], None);
        set_marker(&fixture.store, HotFixPhase::Startup, "1.0");

        let report = hotfix.apply_patches_after_sync_completed(&v("1.1.0")).unwrap();
        assert!(report.fresh_install);
        assert_eq!(runs(&fixture), vec![0]);

        hotfix.apply_patches_at_startup(&v("1.1.0")).unwrap();
        assert_eq!(runs(&fixture), vec![1]);
    }

    #[test]
    fn bypass_by_config_and_store() {
        let (hotfix, fixture) = runner(&["1.1.0"], None);
        set_marker(&fixture.store, HotFixPhase::Startup, "1.0");
        let hotfix = hotfix.with_skip(true);

        let report = hotfix.apply_patches_at_startup(&v("1.1.0")).unwrap();
        assert!(report.skipped);
        assert_eq!(runs(&fixture), vec![0]);

        let (hotfix, fixture) = runner(&["1.1.0"], None);
        set_marker(&fixture.store, HotFixPhase::Startup, "1.0");
        fixture.store.set(keys::SKIP_HOTFIX, true.into()).unwrap();

        let report = hotfix.apply_patches_at_startup(&v("1.1.0")).unwrap();
        assert!(report.skipped);
        assert_eq!(report.marker.as_deref(), Some("1.0"));
        assert_eq!(runs(&fixture), vec![0]);
    }

    fn counting_patch(
        version: &str,
        phase: HotFixPhase,
        name: &str,
        runs: Arc<AtomicUsize>,
        fails: bool,
    ) -> ClosurePatch {
        ClosurePatch::new(v(version), phase, name, move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            if fails {
                return Err(SyncError::transport_fatal("boom"));
            }
            Ok(())
        })
    }

    #[test]
    fn failed_patch_in_version_tie_is_retried() {
        let store = Arc::new(InMemoryStore::new());
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let mut directory = HotFixDirectory::new();
        let startup = HotFixPhase::Startup;
        directory.register(Box::new(counting_patch("1.1.0", startup, "a", a.clone(), false)));
        directory.register(Box::new(counting_patch("1.1.0", startup, "b", b.clone(), true)));
        let hotfix = HotFix::new(directory, store.clone(), Arc::new(ObjectGraph::new()));
        set_marker(&store, startup, "1.0.0");

        let report = hotfix.apply_patches_at_startup(&v("1.1.0")).unwrap();
        assert_eq!(report.applied, vec!["a"]);
        assert_eq!(report.failed.unwrap().name, "b");
        assert_eq!(report.marker.as_deref(), Some("1.0.0"));

        let report = hotfix.apply_patches_at_startup(&v("1.1.0")).unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.failed.unwrap().name, "b");
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
        assert_eq!(
            store.get_text(keys::HOTFIX_STARTUP_VERSION).unwrap().as_deref(),
            Some("1.0.0")
        );
        assert_eq!(
            store.get_text_list(keys::HOTFIX_STARTUP_PARTIAL).unwrap(),
            vec!["1.1.0/a".to_string()]
        );
    }

    #[test]
    fn completed_tie_advances_marker_and_clears_partial_list() {
        let store = Arc::new(InMemoryStore::new());
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let mut directory = HotFixDirectory::new();
        let startup = HotFixPhase::Startup;
        directory.register(Box::new(counting_patch("1.1.0", startup, "a", a.clone(), false)));
        directory.register(Box::new(counting_patch("1.1.0", startup, "b", b.clone(), false)));
        let hotfix = HotFix::new(directory, store.clone(), Arc::new(ObjectGraph::new()));
        set_marker(&store, startup, "1.0.0");
        store
            .set(keys::HOTFIX_STARTUP_PARTIAL, MetaValue::TextList(vec!["1.1.0/a".into()]))
            .unwrap();

        let report = hotfix.apply_patches_at_startup(&v("1.2.0")).unwrap();
        assert_eq!(report.applied, vec!["b"]);
        assert_eq!(report.marker.as_deref(), Some("1.2.0"));
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert!(store.get(keys::HOTFIX_STARTUP_PARTIAL).unwrap().is_none());
    }

    #[test]
    fn graph_patches_wait_for_session_graph() {
        let runs = Arc::new(AtomicUsize::new(0));
        let patch = |phase| {
            counting_patch("1.1.0", phase, "graph", runs.clone(), false).using_graph()
        };

        // Without a graph the patch stays pending and the marker holds
        let store = Arc::new(InMemoryStore::new());
        let mut directory = HotFixDirectory::new();
        directory.register(Box::new(patch(HotFixPhase::AfterSync)));
        let hotfix = HotFix::store_only(directory, store.clone());
        set_marker(&store, HotFixPhase::AfterSync, "1.0.0");
        let report = hotfix.apply_patches_after_sync_completed(&v("1.2.0")).unwrap();
        assert_eq!(report.failed.unwrap().name, "graph");
        assert_eq!(report.marker.as_deref(), Some("1.0.0"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        // At startup the session graph is still empty
        let store = Arc::new(InMemoryStore::new());
        let mut directory = HotFixDirectory::new();
        directory.register(Box::new(patch(HotFixPhase::Startup)));
        let hotfix = HotFix::new(directory, store.clone(), Arc::new(ObjectGraph::new()));
        set_marker(&store, HotFixPhase::Startup, "1.0.0");
        assert!(!hotfix.apply_patches_at_startup(&v("1.2.0")).unwrap().is_success());
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        // After sync on the session runner it applies
        let store = Arc::new(InMemoryStore::new());
        let mut directory = HotFixDirectory::new();
        directory.register(Box::new(patch(HotFixPhase::AfterSync)));
        let hotfix = HotFix::new(directory, store.clone(), Arc::new(ObjectGraph::new()));
        set_marker(&store, HotFixPhase::AfterSync, "1.0.0");
        let report = hotfix.apply_patches_after_sync_completed(&v("1.2.0")).unwrap();
        assert!(report.is_success());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unreadable_marker_is_fresh_install() {
        let (hotfix, fixture) = runner(&["1.1.0"], None);
        set_marker(&fixture.store, HotFixPhase::Startup, "garbage");

        let report = hotfix.apply_patches_at_startup(&v("1.1.0")).unwrap();
        assert!(report.fresh_install);
        assert_eq!(runs(&fixture), vec![0]);
    }
}

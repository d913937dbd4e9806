//! Registry of hotfix patches.

use super::patches::{
    InsertNewConversationSystemMessages, PurgePreviouslyReceivedEventIds,
    ResetPushTokenRegistration,
};
use super::{HotFixPatch, HotFixPhase, Version};
use serde::Serialize;

/// Description of a registered patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotFixInfo {
    /// Patch version.
    pub version: String,
    /// Phase the patch runs in.
    pub phase: HotFixPhase,
    /// Patch name.
    pub name: String,
}

/// Ordered collection of hotfix patches.
#[derive(Default)]
pub struct HotFixDirectory {
    patches: Vec<Box<dyn HotFixPatch>>,
}

impl HotFixDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the directory of patches shipped with the engine.
    pub fn built_in() -> Self {
        let mut directory = Self::new();
        directory.register(Box::new(ResetPushTokenRegistration::new()));
        directory.register(Box::new(InsertNewConversationSystemMessages::new()));
        directory.register(Box::new(PurgePreviouslyReceivedEventIds::new()));
        directory
    }

    /// Registers a patch.
    pub fn register(&mut self, patch: Box<dyn HotFixPatch>) {
        self.patches.push(patch);
    }

    /// Returns the number of patches.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Returns true if no patch is registered.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Returns the patches of a phase in ascending version order. Patches
    /// with equal versions keep their registration order.
    pub fn patches_for(&self, phase: HotFixPhase) -> Vec<&dyn HotFixPatch> {
        let mut patches: Vec<&dyn HotFixPatch> = self
            .patches
            .iter()
            .filter(|p| p.phase() == phase)
            .map(|p| p.as_ref())
            .collect();
        patches.sort_by(|a, b| a.version().cmp(b.version()));
        patches
    }

    /// Returns the patches of a phase with `marker < version <= current`.
    pub fn pending(
        &self,
        phase: HotFixPhase,
        marker: &Version,
        current: &Version,
    ) -> Vec<&dyn HotFixPatch> {
        self.patches_for(phase)
            .into_iter()
            .filter(|p| p.version() > marker && p.version() <= current)
            .collect()
    }

    /// Lists every patch in phase and version order.
    pub fn list(&self) -> Vec<HotFixInfo> {
        [HotFixPhase::Startup, HotFixPhase::AfterSync]
            .into_iter()
            .flat_map(|phase| self.patches_for(phase))
            .map(|p| HotFixInfo {
                version: p.version().to_string(),
                phase: p.phase(),
                name: p.name().to_string(),
            })
            .collect()
    }
}

impl std::fmt::Debug for HotFixDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotFixDirectory")
            .field("patches", &self.list())
            .finish()
    }
}

use anyhow::{Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::item::ContentModification;
use crate::patch::{LayerKind, PatchType};

/// The applied-patch state of one patchable target: the current cumulative
/// patch id (None means the unpatched release base) and the one-off element
/// ids layered on top of it, in apply order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_offs: Vec<String>,
}

impl TargetState {
    pub fn is_applied(&self, id: &str) -> bool {
        self.cumulative.as_deref() == Some(id) || self.one_offs.iter().any(|one_off| one_off == id)
    }

    /// The most recently applied id, if any.
    pub fn last_applied(&self) -> Option<&str> {
        self.one_offs
            .last()
            .map(String::as_str)
            .or(self.cumulative.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackElement {
    pub element_id: String,
    pub layer: String,
    pub layer_kind: LayerKind,
    #[serde(default)]
    pub modifications: Vec<ContentModification>,
    pub prior_state: TargetState,
}

/// The durable history entry written at commit time (`rollback.toml`).
/// Carries everything needed to undo the patch long after the original
/// bundle is gone: inverse modifications, the prior state of every touched
/// target, and the chain pointer to the patch applied before this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub patch_id: String,
    pub patch_type: PatchType,
    pub identity_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_patch_id: Option<String>,
    pub restored_version: Version,
    #[serde(default)]
    pub modifications: Vec<ContentModification>,
    #[serde(default)]
    pub elements: Vec<RollbackElement>,
    pub prior_identity_state: TargetState,
}

impl RollbackRecord {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("failed to parse rollback record")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize rollback record")
    }
}

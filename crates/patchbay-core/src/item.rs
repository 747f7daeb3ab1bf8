use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A unit of patchable content: a module (name + slot) or a misc file
/// addressed by its image-relative path. Identity is the name/slot or path;
/// the content version is the hash carried by the surrounding modification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentItem {
    Module { name: String, slot: String },
    MiscFile { path: String },
}

impl ContentItem {
    pub fn module(name: impl Into<String>, slot: impl Into<String>) -> Self {
        Self::Module {
            name: name.into(),
            slot: slot.into(),
        }
    }

    pub fn misc_file(path: impl Into<String>) -> Self {
        Self::MiscFile { path: path.into() }
    }

    pub fn is_module(&self) -> bool {
        matches!(self, Self::Module { .. })
    }

    /// Relative location of a module under a module root: the dotted name
    /// split into directories, then the slot.
    pub fn module_relative_path(&self) -> Option<PathBuf> {
        let Self::Module { name, slot } = self else {
            return None;
        };
        let mut path = PathBuf::new();
        for segment in name.split('.') {
            path.push(segment);
        }
        path.push(slot);
        Some(path)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Module { name, slot } => {
                if name.is_empty() || name.split('.').any(str::is_empty) {
                    return Err(anyhow!("invalid module name: '{name}'"));
                }
                if slot.is_empty() {
                    return Err(anyhow!("module '{name}' has an empty slot"));
                }
            }
            Self::MiscFile { path } => {
                if path.is_empty() {
                    return Err(anyhow!("misc file path must not be empty"));
                }
                if path.starts_with('/') || path.contains('\\') {
                    return Err(anyhow!("misc file path must be relative: {path}"));
                }
                if path.split('/').any(|segment| segment == ".." || segment.is_empty()) {
                    return Err(anyhow!("misc file path must not include '..': {path}"));
                }
            }
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Module { name, slot } => format!("module {name}:{slot}"),
            Self::MiscFile { path } => format!("file {path}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModificationKind {
    Add,
    Update,
    Remove,
}

impl ModificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "add" => Ok(Self::Add),
            "update" => Ok(Self::Update),
            "remove" => Ok(Self::Remove),
            _ => Err(anyhow!("invalid modification kind: {value}")),
        }
    }
}

/// One operation on a content item. `existing_hash` is what the patch
/// expects to find on disk before the operation (conflict detection);
/// `new_hash` is the identity of the content it installs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentModification {
    pub kind: ModificationKind,
    pub item: ContentItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<String>,
}

impl ContentModification {
    pub fn add(item: ContentItem, new_hash: impl Into<String>) -> Self {
        Self {
            kind: ModificationKind::Add,
            item,
            existing_hash: None,
            new_hash: Some(new_hash.into()),
        }
    }

    pub fn update(
        item: ContentItem,
        existing_hash: impl Into<String>,
        new_hash: impl Into<String>,
    ) -> Self {
        Self {
            kind: ModificationKind::Update,
            item,
            existing_hash: Some(existing_hash.into()),
            new_hash: Some(new_hash.into()),
        }
    }

    pub fn remove(item: ContentItem, existing_hash: impl Into<String>) -> Self {
        Self {
            kind: ModificationKind::Remove,
            item,
            existing_hash: Some(existing_hash.into()),
            new_hash: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.item.validate()?;
        let shape_ok = match self.kind {
            ModificationKind::Add => self.existing_hash.is_none() && self.new_hash.is_some(),
            ModificationKind::Update => self.existing_hash.is_some() && self.new_hash.is_some(),
            ModificationKind::Remove => self.existing_hash.is_some() && self.new_hash.is_none(),
        };
        if !shape_ok {
            return Err(anyhow!(
                "{} of {} carries the wrong hash shape",
                self.kind.as_str(),
                self.item.describe()
            ));
        }
        Ok(())
    }

    /// The modification that undoes this one.
    pub fn inverse(&self) -> ContentModification {
        let kind = match self.kind {
            ModificationKind::Add => ModificationKind::Remove,
            ModificationKind::Update => ModificationKind::Update,
            ModificationKind::Remove => ModificationKind::Add,
        };
        ContentModification {
            kind,
            item: self.item.clone(),
            existing_hash: self.new_hash.clone(),
            new_hash: self.existing_hash.clone(),
        }
    }
}

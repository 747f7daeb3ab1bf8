use patchbay_core::ContentItem;
use thiserror::Error;

/// Typed failures of the patching engine. I/O and structural failures are
/// wrapped with context and surface through `Other`; everything an operator
/// can act on gets its own variant.
#[derive(Debug, Error)]
pub enum PatchingError {
    #[error("patch applies to version {applies_to}, installed identity is {current}")]
    VersionMismatch { applies_to: String, current: String },

    #[error("patch '{0}' is already applied")]
    AlreadyApplied(String),

    #[error("patch requires '{0}' to be applied first")]
    MissingRequirement(String),

    #[error("patch is incompatible with applied patch '{0}'")]
    Incompatible(String),

    #[error("content conflicts detected: {}", describe_conflicts(.0))]
    Conflicts(Vec<ContentItem>),

    #[error("cannot roll back: {0}")]
    CannotRollback(String),

    #[error("no patches applied")]
    NoPatchesApplied,

    #[error("no such {kind} '{name}' in the installation")]
    NoSuchTarget { kind: &'static str, name: String },

    #[error("another patching operation is in progress")]
    OperationInProgress,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn describe_conflicts(items: &[ContentItem]) -> String {
    items
        .iter()
        .map(ContentItem::describe)
        .collect::<Vec<_>>()
        .join(", ")
}

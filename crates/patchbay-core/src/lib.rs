mod hash;
mod item;
mod patch;
mod rollback;

pub use hash::{hash_directory, hash_file, hash_path};
pub use item::{ContentItem, ContentModification, ModificationKind};
pub use patch::{LayerKind, Patch, PatchElement, PatchType};
pub use rollback::{RollbackElement, RollbackRecord, TargetState};

#[cfg(test)]
mod tests;

mod apply;
mod bundle;
mod error;
mod fs_utils;
mod garbage;
mod history;
mod image;
mod layout;
mod resolve;
mod rollback;

pub use apply::{apply_patch, ContentPolicy, PatchingResult};
pub use bundle::{apply_bundle, BundleEntry, BundleManifest, BUNDLE_MANIFEST_FILE};
pub use error::PatchingError;
pub use garbage::{GarbageLocator, GcReport};
pub use history::{patch_history, HistoryEntry};
pub use image::{InstalledImage, PatchableTarget, TargetKind, BASE_LAYER};
pub use layout::{ImageLayout, PATCH_METADATA_FILE, ROLLBACK_RECORD_FILE};
pub use resolve::{resolve_module_dir, resolve_module_dir_with_state};
pub use rollback::{rollback_last, rollback_patch, RollbackOutcome};

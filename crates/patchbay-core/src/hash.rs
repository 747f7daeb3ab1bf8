use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a single file's bytes.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read content for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Digest of a directory tree that is stable regardless of filesystem
/// iteration order: the per-file hashes are combined sorted by their
/// forward-slash relative paths.
pub fn hash_directory(path: &Path) -> Result<String> {
    if !path.is_dir() {
        return Err(anyhow!("not a directory: {}", path.display()));
    }

    let mut entries = Vec::new();
    collect_file_hashes(path, path, &mut entries)?;
    entries.sort();

    let mut hasher = Sha256::new();
    for (rel, digest) in &entries {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file or a directory, whichever the path points at. A missing path
/// is a precondition failure, not a recoverable condition.
pub fn hash_path(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("content to hash does not exist: {}", path.display()))?;
    if metadata.is_dir() {
        hash_directory(path)
    } else {
        hash_file(path)
    }
}

fn collect_file_hashes(
    root: &Path,
    current: &Path,
    out: &mut Vec<(String, String)>,
) -> Result<()> {
    for entry in
        fs::read_dir(current).with_context(|| format!("failed to read {}", current.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_file_hashes(root, &path, out)?;
            continue;
        }

        let rel = path
            .strip_prefix(root)
            .with_context(|| format!("failed to relativize {}", path.display()))?;
        let rel = rel
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        out.push((rel, hash_file(&path)?));
    }
    Ok(())
}

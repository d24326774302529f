//! Filesystem helpers shared by the catalog and archive store.
//!
//! Both on-disk formats persist a rewritten file through the same
//! non-atomic primitive: copy a source file's bytes over a destination,
//! then remove the source. See [`safe_overwrite`] for why this is not a
//! true atomic rename and what callers must do to stay crash-recoverable.

use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Overwrites `dst` with the contents of `src`, then removes `src`.
///
/// `dst` need not exist beforehand. This is **not** atomic: a crash
/// between the copy and the removal of `src` leaves both `dst` (already
/// updated) and `src` (not yet removed) on disk, which is safe to observe
/// but means callers should not assume `src` is gone until this returns.
/// A crash *during* the copy can leave `dst` truncated or partially
/// written — callers that need crash recovery across this window keep a
/// `.old` backup and restore from it (see the catalog's `save`/`load`).
///
/// Used two ways by this format:
/// - **Backup before rewrite**: `safe_overwrite(&old_path, &live_path)`
///   copies the live file into its backup slot and removes the live
///   path, so the caller's subsequent full rewrite starts from a clean
///   slate with the previous generation recoverable at `old_path`.
/// - **Replace with rewritten copy**: `safe_overwrite(&live_path, &new_path)`
///   copies a freshly written `.new` file over the live file (e.g. after
///   widening an archive's schema) and removes the `.new` file.
pub fn safe_overwrite(dst: &Path, src: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;
    fs::remove_file(src)?;
    Ok(())
}

/// Fsyncs a directory so that prior renames/creates within it are durable.
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    let dir_file = File::open(dir)?;
    dir_file.sync_all()?;
    Ok(())
}

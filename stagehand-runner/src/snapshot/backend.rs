//! Snapshot backends
//!
//! A backend moves bytes between the live directory and a snapshot
//! directory. The store decides which paths to move and when; the backend
//! decides how (plain copies here, copy-on-write or content-addressed
//! schemes elsewhere).

use std::io;
use std::path::Path;

use crate::fsutil;

pub trait SnapshotBackend: Send + Sync {
    /// Copies `live_root/rel` into `snapshot_root/rel`
    fn capture(&self, live_root: &Path, snapshot_root: &Path, rel: &Path) -> io::Result<()>;

    /// Replaces `live_root/rel` with `snapshot_root/rel`
    ///
    /// Must be idempotent: applying it twice yields the same live state.
    fn restore_path(&self, snapshot_root: &Path, live_root: &Path, rel: &Path) -> io::Result<()>;

    /// Deletes a snapshot directory and everything under it
    fn discard(&self, snapshot_root: &Path) -> io::Result<()>;
}

/// Recursive file copy backend
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyBackend;

impl SnapshotBackend for CopyBackend {
    fn capture(&self, live_root: &Path, snapshot_root: &Path, rel: &Path) -> io::Result<()> {
        fsutil::copy_path(&live_root.join(rel), &snapshot_root.join(rel))
    }

    fn restore_path(&self, snapshot_root: &Path, live_root: &Path, rel: &Path) -> io::Result<()> {
        let src = snapshot_root.join(rel);
        if !fsutil::exists(&src) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} missing from snapshot", rel.display()),
            ));
        }
        fsutil::replace_path(&src, &live_root.join(rel))
    }

    fn discard(&self, snapshot_root: &Path) -> io::Result<()> {
        fsutil::remove_path(snapshot_root)
    }
}

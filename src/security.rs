#![forbid(unsafe_code)]

//! Process-level guards for the API server.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start when the server runs as root. Uploaded media is written
/// below `MEDIA_ROOT`, so the process should own that tree as a normal user.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; start it under a dedicated service account");
    }
    Ok(())
}

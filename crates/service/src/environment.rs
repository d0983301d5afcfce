use std::path::Path;

use {
    anyhow::{Context, bail},
    tracing::{debug, info},
};

/// Marker written into the install directory once it is prepared.
pub const VERSION_MARKER: &str = ".version";

/// Prepare the install and data directories.
///
/// Both are created if missing. The install directory carries a version
/// marker that is rewritten when it does not match this build.
pub fn ensure(install_dir: &Path, data_dir: &Path) -> anyhow::Result<()> {
    ensure_dir(data_dir).context("data directory unavailable")?;
    ensure_dir(install_dir).context("install directory unavailable")?;

    let marker = install_dir.join(VERSION_MARKER);
    let current = env!("CARGO_PKG_VERSION");
    let installed = std::fs::read_to_string(&marker).ok();

    match installed.as_deref().map(str::trim) {
        Some(v) if v == current => {
            debug!(install_dir = %install_dir.display(), version = current, "install directory up to date");
        },
        previous => {
            std::fs::write(&marker, current)
                .with_context(|| format!("failed to write {}", marker.display()))?;
            info!(
                install_dir = %install_dir.display(),
                previous = previous.unwrap_or("none"),
                version = current,
                "install directory prepared"
            );
        },
    }
    Ok(())
}

fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if path.exists() && !path.is_dir() {
        bail!("{} exists and is not a directory", path.display());
    }
    std::fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}

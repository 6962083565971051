use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::manager::PoolManager;
use crate::driver::Driver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

async fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(Fingerprint {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

/// Poll `path` and bump the pool serial whenever the file changes underneath us, so every
/// pooled client opened on the old file is discarded at its next checkout or release.
pub(crate) fn spawn_watch<D: Driver>(
    manager: PoolManager<D>,
    path: PathBuf,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = fingerprint(&path).await;
        debug!("pool: watching {} for {}", path.display(), manager.name);
        loop {
            tokio::time::sleep(interval).await;
            let current = fingerprint(&path).await;
            if current != last {
                let serial = manager.bump_serial();
                warn!("pool: changed {} {} #{serial}", manager.name, path.display());
                last = current;
            }
        }
    })
}

//! On-disk snapshot of the last good dataset (bincode + zstd).
//!
//! Lets a restarted process serve the previous dataset as stale while the
//! first rebuild runs.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ingest::Dataset;

/// Snapshot format version - bump when `Dataset` serialization changes
const SNAPSHOT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Snapshot encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Snapshot version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    dataset: &'a Dataset,
}

#[derive(Deserialize)]
struct SnapshotOwned {
    version: u32,
    dataset: Dataset,
}

/// Write `dataset` to `path`, replacing any previous snapshot atomically
pub fn save_snapshot(path: &Path, dataset: &Dataset) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    let file = File::create(&tmp_path)?;
    let mut encoder = zstd::stream::Encoder::new(BufWriter::new(file), ZSTD_LEVEL)?;
    bincode::serialize_into(
        &mut encoder,
        &SnapshotRef {
            version: SNAPSHOT_VERSION,
            dataset,
        },
    )?;
    let mut writer = encoder.finish()?;
    io::Write::flush(&mut writer)?;
    drop(writer);

    fs::rename(&tmp_path, path)?;
    log::debug!("Dataset snapshot written to {}", path.display());
    Ok(())
}

/// Read a snapshot written by `save_snapshot`
pub fn load_snapshot(path: &Path) -> Result<Dataset, SnapshotError> {
    let file = File::open(path)?;
    let decoder = zstd::stream::Decoder::new(file)?;
    let snapshot: SnapshotOwned = bincode::deserialize_from(decoder)?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    Ok(snapshot.dataset)
}

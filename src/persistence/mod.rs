// Durable trading record: stats snapshot and trade journal
pub mod journal;
pub mod ledger;

pub use journal::TradeJournal;
pub use ledger::{Stats, StatsLedger};

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::PersistenceError;

/// Replace `path` with `bytes` without ever exposing a half-written file
///
/// Writes to a `.tmp` sibling, syncs it, then renames it into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    let mut file = fs::File::create(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(tmp_path);
        PersistenceError::Io(e)
    })
}

use crate::error::{LayerFsError, Result};
use crate::overlay::ledger::read_entries;
use crate::overlay::LEDGER_FILE;
use std::path::{Path, PathBuf};

/// Promoted logical paths recorded under `layer_storage`, sorted.
pub fn shadowed_paths(layer_storage: &Path) -> Result<Vec<PathBuf>> {
    if !layer_storage.is_dir() {
        return Err(LayerFsError::InvalidArgument(format!(
            "Layer storage {} is not a directory",
            layer_storage.display()
        )));
    }

    let ledger_path = layer_storage.join(LEDGER_FILE);
    let mut entries = read_entries(&ledger_path).map_err(|e| {
        LayerFsError::Ledger(format!("Failed to read {}: {}", ledger_path.display(), e))
    })?;
    entries.sort();
    Ok(entries)
}

pub fn list_shadowed(layer_storage: &Path, json: bool) -> Result<()> {
    let entries = shadowed_paths(layer_storage)?;

    if json {
        let paths: Vec<_> = entries
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        println!("{}", serde_json::to_string(&paths)?);
    } else {
        for entry in &entries {
            println!("{}", entry.display());
        }
    }

    Ok(())
}

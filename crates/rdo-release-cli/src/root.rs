use rdo_release_core::ReleaseError;
use std::path::{Path, PathBuf};

/// Resolve the base directory holding `data/` and `logs/`.
///
/// Priority:
/// 1. `--directory` flag / `RDO_RELEASE_DIR` env var (passed in as `explicit`)
/// 2. The user's home directory
pub fn resolve_base(explicit: Option<&Path>) -> Result<PathBuf, ReleaseError> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    home::home_dir().ok_or(ReleaseError::HomeNotFound)
}

//! Materializes template trees compiled into the binary.
//!
//! Plugins embed their templates with `include_str!` as a table of
//! `(relative path, content)` pairs; [`place_asset`] writes the subtree
//! under a logical asset path into a destination directory.

use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{GravitonError, Result};

/// An embedded file tree: `(path relative to the tree root, content)`.
pub type AssetTable = &'static [(&'static str, &'static str)];

/// Write every asset under `asset_path` into `dest_root/asset_path`.
///
/// Directories are created with mode 0755. With `overwrite == false`
/// existing files are left intact. Returns the absolute path of the
/// staged subtree.
pub fn place_asset(
    assets: AssetTable,
    dest_root: &Path,
    asset_path: &str,
    overwrite: bool,
) -> Result<PathBuf> {
    let prefix = asset_path.trim_matches('/');
    let matching: Vec<(&str, &str)> = assets
        .iter()
        .filter_map(|(path, content)| {
            let rel = path.strip_prefix(prefix)?;
            if prefix.is_empty() || rel.starts_with('/') {
                Some((rel.trim_start_matches('/'), *content))
            } else {
                None
            }
        })
        .collect();
    if matching.is_empty() {
        return Err(GravitonError::Staging(format!("unknown asset path {asset_path}")));
    }

    let dest = dest_root.join(prefix);
    create_dir(&dest)?;
    let dest = dest
        .canonicalize()
        .map_err(|e| staging_err(&dest, e))?;

    for (rel, content) in matching {
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }
        if !overwrite && target.exists() {
            debug!(path = %target.display(), "asset exists, leaving intact");
            continue;
        }
        fs::write(&target, content).map_err(|e| staging_err(&target, e))?;
    }

    debug!(asset = asset_path, dest = %dest.display(), "assets staged");
    Ok(dest)
}

fn create_dir(path: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .map_err(|e| staging_err(path, e))
}

fn staging_err(path: &Path, e: std::io::Error) -> GravitonError {
    GravitonError::Staging(format!("{}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    const TREE: AssetTable = &[
        ("etc/iac/volumes/main.tf", "# volumes"),
        ("etc/iac/volumes/builder.tf", "# builder"),
        ("etc/iac/instance/main.tf", "# instance"),
        ("etc/iac-extra/readme", "not part of etc/iac"),
        ("etc/packer/template.json", "{}"),
    ];

    #[test]
    fn stages_subtree_with_directories() {
        let dir = tempfile::tempdir().unwrap();
        let dest = place_asset(TREE, dir.path(), "etc/iac", true).unwrap();

        assert!(dest.is_absolute());
        assert_eq!(dest, dir.path().canonicalize().unwrap().join("etc/iac"));
        assert_eq!(fs::read_to_string(dest.join("volumes/builder.tf")).unwrap(), "# builder");
        assert!(dest.join("instance/main.tf").is_file());
        assert!(!dir.path().join("etc/iac-extra").exists());
        assert!(!dir.path().join("etc/packer").exists());

        let mode = fs::metadata(dest.join("volumes")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o755, 0o755);
    }

    #[test]
    fn overwrite_false_keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = place_asset(TREE, dir.path(), "etc/iac", true).unwrap();
        fs::write(dest.join("volumes/main.tf"), "edited").unwrap();
        fs::remove_file(dest.join("volumes/builder.tf")).unwrap();

        place_asset(TREE, dir.path(), "etc/iac", false).unwrap();
        assert_eq!(fs::read_to_string(dest.join("volumes/main.tf")).unwrap(), "edited");
        assert!(dest.join("volumes/builder.tf").is_file());

        place_asset(TREE, dir.path(), "etc/iac", true).unwrap();
        assert_eq!(fs::read_to_string(dest.join("volumes/main.tf")).unwrap(), "# volumes");
    }

    #[test]
    fn unknown_asset_path_is_a_staging_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = place_asset(TREE, dir.path(), "etc/ansible", true).unwrap_err();
        assert!(matches!(err, GravitonError::Staging(_)));
    }
}

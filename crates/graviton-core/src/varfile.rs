//! JSON persistence: IaC variables files and deployment descriptors.
//!
//! Writes land in a temp file in the destination directory and are
//! renamed into place, so readers never observe a half-written file.
//! Files are created with mode 0600.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{GravitonError, Result};

/// Atomically write `value` as pretty JSON to `path` with mode 0600.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &data)
}

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read(path).map_err(|e| GravitonError::persist(path, e))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Serialize `vars` as an IaC variables file: a flat object mapping
/// variable name to string value.
pub fn write_var_file<T: Serialize>(path: &Path, vars: &T) -> Result<()> {
    let value = serde_json::to_value(vars)?;
    let object = value.as_object().ok_or_else(|| {
        GravitonError::precondition("a variables file must serialize to a JSON object")
    })?;
    if let Some((name, _)) = object.iter().find(|(_, v)| !v.is_string()) {
        return Err(GravitonError::precondition(format!(
            "IaC variable {name} must be a string"
        )));
    }
    write_json(path, &value)?;
    debug!(path = %path.display(), vars = object.len(), "variables file written");
    Ok(())
}

/// Load a variables file back into its state struct.
pub fn read_var_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    read_json(path)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let persist_err = |e: std::io::Error| GravitonError::persist(path, e);

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persist_err)?;
    tmp.write_all(data).map_err(persist_err)?;
    tmp.as_file().sync_all().map_err(persist_err)?;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600)).map_err(persist_err)?;
    tmp.persist(path).map_err(|e| persist_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Vars {
        cluster_size: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        region: String,
    }

    #[test]
    fn var_file_round_trips_and_is_private() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let vars = Vars {
            cluster_size: "3".to_string(),
            region: String::new(),
        };

        write_var_file(&path, &vars).unwrap();

        let back: Vars = read_var_file(&path).unwrap();
        assert_eq!(back, vars);

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let raw: BTreeMap<String, String> = read_json(&path).unwrap();
        assert!(!raw.contains_key("region"));
    }

    #[test]
    fn rewrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_var_file(&path, &BTreeMap::from([("a", "1")])).unwrap();
        write_var_file(&path, &BTreeMap::from([("a", "2")])).unwrap();

        let raw: BTreeMap<String, String> = read_json(&path).unwrap();
        assert_eq!(raw["a"], "2");
        // No temp files left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn non_string_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let err = write_var_file(&path, &BTreeMap::from([("cluster_size", 3)])).unwrap_err();
        assert!(err.to_string().contains("cluster_size"));
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_is_a_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_json::<Vars>(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, GravitonError::StatePersist { .. }));
    }
}

//! hashmirror configuration file parsing (hashmirror.toml)

use std::path::{Component, Path, PathBuf};

use color_eyre::eyre::{WrapErr as _, bail};

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE: &str = "hashmirror.toml";

/// Longest accepted store namespace
const MAX_NAMESPACE_LEN: usize = 48;

/// hashmirror configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Where fingerprint records are kept
    pub store: StoreConfig,
    /// The two trees being reconciled
    pub folders: FolderConfig,
}

/// Record store location
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StoreConfig {
    /// LMDB environment directory
    pub path: PathBuf,
    /// Prefix for the per-tree database names
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Source and backup roots
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FolderConfig {
    pub source: PathBuf,
    pub backup: PathBuf,
    /// Glob patterns never scanned or copied
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_namespace() -> String {
    "hashmirror".to_string()
}

impl Config {
    /// Load and validate a config file.
    ///
    /// A relative `store.path` is resolved against the directory holding
    /// the config file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::from_toml_str(&content)
            .wrap_err_with(|| format!("invalid config {}", path.display()))?;

        if config.store.path.is_relative() {
            if let Some(dir) = path.parent() {
                config.store.path = dir.join(&config.store.path);
            }
        }

        Ok(config)
    }

    /// Parse and validate config text.
    ///
    /// # Errors
    /// Returns an error if the TOML is malformed or a value is invalid.
    pub fn from_toml_str(content: &str) -> color_eyre::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> color_eyre::Result<()> {
        validate_namespace(&self.store.namespace)?;
        if self.folders.source.as_os_str().is_empty() {
            bail!("folders.source must not be empty");
        }
        if self.folders.backup.as_os_str().is_empty() {
            bail!("folders.backup must not be empty");
        }
        let source = normalize(&self.folders.source)?;
        let backup = normalize(&self.folders.backup)?;
        if source == backup {
            bail!("folders.source and folders.backup must differ");
        }
        // A nested root would be scanned as part of the other tree and
        // copied into itself on every pass
        if backup.starts_with(&source) {
            bail!(
                "folders.backup ({}) must not be inside folders.source ({})",
                self.folders.backup.display(),
                self.folders.source.display()
            );
        }
        if source.starts_with(&backup) {
            bail!(
                "folders.source ({}) must not be inside folders.backup ({})",
                self.folders.source.display(),
                self.folders.backup.display()
            );
        }
        Ok(())
    }
}

/// Absolute form of `path` with `.` and `..` resolved lexically. The
/// roots may not exist yet, so the filesystem is not consulted.
fn normalize(path: &Path) -> color_eyre::Result<PathBuf> {
    let absolute = std::path::absolute(path)
        .wrap_err_with(|| format!("cannot resolve {}", path.display()))?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

/// Check that a store namespace is a plain identifier.
///
/// The namespace is interpolated into database names, so only
/// `[A-Za-z0-9_]` is accepted and it may not start with a digit.
///
/// # Errors
/// Returns an error describing the first violation.
pub fn validate_namespace(namespace: &str) -> color_eyre::Result<()> {
    if namespace.is_empty() || namespace.len() > MAX_NAMESPACE_LEN {
        bail!("store namespace must be 1-{MAX_NAMESPACE_LEN} characters, got {namespace:?}");
    }
    if namespace.starts_with(|c: char| c.is_ascii_digit()) {
        bail!("store namespace must not start with a digit: {namespace:?}");
    }
    if !namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!("store namespace may only contain letters, digits and '_': {namespace:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[store]
path = "/var/lib/hashmirror"
namespace = "nightly"

[folders]
source = "/data"
backup = "/mnt/backup/data"
exclude = ["*.tmp", "cache/"]
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(FULL).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/var/lib/hashmirror"));
        assert_eq!(config.store.namespace, "nightly");
        assert_eq!(config.folders.source, PathBuf::from("/data"));
        assert_eq!(config.folders.backup, PathBuf::from("/mnt/backup/data"));
        assert_eq!(config.folders.exclude, vec!["*.tmp", "cache/"]);
    }

    #[test]
    fn test_defaults() {
        let toml = r#"
[store]
path = "state"

[folders]
source = "a"
backup = "b"
"#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.store.namespace, "hashmirror");
        assert!(config.folders.exclude.is_empty());
    }

    #[test]
    fn test_missing_section_is_error() {
        assert!(Config::from_toml_str("[store]\npath = \"x\"\n").is_err());
    }

    #[test]
    fn test_same_roots_rejected() {
        let toml = r#"
[store]
path = "state"

[folders]
source = "/data"
backup = "/data"
"#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    fn folders(source: &str, backup: &str) -> String {
        format!("[store]\npath = \"state\"\n\n[folders]\nsource = {source:?}\nbackup = {backup:?}\n")
    }

    #[test]
    fn test_nested_roots_rejected() {
        assert!(Config::from_toml_str(&folders("/data", "/data/backup")).is_err());
        assert!(Config::from_toml_str(&folders("/mnt/backup/data", "/mnt/backup")).is_err());
        assert!(Config::from_toml_str(&folders("/data", "/data/sub/../backup")).is_err());
        assert!(Config::from_toml_str(&folders("/data/./", "/data")).is_err());
    }

    #[test]
    fn test_sibling_roots_accepted() {
        assert!(Config::from_toml_str(&folders("/data", "/data2")).is_ok());
        assert!(Config::from_toml_str(&folders("/data/photos", "/data/backup")).is_ok());
    }

    #[test]
    fn test_namespace_validation() {
        assert!(validate_namespace("backups_2").is_ok());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("2fast").is_err());
        assert!(validate_namespace("a-b").is_err());
        assert!(validate_namespace("x; DROP TABLE y").is_err());
        assert!(validate_namespace(&"a".repeat(49)).is_err());
    }

    #[test]
    fn test_load_resolves_relative_store_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[store]\npath = \"state\"\n\n[folders]\nsource = \"/src\"\nbackup = \"/dst\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.store.path, dir.path().join("state"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(&dir.path().join(CONFIG_FILE)).is_err());
    }
}

//! Stored API keys and the default provider.
//!
//! Keys live in `$XDG_CONFIG_HOME/imggen/config.json` (or the platform
//! config directory). The directory is owner-only and the file is written
//! with mode 0600.

use crate::error::{ImgGenError, Result};
use crate::types::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Provider used when none is configured.
pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::OpenAI;

const CONFIG_FILE: &str = "config.json";

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// API key per provider identifier.
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
    /// Provider used when none is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
}

impl Config {
    /// Stored key for `kind`, ignoring empty values.
    pub fn api_key(&self, kind: ProviderKind) -> Option<&str> {
        self.api_keys
            .get(kind.as_str())
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }

    /// Stores a key for `kind`.
    pub fn set_api_key(&mut self, kind: ProviderKind, key: impl Into<String>) {
        self.api_keys.insert(kind.as_str().to_string(), key.into());
    }

    /// Configured default provider, or [`DEFAULT_PROVIDER`].
    pub fn default_provider(&self) -> ProviderKind {
        self.default_provider
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PROVIDER)
    }

    /// Rewrites the single-key layout `{"api_key": ...}` as a Google key.
    ///
    /// Returns true when the value was changed.
    fn migrate_legacy(raw: &mut serde_json::Value) -> bool {
        let Some(obj) = raw.as_object_mut() else {
            return false;
        };
        if !obj.contains_key("api_key") || obj.contains_key("api_keys") {
            return false;
        }
        let key = obj.remove("api_key").unwrap_or_default();
        obj.insert(
            "api_keys".to_string(),
            serde_json::json!({ "google": key }),
        );
        obj.insert(
            "default_provider".to_string(),
            serde_json::json!("google"),
        );
        true
    }
}

/// Location of the config file on disk.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at the standard per-user location.
    pub fn locate() -> Result<Self> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(dirs::config_dir)
            .ok_or_else(|| ImgGenError::Config("could not determine config directory".into()))?;
        Ok(Self::at(base.join("imggen").join(CONFIG_FILE)))
    }

    /// Store at an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the config, migrating the legacy layout in place.
    ///
    /// A missing, unreadable, or corrupt file loads as an empty config.
    pub fn load(&self) -> Config {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return Config::default();
        };
        let mut raw: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring unreadable config: {e}");
                return Config::default();
            }
        };

        let migrated = Config::migrate_legacy(&mut raw);
        let config: Config = serde_json::from_value(raw).unwrap_or_default();

        if migrated {
            tracing::info!(path = %self.path.display(), "migrated legacy config");
            if let Err(e) = self.save(&config) {
                tracing::warn!("could not rewrite migrated config: {e}");
            }
        }
        config
    }

    /// Writes the config with owner-only permissions.
    pub fn save(&self, config: &Config) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| ImgGenError::Config("config path has no parent directory".into()))?;
        std::fs::create_dir_all(dir)?;
        restrict_permissions(dir, 0o700)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, config)?;
        file.write_all(b"\n")?;
        file.persist(&self.path).map_err(|e| ImgGenError::Io(e.error))?;
        restrict_permissions(&self.path, 0o600)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Source of API keys.
pub trait CredentialProvider {
    /// Returns a usable key for `kind`.
    fn api_key_for_provider(&self, kind: ProviderKind) -> Result<String>;
}

/// Resolves keys from the environment, then the config file, then by asking.
///
/// Keys typed at the prompt are saved for next time.
#[derive(Debug, Clone)]
pub struct ConfigCredentials {
    store: ConfigStore,
}

impl ConfigCredentials {
    /// Credentials backed by `store`, prompting on stdin when a key is missing.
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    fn lookup(&self, kind: ProviderKind) -> Option<String> {
        if let Some(key) = std::env::var(kind.env_var()).ok().filter(|k| !k.is_empty()) {
            tracing::debug!(provider = %kind, "using key from {}", kind.env_var());
            return Some(key);
        }
        self.store.load().api_key(kind).map(str::to_string)
    }

    /// Asks for a key on `input`, saves it, and returns it.
    pub fn prompt_and_store<R: BufRead, W: Write>(
        &self,
        kind: ProviderKind,
        input: &mut R,
        output: &mut W,
    ) -> Result<String> {
        writeln!(output, "\n{} API Key Required\n", kind.display_name())?;
        writeln!(output, "Get your key from: {}", kind.key_url())?;
        write!(output, "Enter your {} API key: ", kind.display_name())?;
        output.flush()?;

        let key = read_trimmed_line(input)?;
        if key.is_empty() {
            return Err(ImgGenError::Auth("API key cannot be empty".into()));
        }

        let mut config = self.store.load();
        config.set_api_key(kind, &key);
        self.store.save(&config)?;
        writeln!(output, "\nAPI key saved to {}\n", self.store.path().display())?;
        Ok(key)
    }
}

impl CredentialProvider for ConfigCredentials {
    fn api_key_for_provider(&self, kind: ProviderKind) -> Result<String> {
        if let Some(key) = self.lookup(kind) {
            return Ok(key);
        }
        let stdin = std::io::stdin();
        self.prompt_and_store(kind, &mut stdin.lock(), &mut std::io::stdout())
    }
}

/// Interactive wizard storing keys for every provider.
///
/// Blank answers skip a provider, but at least one key is required. The
/// default provider becomes OpenAI when an OpenAI key was given.
pub fn run_setup<R: BufRead, W: Write>(
    store: &ConfigStore,
    input: &mut R,
    output: &mut W,
) -> Result<Config> {
    writeln!(output, "\n=== imggen Setup ===\n")?;

    let mut config = store.load();
    let mut entered = Vec::new();

    for kind in ProviderKind::ALL {
        writeln!(output, "Configure {} API:", kind.display_name())?;
        writeln!(output, "Get your key from: {}", kind.key_url())?;
        write!(
            output,
            "Enter your {} API key (or press Enter to skip): ",
            kind.display_name()
        )?;
        output.flush()?;

        let key = read_trimmed_line(input)?;
        writeln!(output)?;
        if !key.is_empty() {
            config.set_api_key(kind, key);
            entered.push(kind);
        }
    }

    if entered.is_empty() {
        return Err(ImgGenError::Validation(
            "At least one API key is required".into(),
        ));
    }

    let default = if entered.contains(&ProviderKind::OpenAI) {
        ProviderKind::OpenAI
    } else {
        ProviderKind::Google
    };
    config.default_provider = Some(default.as_str().to_string());
    store.save(&config)?;

    writeln!(output, "Setup complete!")?;
    writeln!(output, "Config saved to {}\n", store.path().display())?;
    Ok(config)
}

fn read_trimmed_line<R: BufRead>(input: &mut R) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn store(dir: &Path) -> ConfigStore {
        ConfigStore::at(dir.join("imggen").join(CONFIG_FILE))
    }

    #[test]
    fn test_missing_config_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let config = store(temp.path()).load();
        assert_eq!(config, Config::default());
        assert_eq!(config.default_provider(), ProviderKind::OpenAI);
    }

    #[test]
    fn test_corrupt_config_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{not json").unwrap();

        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());

        let mut config = Config::default();
        config.set_api_key(ProviderKind::OpenAI, "sk-test");
        config.default_provider = Some("google".into());
        store.save(&config).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.api_key(ProviderKind::OpenAI), Some("sk-test"));
        assert_eq!(loaded.api_key(ProviderKind::Google), None);
        assert_eq!(loaded.default_provider(), ProviderKind::Google);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());
        store.save(&Config::default()).unwrap();

        let file_mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        let dir_mode = std::fs::metadata(store.path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn test_legacy_config_is_migrated() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), r#"{"api_key": "AIza-old"}"#).unwrap();

        let config = store.load();
        assert_eq!(config.api_key(ProviderKind::Google), Some("AIza-old"));
        assert_eq!(config.default_provider(), ProviderKind::Google);

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert!(on_disk.get("api_key").is_none());
        assert_eq!(on_disk["api_keys"]["google"], "AIza-old");
        assert_eq!(on_disk["default_provider"], "google");
    }

    #[test]
    fn test_stored_key_is_used_without_prompting() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());
        let mut config = Config::default();
        config.set_api_key(ProviderKind::Google, "g-stored");
        store.save(&config).unwrap();

        // an exported key takes precedence over the file
        if std::env::var(ProviderKind::Google.env_var()).is_err() {
            let creds = ConfigCredentials::new(store);
            assert_eq!(
                creds.api_key_for_provider(ProviderKind::Google).unwrap(),
                "g-stored"
            );
        }
    }

    #[test]
    fn test_prompt_stores_key() {
        let temp = tempfile::tempdir().unwrap();
        let creds = ConfigCredentials::new(store(temp.path()));
        let mut input = Cursor::new("  sk-typed  \n");
        let mut output = Vec::new();

        let key = creds
            .prompt_and_store(ProviderKind::OpenAI, &mut input, &mut output)
            .unwrap();

        assert_eq!(key, "sk-typed");
        assert_eq!(
            store(temp.path()).load().api_key(ProviderKind::OpenAI),
            Some("sk-typed")
        );
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("https://platform.openai.com/api-keys"));
    }

    #[test]
    fn test_prompt_rejects_empty_key() {
        let temp = tempfile::tempdir().unwrap();
        let creds = ConfigCredentials::new(store(temp.path()));
        let err = creds
            .prompt_and_store(ProviderKind::Google, &mut Cursor::new("\n"), &mut Vec::new())
            .unwrap_err();

        assert!(matches!(err, ImgGenError::Auth(_)));
        assert!(!store(temp.path()).path().exists());
    }

    #[test]
    fn test_setup_prefers_openai_default() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());

        let config = run_setup(&store, &mut Cursor::new("g-key\nsk-key\n"), &mut Vec::new())
            .unwrap();
        assert_eq!(config.default_provider(), ProviderKind::OpenAI);
        assert_eq!(store.load().api_key(ProviderKind::Google), Some("g-key"));
    }

    #[test]
    fn test_setup_google_only() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());

        let config = run_setup(&store, &mut Cursor::new("g-key\n\n"), &mut Vec::new()).unwrap();
        assert_eq!(config.default_provider.as_deref(), Some("google"));
    }

    #[test]
    fn test_setup_requires_a_key() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());

        let err = run_setup(&store, &mut Cursor::new("\n\n"), &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("At least one API key is required"));
        assert!(!store.path().exists());
    }
}

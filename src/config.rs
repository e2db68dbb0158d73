//! Where the command line front end keeps its data and which cloud it talks to.

use std::path::{Path, PathBuf};

use crate::{Error, storage::LocalKeyValueStore};

/// The environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "BUDGET_DATA_DIR";
/// The environment variable holding the cloud platform URL.
pub const CLOUD_URL_ENV: &str = "BUDGET_CLOUD_URL";
/// The environment variable holding the log filter of the front end.
pub const LOG_ENV: &str = "BUDGET_LOG";
/// The environment variable holding the emulator database path.
pub const CLOUD_DB_PATH_ENV: &str = "CLOUD_DB_PATH";
/// The environment variable holding the emulator port.
pub const CLOUD_PORT_ENV: &str = "CLOUD_PORT";

/// The port the emulator listens on by default.
pub const DEFAULT_CLOUD_PORT: u16 = 8787;

/// The name of the SQLite file holding the local key-value store.
pub const DATABASE_FILE_NAME: &str = "budget_tracker.db";

/// The platform's data directory for the tracker, e.g.
/// `~/.local/share/budget-tracker` on Linux.
///
/// # Errors
/// Returns [Error::Config] if the home directory cannot be determined.
pub fn default_data_dir() -> Result<PathBuf, Error> {
    directories::ProjectDirs::from("com", "budget-tracker", "budget-tracker")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| Error::Config("could not determine the data directory".to_owned()))
}

/// Settings of the command line front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// The directory holding the local database.
    pub data_dir: PathBuf,
    /// The base URL of the cloud platform, `None` to work on this device only.
    pub cloud_url: Option<String>,
}

impl ClientConfig {
    /// Resolve the settings, using the platform data directory when `data_dir`
    /// is not given.
    ///
    /// A blank `cloud_url` is the same as none and a trailing slash is removed.
    ///
    /// # Errors
    /// Returns [Error::Config] if no data directory is given and the default
    /// cannot be determined.
    pub fn new(data_dir: Option<PathBuf>, cloud_url: Option<String>) -> Result<Self, Error> {
        let data_dir = match data_dir {
            Some(data_dir) => data_dir,
            None => default_data_dir()?,
        };

        let cloud_url = cloud_url
            .map(|url| url.trim().trim_end_matches('/').to_owned())
            .filter(|url| !url.is_empty());

        Ok(Self {
            data_dir,
            cloud_url,
        })
    }

    /// The path of the local database, creating the data directory if needed.
    ///
    /// # Errors
    /// Returns [Error::Config] if the data directory could not be created.
    pub fn database_path(&self) -> Result<PathBuf, Error> {
        database_path(&self.data_dir)
    }

    /// Open the local key-value store in the data directory.
    ///
    /// # Errors
    /// Returns an error if the directory or database could not be created.
    pub fn open_local_items(&self) -> Result<LocalKeyValueStore, Error> {
        let path = self.database_path()?;
        tracing::debug!("opening the local database at {}", path.display());

        LocalKeyValueStore::open(&path)
    }
}

/// The path of the local database in `data_dir`, creating the directory if needed.
///
/// # Errors
/// Returns [Error::Config] if the directory could not be created.
pub fn database_path(data_dir: &Path) -> Result<PathBuf, Error> {
    std::fs::create_dir_all(data_dir).map_err(|error| {
        Error::Config(format!(
            "could not create the data directory {}: {error}",
            data_dir.display()
        ))
    })?;

    Ok(data_dir.join(DATABASE_FILE_NAME))
}

#[cfg(test)]
mod client_config_tests {
    use crate::config::{ClientConfig, DATABASE_FILE_NAME};

    #[test]
    fn blank_cloud_url_means_local_only() {
        let dir = tempfile::tempdir().unwrap();

        let config = ClientConfig::new(Some(dir.path().to_path_buf()), Some("  ".to_owned())).unwrap();

        assert_eq!(config.cloud_url, None);
    }

    #[test]
    fn trailing_slash_is_removed_from_cloud_url() {
        let dir = tempfile::tempdir().unwrap();

        let config = ClientConfig::new(
            Some(dir.path().to_path_buf()),
            Some("http://localhost:8787/".to_owned()),
        )
        .unwrap();

        assert_eq!(config.cloud_url.as_deref(), Some("http://localhost:8787"));
    }

    #[test]
    fn database_path_creates_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("data");
        let config = ClientConfig::new(Some(data_dir.clone()), None).unwrap();

        let path = config.database_path().unwrap();

        assert!(data_dir.is_dir());
        assert_eq!(path, data_dir.join(DATABASE_FILE_NAME));
    }

    #[test]
    fn opens_local_items_in_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::new(Some(dir.path().to_path_buf()), None).unwrap();

        let items = config.open_local_items().unwrap();
        items.set_item("greeting", "hello").unwrap();

        assert!(dir.path().join(DATABASE_FILE_NAME).is_file());
    }
}

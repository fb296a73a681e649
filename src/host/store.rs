//! File-backed host store: one JSON record per profile.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::debug;

use super::{Host, HostStore, HostStoreError, MACHINES_DIR, validate_name};

/// Record file name inside each profile directory.
pub const HOST_RECORD_FILE: &str = "config.json";

const TEMP_RECORD_FILE: &str = "config.json.tmp";

/// Stores records at `<home>/machines/<profile>/config.json`.
///
/// Writes go to a temporary file that is renamed over the record, so readers
/// never observe a partial document. There is no locking; one writer per
/// profile is assumed.
#[derive(Clone, Debug)]
pub struct FileHostStore {
    home: Utf8PathBuf,
}

impl FileHostStore {
    /// Creates a store rooted at `home`.
    #[must_use]
    pub fn new(home: impl Into<Utf8PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn home(&self) -> &Utf8Path {
        &self.home
    }

    /// Directory holding per-profile state for `name`.
    #[must_use]
    pub fn machine_dir(&self, name: &str) -> Utf8PathBuf {
        self.machines_root().join(name)
    }

    /// Path of the record for `name`.
    #[must_use]
    pub fn record_path(&self, name: &str) -> Utf8PathBuf {
        self.machine_dir(name).join(HOST_RECORD_FILE)
    }

    fn machines_root(&self) -> Utf8PathBuf {
        self.home.join(MACHINES_DIR)
    }

    fn open_machines(&self) -> Result<Option<Dir>, HostStoreError> {
        let root = self.machines_root();
        match Dir::open_ambient_dir(&root, ambient_authority()) {
            Ok(dir) => Ok(Some(dir)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&root, &err)),
        }
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> HostStoreError {
    HostStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

impl HostStore for FileHostStore {
    fn exists(&self, name: &str) -> Result<bool, HostStoreError> {
        validate_name(name)?;
        let Some(machines) = self.open_machines()? else {
            return Ok(false);
        };
        machines
            .try_exists(Utf8Path::new(name).join(HOST_RECORD_FILE))
            .map_err(|err| io_error(&self.record_path(name), &err))
    }

    fn load(&self, name: &str) -> Result<Host, HostStoreError> {
        validate_name(name)?;
        let path = self.record_path(name);
        let not_found = || HostStoreError::NotFound {
            name: name.to_owned(),
        };
        let machines = self.open_machines()?.ok_or_else(not_found)?;
        let contents = match machines.read_to_string(Utf8Path::new(name).join(HOST_RECORD_FILE)) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(err) => return Err(io_error(&path, &err)),
        };
        let host: Host =
            serde_json::from_str(&contents).map_err(|err| HostStoreError::Corrupt {
                name: name.to_owned(),
                path: path.clone(),
                message: err.to_string(),
            })?;
        if host.name != name {
            return Err(HostStoreError::Corrupt {
                name: name.to_owned(),
                path,
                message: format!("record names machine {:?}", host.name),
            });
        }
        Ok(host)
    }

    fn save(&self, host: &Host) -> Result<(), HostStoreError> {
        validate_name(&host.name)?;
        let dir_path = self.machine_dir(&host.name);
        Dir::create_ambient_dir_all(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;
        let dir = Dir::open_ambient_dir(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;
        let rendered =
            serde_json::to_string_pretty(host).map_err(|err| HostStoreError::Encode {
                name: host.name.clone(),
                message: err.to_string(),
            })?;
        dir.write(TEMP_RECORD_FILE, rendered.as_bytes())
            .map_err(|err| io_error(&dir_path.join(TEMP_RECORD_FILE), &err))?;
        dir.rename(TEMP_RECORD_FILE, &dir, HOST_RECORD_FILE)
            .map_err(|err| io_error(&dir_path.join(HOST_RECORD_FILE), &err))?;
        debug!(profile = %host.name, path = %dir_path.join(HOST_RECORD_FILE), "saved host record");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), HostStoreError> {
        validate_name(name)?;
        let Some(machines) = self.open_machines()? else {
            return Ok(());
        };
        match machines.remove_dir_all(name) {
            Ok(()) => {
                debug!(profile = name, "removed host record");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&self.machine_dir(name), &err)),
        }
    }

    fn list(&self) -> Result<Vec<String>, HostStoreError> {
        let root = self.machines_root();
        let Some(machines) = self.open_machines()? else {
            return Ok(Vec::new());
        };
        let entries = machines.entries().map_err(|err| io_error(&root, &err))?;
        let mut names = Vec::new();
        for item in entries {
            let entry = item.map_err(|err| io_error(&root, &err))?;
            let name = entry.file_name().map_err(|err| io_error(&root, &err))?;
            let has_record = machines
                .try_exists(Utf8Path::new(&name).join(HOST_RECORD_FILE))
                .map_err(|err| io_error(&root, &err))?;
            if has_record {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

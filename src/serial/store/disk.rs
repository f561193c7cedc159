//! Filesystem-based counter storage.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::mem;
use std::path::{Path, PathBuf};

use log::trace;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::constants::SERIAL_COUNTER_DIR;
use crate::serial::ShardPrefix;

use super::Error;


//------------ Constants -----------------------------------------------------

/// The directory under the root that contains temporary files.
const TMP_FILE_DIR: &str = ".tmp";

/// The directory under the root that contains the lock files.
const LOCK_FILE_DIR: &str = ".locks";


//------------ DiskCounters --------------------------------------------------

/// Counters stored as files under a base directory.
///
/// Each shard prefix has its own file `serial/$(prefix).json` holding the
/// prefix and the current value as a JSON object. Values are written to a
/// temporary file under `.tmp` first, synced to disk and then renamed over
/// the old file, so a crash leaves either the old or the new value but
/// never a torn one.
///
/// Every access takes an advisory lock on `.locks/serial/$(prefix).lock`
/// for the duration of that single read or write. A [`DiskHold`] keeps the
/// write lock for as long as it lives, which excludes every other holder
/// and every single access, in this or any other process. Accessing a held
/// counter through [`get`](Self::get) or [`set`](Self::set) blocks until
/// the hold is released.
#[derive(Clone, Debug)]
pub struct DiskCounters {
    /// The directory holding the counter files.
    root: PathBuf,

    /// The directory for temporary files.
    tmp: PathBuf,

    /// The directory for lock files.
    locks: PathBuf,
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredCounter {
    prefix: ShardPrefix,
    value: u64,
}

impl DiskCounters {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, Error> {
        let base = base.into();
        let root = base.join(SERIAL_COUNTER_DIR);
        let tmp = base.join(TMP_FILE_DIR);
        let mut locks = base.join(LOCK_FILE_DIR);
        locks.push(SERIAL_COUNTER_DIR);

        for dir in [&root, &tmp, &locks] {
            create_dir(dir)?;
        }

        Ok(DiskCounters { root, tmp, locks })
    }

    pub fn get(&self, prefix: ShardPrefix) -> Result<u64, Error> {
        let lock = FileLock::create(self.lock_path(prefix))?;
        let _read_lock = lock.read()?;
        self.read_value(prefix)
    }

    pub fn set(&self, prefix: ShardPrefix, value: u64) -> Result<(), Error> {
        let mut lock = FileLock::create(self.lock_path(prefix))?;
        let _write_lock = lock.write()?;
        self.write_value(prefix, value)
    }

    /// Takes the exclusive hold on the counter for `prefix`.
    ///
    /// Does not wait: returns `None` if the counter is held already.
    pub fn try_hold(&self, prefix: ShardPrefix) -> Result<Option<DiskHold>, Error> {
        let lock = FileLock::create(self.lock_path(prefix))?;
        Ok(lock.try_keep_write()?.map(|lock| DiskHold {
            counters: self.clone(),
            prefix,
            _lock: lock,
        }))
    }

    /// Reads the counter. The caller must hold the lock.
    fn read_value(&self, prefix: ShardPrefix) -> Result<u64, Error> {
        let path = self.counter_path(prefix);
        let file = match File::open(&path) {
            Ok(file) => io::BufReader::new(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                trace!("no serial counter for prefix {prefix} yet");
                return Ok(0);
            }
            Err(err) => {
                return Err(Error::io(
                    format!("failed to open file '{}'", path.display()),
                    err,
                ))
            }
        };

        let stored: StoredCounter = serde_json::from_reader(file).map_err(|err| {
            if err.is_io() {
                Error::io(
                    format!("failed to read stored file '{}'", path.display()),
                    err.into(),
                )
            } else {
                Error::deserialize(prefix, err)
            }
        })?;

        if stored.prefix != prefix {
            return Err(Error::other(format!(
                "file '{}' holds the counter for prefix '{}', expected '{}'",
                path.display(),
                stored.prefix,
                prefix
            )));
        }

        Ok(stored.value)
    }

    /// Replaces the counter. The caller must hold the write lock.
    fn write_value(&self, prefix: ShardPrefix, value: u64) -> Result<(), Error> {
        let path = self.counter_path(prefix);

        let mut tmp_file = NamedTempFile::new_in(&self.tmp).map_err(|err| {
            Error::io(
                format!("writing temp file failed for prefix '{prefix}'"),
                err,
            )
        })?;

        let mut writer = io::BufWriter::new(&mut tmp_file);
        serde_json::to_writer_pretty(&mut writer, &StoredCounter { prefix, value })
            .map_err(|err| Error::serialize(prefix, err))?;
        writer.flush().map_err(|err| {
            Error::io(
                format!("failed to write temp file for prefix '{prefix}'"),
                err,
            )
        })?;
        drop(writer);

        tmp_file.as_file().sync_all().map_err(|err| {
            Error::io(
                format!("failed to sync temp file for prefix '{prefix}'"),
                err,
            )
        })?;

        tmp_file.persist(&path).map_err(|err| {
            Error::io(
                format!(
                    "failed to rename temp file '{}' to '{}'",
                    err.file.path().display(),
                    path.display()
                ),
                err.error,
            )
        })?;

        trace!("stored serial counter {value} for prefix {prefix}");
        Ok(())
    }

    fn counter_path(&self, prefix: ShardPrefix) -> PathBuf {
        self.root.join(format!("{prefix}.json"))
    }

    fn lock_path(&self, prefix: ShardPrefix) -> PathBuf {
        self.locks.join(format!("{prefix}.lock"))
    }
}

fn create_dir(path: &Path) -> Result<(), Error> {
    fs::create_dir_all(path).map_err(|err| {
        Error::io(
            format!("failed to create directory '{}'", path.display()),
            err,
        )
    })
}


//------------ DiskHold ------------------------------------------------------

/// The exclusive hold on one counter file.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct DiskHold {
    counters: DiskCounters,
    prefix: ShardPrefix,
    _lock: FileLock,
}

impl DiskHold {
    pub fn get(&self) -> Result<u64, Error> {
        self.counters.read_value(self.prefix)
    }

    pub fn set(&self, value: u64) -> Result<(), Error> {
        self.counters.write_value(self.prefix, value)
    }
}


//------------ FileLock ------------------------------------------------------

#[derive(Debug)]
struct FileLock {
    lock: fd_lock::RwLock<File>,
}

impl FileLock {
    fn create(path: PathBuf) -> Result<Self, Error> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| {
                Error::io(
                    format!("failed to open lock file '{}'", path.display()),
                    err,
                )
            })?;

        Ok(FileLock { lock: fd_lock::RwLock::new(lock_file) })
    }

    fn read(&self) -> Result<fd_lock::RwLockReadGuard<'_, File>, Error> {
        self.lock
            .read()
            .map_err(|e| Error::other(format!("Cannot get file lock: {e}")))
    }

    fn write(&mut self) -> Result<fd_lock::RwLockWriteGuard<'_, File>, Error> {
        self.lock
            .write()
            .map_err(|e| Error::other(format!("Cannot get file lock: {e}")))
    }

    /// Takes the write lock without waiting and keeps it until `self` is
    /// dropped.
    ///
    /// Returns `None` if the lock is taken already.
    fn try_keep_write(mut self) -> Result<Option<Self>, Error> {
        match self.lock.try_write() {
            // The lock stays in place until the lock file is closed.
            Ok(guard) => mem::forget(guard),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                return Ok(None)
            }
            Err(err) => {
                return Err(Error::other(format!("Cannot get file lock: {err}")))
            }
        }
        Ok(Some(self))
    }
}


//------------ Tests ---------------------------------------------------------

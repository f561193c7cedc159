//! Durable storage of the serial counters.
//!
//! Every shard prefix has exactly one counter. A counter that was never
//! stored reads as zero, so the first serial handed out for a prefix is
//! always one.

mod disk;
mod memory;

pub use self::disk::{DiskCounters, DiskHold};
pub use self::memory::{MemoryCounters, MemoryHold};

use std::borrow::Cow;
use std::{error, fmt, io};

use url::Url;

use super::ShardPrefix;


//------------ CounterStore --------------------------------------------------

/// The place where the serial counters live.
#[derive(Clone, Debug)]
pub enum CounterStore {
    Memory(MemoryCounters),
    Disk(DiskCounters),
}

impl CounterStore {
    /// Creates a store for the given storage URI.
    ///
    /// The schemes `local` and `file` select the disk backend rooted at
    /// the path of the URI. The scheme `memory` selects a fresh in-memory
    /// backend that is not shared with any other store.
    pub fn create(storage_uri: &Url) -> Result<Self, Error> {
        match storage_uri.scheme() {
            "local" | "file" => {
                let path = format!(
                    "{}{}",
                    storage_uri.host_str().unwrap_or_default(),
                    storage_uri.path()
                );
                Ok(CounterStore::Disk(DiskCounters::new(path)?))
            }
            "memory" => Ok(CounterStore::Memory(MemoryCounters::default())),
            scheme => Err(Error::other(format!(
                "unknown storage scheme '{scheme}'"
            ))),
        }
    }

    /// Returns the current value of the counter for `prefix`.
    pub fn get(&self, prefix: ShardPrefix) -> Result<u64, Error> {
        match self {
            CounterStore::Memory(memory) => Ok(memory.get(prefix)),
            CounterStore::Disk(disk) => disk.get(prefix),
        }
    }

    /// Durably replaces the counter for `prefix` with `value`.
    pub fn set(&self, prefix: ShardPrefix, value: u64) -> Result<(), Error> {
        match self {
            CounterStore::Memory(memory) => {
                memory.set(prefix, value);
                Ok(())
            }
            CounterStore::Disk(disk) => disk.set(prefix, value),
        }
    }

    /// Takes the exclusive hold on the counter for `prefix`.
    ///
    /// Returns `None` without waiting if someone else holds the counter,
    /// be it another store on the same counters or another process.
    pub fn try_hold(&self, prefix: ShardPrefix) -> Result<Option<CounterHold>, Error> {
        match self {
            CounterStore::Memory(memory) => {
                Ok(memory.try_hold(prefix).map(CounterHold::Memory))
            }
            CounterStore::Disk(disk) => {
                Ok(disk.try_hold(prefix)?.map(CounterHold::Disk))
            }
        }
    }
}

impl From<MemoryCounters> for CounterStore {
    fn from(memory: MemoryCounters) -> Self {
        CounterStore::Memory(memory)
    }
}

impl From<DiskCounters> for CounterStore {
    fn from(disk: DiskCounters) -> Self {
        CounterStore::Disk(disk)
    }
}


//------------ CounterHold ---------------------------------------------------

/// The exclusive hold on a single counter.
///
/// While the hold lives, nobody else can take it. It is released when
/// dropped.
#[derive(Debug)]
pub enum CounterHold {
    Memory(MemoryHold),
    Disk(DiskHold),
}

impl CounterHold {
    pub fn get(&self) -> Result<u64, Error> {
        match self {
            CounterHold::Memory(memory) => Ok(memory.get()),
            CounterHold::Disk(disk) => disk.get(),
        }
    }

    pub fn set(&self, value: u64) -> Result<(), Error> {
        match self {
            CounterHold::Memory(memory) => {
                memory.set(value);
                Ok(())
            }
            CounterHold::Disk(disk) => disk.set(value),
        }
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Io {
        context: Cow<'static, str>,
        err: io::Error,
    },
    Deserialize {
        prefix: ShardPrefix,
        err: String,
    },
    Serialize {
        prefix: ShardPrefix,
        err: String,
    },
    Other(String),
}

impl Error {
    fn io(context: impl Into<Cow<'static, str>>, err: io::Error) -> Self {
        Error::Io { context: context.into(), err }
    }

    fn deserialize(prefix: ShardPrefix, err: impl fmt::Display) -> Self {
        Error::Deserialize { prefix, err: err.to_string() }
    }

    fn serialize(prefix: ShardPrefix, err: impl fmt::Display) -> Self {
        Error::Serialize { prefix, err: err.to_string() }
    }

    fn other(info: impl Into<String>) -> Self {
        Error::Other(info.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { context, err } => write!(f, "{context}: {err}"),
            Error::Deserialize { prefix, err } => write!(
                f,
                "failed to deserialize serial counter for prefix '{prefix}': {err}"
            ),
            Error::Serialize { prefix, err } => write!(
                f,
                "failed to serialize serial counter for prefix '{prefix}': {err}"
            ),
            Error::Other(s) => f.write_str(s),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io { err, .. } => Some(err),
            _ => None,
        }
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test;

    #[test]
    fn create_from_uri() {
        let store = CounterStore::create(&Url::parse("memory:").unwrap()).unwrap();
        assert!(matches!(store, CounterStore::Memory(_)));

        test::test_under_tmp(|dir| {
            let uri = Url::from_directory_path(&dir).unwrap();
            let store = CounterStore::create(&uri).unwrap();
            assert!(matches!(store, CounterStore::Disk(_)));
        });

        assert!(CounterStore::create(&Url::parse("postgres://db/ca").unwrap()).is_err());
    }

    #[test]
    fn memory_stores_are_not_shared_unless_cloned() {
        let uri = Url::parse("memory:").unwrap();
        let one = CounterStore::create(&uri).unwrap();
        let two = CounterStore::create(&uri).unwrap();
        let prefix = ShardPrefix::new(1);

        one.set(prefix, 5).unwrap();
        assert_eq!(one.get(prefix).unwrap(), 5);
        assert_eq!(two.get(prefix).unwrap(), 0);
        assert_eq!(one.clone().get(prefix).unwrap(), 5);
    }
}

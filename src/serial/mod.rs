//! Transactional allocation of certificate serial numbers.
//!
//! The [`SerialAllocator`] hands out counter values for a single shard
//! prefix. Values can only be obtained inside a transaction, and at most
//! one transaction can be active on a stored counter at any time. Every increment is written
//! to the [`CounterStore`] straight away. A rollback writes the value from
//! before the transaction back. A crash in the middle of a transaction
//! therefore burns serials, but never hands the same one out twice.

pub mod store;

pub use self::store::{CounterHold, CounterStore};

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::{error, fmt};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::constants::SERIAL_COUNTER_MAX;


//------------ ShardPrefix ---------------------------------------------------

/// Identifies one CA instance.
///
/// The prefix forms the first byte of every serial the instance issues so
/// that independently running instances never collide.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct ShardPrefix(u8);

impl ShardPrefix {
    pub const fn new(prefix: u8) -> Self {
        ShardPrefix(prefix)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for ShardPrefix {
    fn from(prefix: u8) -> Self {
        ShardPrefix(prefix)
    }
}

impl fmt::Display for ShardPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}


//------------ SerialNumber --------------------------------------------------

/// The serial number of an issued certificate.
///
/// Displayed as sixteen uppercase hex digits: two for the shard prefix
/// followed by fourteen for the counter value.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SerialNumber {
    prefix: ShardPrefix,
    counter: u64,
}

impl SerialNumber {
    pub fn new(prefix: ShardPrefix, counter: u64) -> Result<Self, Error> {
        if counter > SERIAL_COUNTER_MAX {
            Err(Error::CounterExhausted(prefix))
        } else {
            Ok(SerialNumber { prefix, counter })
        }
    }

    pub fn prefix(&self) -> ShardPrefix {
        self.prefix
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{:014X}", self.prefix, self.counter)
    }
}

impl FromStr for SerialNumber {
    type Err = ParseSerialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseSerialError(s.to_string()));
        }

        let prefix = u8::from_str_radix(&s[..2], 16)
            .map_err(|_| ParseSerialError(s.to_string()))?;
        let counter = u64::from_str_radix(&s[2..], 16)
            .map_err(|_| ParseSerialError(s.to_string()))?;

        Ok(SerialNumber { prefix: ShardPrefix(prefix), counter })
    }
}

impl Serialize for SerialNumber {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SerialNumber {
    fn deserialize<D>(deserializer: D) -> Result<SerialNumber, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        SerialNumber::from_str(&string).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug)]
pub struct ParseSerialError(String);

impl fmt::Display for ParseSerialError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected 16 hex digits for serial number, got '{}'", self.0)
    }
}

impl error::Error for ParseSerialError {}


//------------ SerialAllocator -----------------------------------------------

/// Allocates serial counter values for one shard prefix.
///
/// The allocator owns its counter store. It does not queue callers: a
/// [`begin`](Self::begin) while a transaction is active fails with
/// [`Error::AlreadyActive`]. This includes transactions of other
/// allocators on the same counters, be it in this process or another one,
/// since a transaction keeps the exclusive hold on the stored counter
/// from [`begin`](Self::begin) until it ends.
#[derive(Debug)]
pub struct SerialAllocator {
    prefix: ShardPrefix,
    store: CounterStore,
    transaction: Mutex<Option<Transaction>>,
}

#[derive(Debug)]
struct Transaction {
    /// The hold on the stored counter, released when the transaction ends.
    hold: CounterHold,

    /// The counter value when the transaction began.
    start: u64,

    /// The last value handed out, or `start` if there was none.
    current: u64,
}

impl SerialAllocator {
    pub fn new(prefix: ShardPrefix, store: CounterStore) -> Self {
        SerialAllocator {
            prefix,
            store,
            transaction: Mutex::new(None),
        }
    }

    pub fn prefix(&self) -> ShardPrefix {
        self.prefix
    }

    /// Returns whether this allocator has an active transaction.
    pub fn is_active(&self) -> bool {
        self.transaction().is_some()
    }

    /// Starts a transaction.
    ///
    /// Takes the hold on the stored counter and reads its value under it.
    pub fn begin(&self) -> Result<(), Error> {
        let mut transaction = self.transaction();
        if transaction.is_some() {
            return Err(Error::AlreadyActive);
        }

        let Some(hold) = self.store.try_hold(self.prefix)? else {
            debug!("serial counter for prefix {} is held elsewhere", self.prefix);
            return Err(Error::AlreadyActive);
        };
        let start = hold.get()?;
        *transaction = Some(Transaction { hold, start, current: start });
        trace!("began serial transaction for prefix {} at {}", self.prefix, start);
        Ok(())
    }

    /// Returns the next counter value and persists it.
    ///
    /// Each call within the same transaction returns a value exactly one
    /// greater than the previous call.
    pub fn increment_and_get_serial(&self) -> Result<u64, Error> {
        let mut transaction = self.transaction();
        let Some(transaction) = transaction.as_mut() else {
            return Err(Error::NoActiveTransaction);
        };

        let next = transaction.current + 1;
        if next > SERIAL_COUNTER_MAX {
            return Err(Error::CounterExhausted(self.prefix));
        }

        transaction.hold.set(next)?;
        transaction.current = next;
        Ok(next)
    }

    /// Finishes the active transaction, keeping all increments.
    ///
    /// The increments were persisted when they were handed out, so there
    /// is nothing left to write. Ending the transaction releases the hold.
    pub fn commit(&self) -> Result<(), Error> {
        let Some(transaction) = self.transaction().take() else {
            return Err(Error::NoActiveTransaction);
        };

        debug!(
            "committed serial transaction for prefix {}: {} -> {}",
            self.prefix, transaction.start, transaction.current
        );
        Ok(())
    }

    /// Abandons the active transaction and restores the counter.
    ///
    /// A rollback without an active transaction returns
    /// [`Error::NoActiveTransaction`] and changes nothing. If restoring the
    /// counter fails, the transaction still ends and the error is returned.
    /// The serials handed out in the transaction are then lost, but never
    /// reused.
    pub fn rollback(&self) -> Result<(), Error> {
        let Some(transaction) = self.transaction().take() else {
            return Err(Error::NoActiveTransaction);
        };

        if transaction.current != transaction.start {
            transaction.hold.set(transaction.start)?;
        }
        debug!(
            "rolled back serial transaction for prefix {}: {} -> {}",
            self.prefix, transaction.current, transaction.start
        );
        Ok(())
    }

    fn transaction(&self) -> MutexGuard<'_, Option<Transaction>> {
        self.transaction.lock().expect("poisoned lock")
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    AlreadyActive,
    NoActiveTransaction,
    CounterExhausted(ShardPrefix),
    Store(store::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::AlreadyActive => {
                write!(f, "a serial transaction is already active")
            }
            Error::NoActiveTransaction => {
                write!(f, "no serial transaction is active")
            }
            Error::CounterExhausted(prefix) => {
                write!(f, "serial counter for prefix '{prefix}' is exhausted")
            }
            Error::Store(err) => write!(f, "serial counter storage: {err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        Error::Store(err)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::serial::store::{DiskCounters, MemoryCounters};
    use crate::test;

    fn allocator(counters: &MemoryCounters) -> SerialAllocator {
        SerialAllocator::new(ShardPrefix::new(1), counters.clone().into())
    }

    #[test]
    fn begin_commit() {
        let allocator = allocator(&MemoryCounters::default());

        allocator.begin().unwrap();
        assert!(allocator.is_active());
        assert!(matches!(allocator.begin(), Err(Error::AlreadyActive)));

        allocator.commit().unwrap();
        assert!(!allocator.is_active());
        assert!(matches!(allocator.commit(), Err(Error::NoActiveTransaction)));
    }

    #[test]
    fn no_serial_outside_transaction() {
        let counters = MemoryCounters::default();
        let allocator = allocator(&counters);

        assert!(matches!(
            allocator.increment_and_get_serial(),
            Err(Error::NoActiveTransaction)
        ));
        assert_eq!(counters.get(ShardPrefix::new(1)), 0);
    }

    #[test]
    fn serials_increment_by_one() {
        let counters = MemoryCounters::default();
        let allocator = allocator(&counters);

        allocator.begin().unwrap();
        let first = allocator.increment_and_get_serial().unwrap();
        let second = allocator.increment_and_get_serial().unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, first + 1);
        allocator.commit().unwrap();

        allocator.begin().unwrap();
        assert_eq!(allocator.increment_and_get_serial().unwrap(), 3);
        allocator.commit().unwrap();

        assert_eq!(counters.get(ShardPrefix::new(1)), 3);
    }

    #[test]
    fn rollback_restores_counter() {
        let counters = MemoryCounters::default();
        let allocator = allocator(&counters);

        allocator.begin().unwrap();
        allocator.increment_and_get_serial().unwrap();
        allocator.commit().unwrap();

        allocator.begin().unwrap();
        allocator.increment_and_get_serial().unwrap();
        allocator.increment_and_get_serial().unwrap();
        assert_eq!(counters.get(ShardPrefix::new(1)), 3);
        allocator.rollback().unwrap();
        assert_eq!(counters.get(ShardPrefix::new(1)), 1);

        allocator.begin().unwrap();
        assert_eq!(allocator.increment_and_get_serial().unwrap(), 2);
        allocator.commit().unwrap();
    }

    #[test]
    fn redundant_rollback_is_an_error() {
        let counters = MemoryCounters::default();
        let allocator = allocator(&counters);

        assert!(matches!(allocator.rollback(), Err(Error::NoActiveTransaction)));

        allocator.begin().unwrap();
        allocator.increment_and_get_serial().unwrap();
        allocator.rollback().unwrap();
        assert!(matches!(allocator.rollback(), Err(Error::NoActiveTransaction)));
        assert_eq!(counters.get(ShardPrefix::new(1)), 0);
    }

    #[test]
    fn counter_exhausted() {
        let counters = MemoryCounters::default();
        counters.set(ShardPrefix::new(1), SERIAL_COUNTER_MAX);
        let allocator = allocator(&counters);

        allocator.begin().unwrap();
        assert!(matches!(
            allocator.increment_and_get_serial(),
            Err(Error::CounterExhausted(_))
        ));
        allocator.rollback().unwrap();
        assert_eq!(counters.get(ShardPrefix::new(1)), SERIAL_COUNTER_MAX);
    }

    #[test]
    fn committed_serials_survive_restart() {
        test::test_under_tmp(|dir| {
            let prefix = ShardPrefix::new(9);
            {
                let store = DiskCounters::new(&dir).unwrap().into();
                let allocator = SerialAllocator::new(prefix, store);
                allocator.begin().unwrap();
                assert_eq!(allocator.increment_and_get_serial().unwrap(), 1);
                allocator.commit().unwrap();

                allocator.begin().unwrap();
                assert_eq!(allocator.increment_and_get_serial().unwrap(), 2);
                allocator.rollback().unwrap();
            }

            let store = DiskCounters::new(&dir).unwrap().into();
            let allocator = SerialAllocator::new(prefix, store);
            allocator.begin().unwrap();
            assert_eq!(allocator.increment_and_get_serial().unwrap(), 2);
            allocator.commit().unwrap();
        });
    }

    fn shared_counter_is_held_by_one_transaction(
        first: SerialAllocator,
        second: SerialAllocator,
    ) {
        first.begin().unwrap();
        assert!(matches!(second.begin(), Err(Error::AlreadyActive)));
        assert!(!second.is_active());
        assert!(matches!(second.rollback(), Err(Error::NoActiveTransaction)));

        assert_eq!(first.increment_and_get_serial().unwrap(), 1);
        first.commit().unwrap();

        second.begin().unwrap();
        assert!(matches!(first.begin(), Err(Error::AlreadyActive)));
        assert_eq!(second.increment_and_get_serial().unwrap(), 2);
        second.rollback().unwrap();

        first.begin().unwrap();
        assert_eq!(first.increment_and_get_serial().unwrap(), 2);
        first.commit().unwrap();
    }

    #[test]
    fn shared_memory_counter_is_held_by_one_transaction() {
        let counters = MemoryCounters::default();
        shared_counter_is_held_by_one_transaction(
            allocator(&counters),
            allocator(&counters),
        );
        assert_eq!(counters.get(ShardPrefix::new(1)), 2);
    }

    #[test]
    fn shared_disk_counter_is_held_by_one_transaction() {
        test::test_under_tmp(|dir| {
            let allocator = || {
                SerialAllocator::new(
                    ShardPrefix::new(1),
                    DiskCounters::new(&dir).unwrap().into(),
                )
            };
            shared_counter_is_held_by_one_transaction(allocator(), allocator());
            assert_eq!(
                DiskCounters::new(&dir).unwrap().get(ShardPrefix::new(1)).unwrap(),
                2
            );
        });
    }

    #[test]
    fn hold_is_released_when_allocator_is_dropped() {
        test::test_under_tmp(|dir| {
            let prefix = ShardPrefix::new(1);
            let first = SerialAllocator::new(prefix, DiskCounters::new(&dir).unwrap().into());
            first.begin().unwrap();
            first.increment_and_get_serial().unwrap();
            drop(first);

            let second = SerialAllocator::new(prefix, DiskCounters::new(&dir).unwrap().into());
            second.begin().unwrap();
            assert_eq!(second.increment_and_get_serial().unwrap(), 2);
            second.commit().unwrap();
        });
    }

    #[test]
    fn prefixes_have_separate_counters() {
        let counters = MemoryCounters::default();
        let one = SerialAllocator::new(ShardPrefix::new(1), counters.clone().into());
        let two = SerialAllocator::new(ShardPrefix::new(2), counters.clone().into());

        one.begin().unwrap();
        two.begin().unwrap();
        assert_eq!(one.increment_and_get_serial().unwrap(), 1);
        assert_eq!(one.increment_and_get_serial().unwrap(), 2);
        assert_eq!(two.increment_and_get_serial().unwrap(), 1);
        one.commit().unwrap();
        two.commit().unwrap();
    }

    #[test]
    fn serial_format() {
        let serial = SerialNumber::new(ShardPrefix::new(1), 1).unwrap();
        assert_eq!(serial.to_string(), "0100000000000001");

        let serial = SerialNumber::new(ShardPrefix::new(0xff), 0xabc).unwrap();
        assert_eq!(serial.to_string(), "FF00000000000ABC");

        let serial = SerialNumber::new(ShardPrefix::new(0), SERIAL_COUNTER_MAX).unwrap();
        assert_eq!(serial.to_string(), "00FFFFFFFFFFFFFF");

        assert!(SerialNumber::new(ShardPrefix::new(0), SERIAL_COUNTER_MAX + 1).is_err());
    }

    #[test]
    fn serial_from_str() {
        let serial = SerialNumber::from_str("FF00000000000abc").unwrap();
        assert_eq!(serial.prefix(), ShardPrefix::new(0xff));
        assert_eq!(serial.counter(), 0xabc);

        assert!(SerialNumber::from_str("0100000000000001").is_ok());
        assert!(SerialNumber::from_str("01000000000001").is_err());
        assert!(SerialNumber::from_str("010000000000000001").is_err());
        assert!(SerialNumber::from_str("+100000000000001").is_err());
        assert!(SerialNumber::from_str("01000000000000G1").is_err());
    }
}

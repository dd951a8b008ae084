//! Strongly-typed, monotonic, sortable identifiers.
//!
//! Every id is 96 bits: a 48-bit millisecond timestamp, a 16-bit process-local
//! counter, and 32 bits of random tie-breaking, encoded as 20 lowercase
//! base32 characters. The timestamp-first layout keeps ids totally ordered
//! and usable directly as SQLite primary key bytes.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

static COUNTER: AtomicU16 = AtomicU16::new(0);

const ENCODED_LEN: usize = 20;
const ALPHABET: base32::Alphabet = base32::Alphabet::Rfc4648Lower { padding: false };

/// Raw 96-bit id value shared by every typed id in this crate.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id([u8; 12]);

impl Id {
    /// Generates a new id. Monotonic within a process: two ids generated in
    /// the same millisecond are still totally ordered by the counter.
    pub fn generate() -> Id {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64;
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let rand: u32 = rand_u32();

        let mut bytes = [0u8; 12];
        bytes[0..6].copy_from_slice(&millis.to_be_bytes()[2..8]); // low 48 bits
        bytes[6..8].copy_from_slice(&counter.to_be_bytes());
        bytes[8..12].copy_from_slice(&rand.to_be_bytes());
        Id(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Id {
        Id(bytes)
    }

    fn encode(&self) -> String {
        base32::encode(ALPHABET, &self.0)
    }

    fn decode(s: &str) -> Option<Id> {
        let bytes = base32::decode(ALPHABET, s)?;
        let bytes: [u8; 12] = bytes.try_into().ok()?;
        Some(Id(bytes))
    }
}

fn rand_u32() -> u32 {
    // A process-local xorshift seeded from the address of a stack value is
    // enough entropy for tie-breaking within a millisecond; ids are not a
    // security boundary (see crate docs).
    use std::cell::Cell;
    thread_local! {
        static STATE: Cell<u64> = Cell::new(seed());
    }
    fn seed() -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let addr = &now as *const u64 as u64;
        now ^ addr.wrapping_mul(0x9E3779B97F4A7C15) ^ 0xDEAD_BEEF_CAFE_F00D
    }
    STATE.with(|cell| {
        let mut x = cell.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        cell.set(x);
        (x >> 32) as u32
    })
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.encode())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Id {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Id::decode(s).ok_or_else(|| crate::error::Error::SchemaViolation {
            detail: format!("invalid id: {s:?}"),
        })
    }
}

/// Declares a newtype wrapper around [`Id`] with the usual string/SQL
/// conversions, so each identifier kind (`ObjectId`, `TableId`, ...) stays
/// distinct at the type level while sharing one codec.
macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub Id);

        impl $name {
            pub fn generate() -> Self {
                $name(Id::generate())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = crate::error::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($name(Id::from_str(s)?))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $name::from_str(&s).map_err(serde::de::Error::custom)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.as_bytes().to_vec()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let bytes = value.as_blob()?;
                let bytes: [u8; 12] = bytes
                    .try_into()
                    .map_err(|_| FromSqlError::InvalidType)?;
                Ok($name(Id::from_bytes(bytes)))
            }
        }
    };
}

typed_id!(ObjectId);
typed_id!(AttributeClassId);
typed_id!(TableId);
typed_id!(ViewId);
typed_id!(AttributeId);

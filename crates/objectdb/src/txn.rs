//! Transaction façade. Read and write handles wrap plain
//! [`rusqlite::Connection`]s; write transactions are demarcated with raw
//! `BEGIN IMMEDIATE`/`COMMIT`/`ROLLBACK` statements, the same way this
//! codebase's own SQLite-backed catalog drives transactions, rather than
//! rusqlite's borrowing `Transaction` type — that keeps the write handle an
//! ordinary owned value instead of a self-referential borrow of the
//! connection it's demarcating.

use std::ops::Deref;
use std::sync::MutexGuard;

use rusqlite::Connection;

use crate::error::Result;

/// A read-only handle. Backed by its own SQLite connection so that reads
/// proceed concurrently with an open writer under WAL.
pub struct ReadTx {
    pub(crate) conn: Connection,
}

impl Deref for ReadTx {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl ReadTx {
    /// Consumes the handle. Reads have nothing to flush; this exists so
    /// callers can write `tx.commit()` uniformly across read and write
    /// handles.
    pub fn commit(self) -> Result<()> {
        Ok(())
    }
}

/// An exclusive read-write handle. Only one is live at a time per
/// [`crate::Database`]; acquiring one blocks until any other writer
/// commits or rolls back.
pub struct WriteTx<'d> {
    guard: MutexGuard<'d, Connection>,
    finished: bool,
}

impl<'d> WriteTx<'d> {
    pub(crate) fn begin(guard: MutexGuard<'d, Connection>) -> Result<WriteTx<'d>> {
        guard.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(WriteTx {
            guard,
            finished: false,
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(mut self) -> Result<()> {
        self.guard.execute_batch("COMMIT;")?;
        self.finished = true;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(mut self) -> Result<()> {
        self.guard.execute_batch("ROLLBACK;")?;
        self.finished = true;
        Ok(())
    }
}

impl<'d> Deref for WriteTx<'d> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        &self.guard
    }
}

impl<'d> Drop for WriteTx<'d> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("write transaction dropped without commit or rollback; rolling back");
            if let Err(err) = self.guard.execute_batch("ROLLBACK;") {
                tracing::warn!(%err, "rollback-on-drop failed");
            }
        }
    }
}

/// Either kind of handle, for code paths (like attribute-class filter/sort
/// builders) that only ever read. Holds only shared references, so it is
/// cheap to copy around recursive compilers (the query-tree walker) instead
/// of threading borrows through every call.
#[derive(Clone, Copy)]
pub enum Tx<'a, 'd> {
    Read(&'a ReadTx),
    Write(&'a WriteTx<'d>),
}

impl<'a, 'd> Deref for Tx<'a, 'd> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        match self {
            Tx::Read(tx) => tx,
            Tx::Write(tx) => tx,
        }
    }
}

impl<'a, 'd> From<&'a ReadTx> for Tx<'a, 'd> {
    fn from(tx: &'a ReadTx) -> Self {
        Tx::Read(tx)
    }
}

impl<'a, 'd> From<&'a WriteTx<'d>> for Tx<'a, 'd> {
    fn from(tx: &'a WriteTx<'d>) -> Self {
        Tx::Write(tx)
    }
}

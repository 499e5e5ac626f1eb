//! SQLite store for policy state carried between processes.

use crate::Result;
use chrono::{SecondsFormat, Utc};
use permitter::PolicyState;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Policy state keyed by scope (the policy kind).
///
/// Reads and writes happen inside [`StateTxn`], which holds the database's
/// write lock from [`StateStore::begin`] until commit, so two processes
/// deciding for the same policy run one after the other.
pub struct StateStore {
    conn: Connection,
}

/// An open write transaction on a [`StateStore`]. Dropping it without
/// [`commit`](StateTxn::commit) discards every save.
pub struct StateTxn<'a> {
    tx: Transaction<'a>,
}

impl StateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS policy_state (
                scope TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Take the write lock and start a transaction.
    pub fn begin(&mut self) -> Result<StateTxn<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(StateTxn { tx })
    }
}

impl StateTxn<'_> {
    /// The state saved for `scope`, or an empty state if none was.
    pub fn load(&self, scope: &str) -> Result<PolicyState> {
        let data: Option<String> = self
            .tx
            .query_row(
                "SELECT data FROM policy_state WHERE scope = ?1",
                [scope],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Ok(PolicyState::default()),
        }
    }

    pub fn save(&self, scope: &str, state: &PolicyState) -> Result<()> {
        self.tx.execute(
            "INSERT INTO policy_state (scope, data, updated) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope) DO UPDATE SET data = excluded.data, updated = excluded.updated",
            params![
                scope,
                serde_json::to_string(state)?,
                Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;
        Ok(())
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

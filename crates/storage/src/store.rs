//! SQLite decision log implementation.

use crate::{Error, Event, EventKind, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use permitter::{Account, IdentityId};
use rusqlite::{Connection, Row, params};
use std::path::Path;
use uuid::Uuid;

/// SQLite-backed, append-only decision log.
pub struct DecisionLog {
    conn: Connection,
}

struct RawEvent {
    id: String,
    identity: String,
    account: Option<String>,
    timestamp: String,
    data: String,
}

impl DecisionLog {
    /// Open or create a decision log at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let log = Self { conn };
        log.init_schema()?;
        Ok(log)
    }

    /// Create an in-memory decision log (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let log = Self { conn };
        log.init_schema()?;
        Ok(log)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                identity TEXT NOT NULL,
                account TEXT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_decisions_identity
                ON decisions(identity, timestamp);
            "#,
        )?;
        Ok(())
    }

    /// Append an event to the log.
    pub fn append(&self, event: &Event) -> Result<()> {
        self.conn.execute(
            "INSERT INTO decisions (id, identity, account, timestamp, kind, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id.to_string(),
                event.identity.to_hex(),
                event.account.map(|a| a.to_hex()),
                event
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Nanos, true),
                event.kind.name(),
                serde_json::to_string(&event.kind)?,
            ],
        )?;
        Ok(())
    }

    /// Load the events for an identity in the order they happened,
    /// optionally only those of one kind (see [`EventKind::NAMES`]).
    pub fn load_identity(&self, identity: IdentityId, kind: Option<&str>) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, identity, account, timestamp, data FROM decisions
             WHERE identity = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY timestamp, seq",
        )?;
        let rows = stmt.query_map(params![identity.to_hex(), kind], raw_event)?;
        rows.map(|row| row?.decode()).collect()
    }

    /// The most recent `limit` events across all identities, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Event>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT id, identity, account, timestamp, data FROM decisions
             ORDER BY timestamp DESC, seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], raw_event)?;
        rows.map(|row| row?.decode()).collect()
    }

    /// Number of events recorded.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn raw_event(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        id: row.get(0)?,
        identity: row.get(1)?,
        account: row.get(2)?,
        timestamp: row.get(3)?,
        data: row.get(4)?,
    })
}

impl RawEvent {
    fn decode(self) -> Result<Event> {
        let corrupt = |reason: String| Error::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let id: Uuid = self.id.parse().map_err(|e| corrupt(format!("id: {e}")))?;
        let identity =
            IdentityId::from_hex(&self.identity).map_err(|e| corrupt(format!("identity: {e}")))?;
        let account = self
            .account
            .as_deref()
            .map(Account::from_hex)
            .transpose()
            .map_err(|e| corrupt(format!("account: {e}")))?;
        let timestamp: DateTime<Utc> = self
            .timestamp
            .parse()
            .map_err(|e| corrupt(format!("timestamp: {e}")))?;
        let kind: EventKind = serde_json::from_str(&self.data)?;
        Ok(Event {
            id,
            identity,
            account,
            timestamp,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ALICE: IdentityId = IdentityId([0xa1; 32]);
    const BOB: IdentityId = IdentityId([0xb0; 32]);
    const HOLDER: Account = Account([0x42; 20]);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_790_000_000 + secs, 0).unwrap()
    }

    fn seeded() -> DecisionLog {
        let log = DecisionLog::in_memory().unwrap();
        log.append(&Event::at(ALICE, None, at(0), EventKind::Bound))
            .unwrap();
        log.append(&Event::at(
            ALICE,
            Some(HOLDER),
            at(1),
            EventKind::Acquired {
                requested_secs: 60,
                expiry: at(61),
            },
        ))
        .unwrap();
        log.append(&Event::at(
            BOB,
            Some(HOLDER),
            at(2),
            EventKind::AcquireDenied {
                reason: "unknown token".into(),
            },
        ))
        .unwrap();
        log.append(&Event::at(ALICE, Some(HOLDER), at(3), EventKind::Released))
            .unwrap();
        log
    }

    #[test]
    fn loads_identity_history_in_order() {
        let log = seeded();
        let events = log.load_identity(ALICE, None).unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind.name()).collect();
        assert_eq!(kinds, ["bound", "acquired", "released"]);
        assert_eq!(events[0].account, None);
        assert_eq!(events[1].account, Some(HOLDER));
        assert_eq!(
            events[1].kind,
            EventKind::Acquired {
                requested_secs: 60,
                expiry: at(61)
            }
        );
    }

    #[test]
    fn filters_by_kind() {
        let log = seeded();
        let events = log.load_identity(ALICE, Some("released")).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, at(3));
        assert!(log.load_identity(BOB, Some("released")).unwrap().is_empty());
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let log = seeded();
        let events = log.recent(2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Released);
        assert_eq!(events[1].identity, BOB);
        assert_eq!(log.len().unwrap(), 4);
    }

    #[test]
    fn same_instant_keeps_append_order() {
        let log = DecisionLog::in_memory().unwrap();
        log.append(&Event::at(ALICE, None, at(0), EventKind::Bound))
            .unwrap();
        log.append(&Event::at(ALICE, Some(HOLDER), at(0), EventKind::Released))
            .unwrap();
        let kinds: Vec<_> = log
            .load_identity(ALICE, None)
            .unwrap()
            .iter()
            .map(|e| e.kind.name())
            .collect();
        assert_eq!(kinds, ["bound", "released"]);
    }

    #[test]
    fn reopens_from_disk() {
        let path = std::env::temp_dir().join(format!("decisions-{}.db", Uuid::new_v4()));
        {
            let log = DecisionLog::open(&path).unwrap();
            assert!(log.is_empty().unwrap());
            log.append(&Event::new(ALICE, None, EventKind::Bound)).unwrap();
        }
        let log = DecisionLog::open(&path).unwrap();
        assert_eq!(log.load_identity(ALICE, None).unwrap().len(), 1);
        drop(log);
        let _ = std::fs::remove_file(&path);
    }
}

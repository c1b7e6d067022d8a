use std::sync::Mutex;

use rusqlite::{named_params, params, Connection, OptionalExtension, Result};

use crate::models::block::{BlockRecord, BlockingStats};

/// SQLite-backed table of block records, keyed by ip.
///
/// All access is serialized through the connection mutex; methods that
/// check state before writing do both under a single lock acquisition, so
/// concurrent callers for the same ip observe a consistent order.
///
/// A row counts as actively blocked only while `is_active = 1` and its
/// `expires_at` (when set) is still in the future — expiry is a property
/// of the row, evaluated lazily by every read and settled by
/// [`BlockStore::sweep_expired`].
pub struct BlockStore {
    conn: Mutex<Connection>,
}

/// Predicate fragment for "this row is an active, unexpired block".
/// `:now` binds the current timestamp.
const ACTIVE: &str = "is_active = 1 AND (expires_at IS NULL OR expires_at > :now)";

impl BlockStore {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS blocked_ips (
                ip           TEXT PRIMARY KEY,
                blocked_at   TEXT NOT NULL,
                reason       TEXT NOT NULL,
                threat_level REAL NOT NULL DEFAULT 0,
                attack_type  TEXT NOT NULL DEFAULT 'Unknown',
                auto_blocked INTEGER NOT NULL DEFAULT 1,
                unblocked_at TEXT,
                is_active    INTEGER NOT NULL DEFAULT 1,
                expires_at   TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_blocked_ips_active
                ON blocked_ips(is_active);
            CREATE INDEX IF NOT EXISTS idx_blocked_ips_expires
                ON blocked_ips(expires_at);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    /// Insert `record` as the active block for its ip, unless one already
    /// exists. The active-check and the insert share one lock acquisition:
    /// of any set of concurrent callers for the same ip, exactly one
    /// observes "not active" and wins.
    ///
    /// Returns `false` without writing when the ip is already actively
    /// blocked. An inactive or expired prior row is overwritten.
    pub fn insert_active_block(&self, record: &BlockRecord, now: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");

        let already_active: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM blocked_ips WHERE ip = :ip AND {ACTIVE}"),
                named_params! { ":ip": record.ip, ":now": now },
                |row| row.get(0),
            )
            .optional()?;
        if already_active.is_some() {
            return Ok(false);
        }

        conn.execute(
            "INSERT OR REPLACE INTO blocked_ips
             (ip, blocked_at, reason, threat_level, attack_type, auto_blocked,
              unblocked_at, is_active, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 1, ?7)",
            params![
                record.ip,
                record.blocked_at,
                record.reason,
                record.threat_level,
                record.attack_type,
                record.auto_blocked as i32,
                record.expires_at,
            ],
        )?;
        Ok(true)
    }

    /// Deactivate the active block for `ip`, stamping `unblocked_at = now`.
    /// Returns `false` when no active, unexpired block exists.
    pub fn deactivate(&self, ip: &str, now: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let changed = conn.execute(
            &format!(
                "UPDATE blocked_ips SET is_active = 0, unblocked_at = :now
                 WHERE ip = :ip AND {ACTIVE}"
            ),
            named_params! { ":ip": ip, ":now": now },
        )?;
        Ok(changed > 0)
    }

    pub fn is_active(&self, ip: &str, now: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let row: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM blocked_ips WHERE ip = :ip AND {ACTIVE}"),
                named_params! { ":ip": ip, ":now": now },
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    /// Whether the ip was blocked before and has since been released.
    pub fn has_inactive_record(&self, ip: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let row: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM blocked_ips WHERE ip = ?1 AND is_active = 0",
                params![ip],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    /// All block records, newest first. With `active_only`, restricted to
    /// active unexpired blocks.
    pub fn get_blocked(&self, active_only: bool, now: &str) -> Result<Vec<BlockRecord>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");

        const COLUMNS: &str = "ip, blocked_at, reason, threat_level, attack_type, auto_blocked,
                               unblocked_at, is_active, expires_at";
        let map_row = |row: &rusqlite::Row<'_>| -> Result<BlockRecord> {
            Ok(BlockRecord {
                ip: row.get(0)?,
                blocked_at: row.get(1)?,
                reason: row.get(2)?,
                threat_level: row.get(3)?,
                attack_type: row.get(4)?,
                auto_blocked: row.get::<_, i32>(5)? != 0,
                unblocked_at: row.get(6)?,
                is_active: row.get::<_, i32>(7)? != 0,
                expires_at: row.get(8)?,
            })
        };

        if active_only {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM blocked_ips WHERE {ACTIVE} ORDER BY blocked_at DESC"
            ))?;
            let rows = stmt.query_map(named_params! { ":now": now }, map_row)?;
            rows.collect()
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM blocked_ips ORDER BY blocked_at DESC"
            ))?;
            let rows = stmt.query_map([], map_row)?;
            rows.collect()
        }
    }

    /// Deactivate every block whose expiry has passed, stamping
    /// `unblocked_at` with the row's own expiry time. Returns the affected
    /// ips so the caller can drop firewall rules.
    pub fn sweep_expired(&self, now: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");

        let mut stmt = conn.prepare(
            "SELECT ip FROM blocked_ips
             WHERE is_active = 1 AND expires_at IS NOT NULL AND expires_at <= ?1",
        )?;
        let ips: Vec<String> = stmt
            .query_map(params![now], |row| row.get(0))?
            .collect::<Result<_>>()?;
        drop(stmt);

        if !ips.is_empty() {
            conn.execute(
                "UPDATE blocked_ips SET is_active = 0, unblocked_at = expires_at
                 WHERE is_active = 1 AND expires_at IS NOT NULL AND expires_at <= ?1",
                params![now],
            )?;
        }
        Ok(ips)
    }

    /// Aggregate statistics over the whole table. `day_ago` bounds the
    /// recent-activity count.
    pub fn stats(&self, now: &str, day_ago: &str) -> Result<BlockingStats> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");

        let total_blocked: i64 =
            conn.query_row("SELECT COUNT(*) FROM blocked_ips", [], |row| row.get(0))?;
        let currently_blocked: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM blocked_ips WHERE {ACTIVE}"),
            named_params! { ":now": now },
            |row| row.get(0),
        )?;
        let auto_blocked: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocked_ips WHERE auto_blocked = 1",
            [],
            |row| row.get(0),
        )?;
        let manual_blocked: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocked_ips WHERE auto_blocked = 0",
            [],
            |row| row.get(0),
        )?;
        let unblocked: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocked_ips WHERE is_active = 0",
            [],
            |row| row.get(0),
        )?;
        let recent_blocks_24h: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocked_ips WHERE blocked_at >= ?1",
            params![day_ago],
            |row| row.get(0),
        )?;

        let mut attack_types = std::collections::BTreeMap::new();
        let mut stmt = conn.prepare(&format!(
            "SELECT attack_type, COUNT(*) FROM blocked_ips
             WHERE {ACTIVE} GROUP BY attack_type"
        ))?;
        let rows = stmt.query_map(named_params! { ":now": now }, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (ty, n) = row?;
            attack_types.insert(ty, n);
        }
        drop(stmt);

        let mut threat_levels = std::collections::BTreeMap::new();
        let mut stmt = conn.prepare(&format!(
            "SELECT
                CASE
                    WHEN threat_level >= 0.8 THEN 'Critical (0.8+)'
                    WHEN threat_level >= 0.6 THEN 'High (0.6-0.8)'
                    WHEN threat_level >= 0.4 THEN 'Medium (0.4-0.6)'
                    ELSE 'Low (0.0-0.4)'
                END AS level_range,
                COUNT(*)
             FROM blocked_ips WHERE {ACTIVE} GROUP BY level_range"
        ))?;
        let rows = stmt.query_map(named_params! { ":now": now }, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (bucket, n) = row?;
            threat_levels.insert(bucket, n);
        }
        drop(stmt);

        Ok(BlockingStats {
            total_blocked: total_blocked as u64,
            currently_blocked: currently_blocked as u64,
            auto_blocked: auto_blocked as u64,
            manual_blocked: manual_blocked as u64,
            unblocked: unblocked as u64,
            recent_blocks_24h: recent_blocks_24h as u64,
            attack_types,
            threat_levels,
            blocking_rate: (auto_blocked as f64 / 1.0_f64.max(total_blocked as f64)) * 100.0,
        })
    }

    /// Delete inactive rows released before `cutoff`. Returns rows removed.
    pub fn purge_inactive_before(&self, cutoff: &str) -> Result<usize> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "DELETE FROM blocked_ips WHERE is_active = 0 AND unblocked_at < ?1",
            params![cutoff],
        )
    }
}

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, types::Type, Connection, Row};
use tracing::debug;

use crate::{
    error::{RegenError, Result},
    regen::eligibility::EligibilityPolicy,
    storage::{
        models::{Account, AccountUpdate, AuditRecord, DatabaseStats, UpdateOutcome},
        store::AccountStore,
    },
};

const ACCOUNT_COLUMNS: &str = "id, is_active, entitlement_balance, usage_counter, last_regen_at, \
     total_entitlements_received, total_entitlements_given";

const AUDIT_COLUMNS: &str =
    "id, action, executed_at, accounts_updated, bonuses_granted, error_count, details";

/// Raises its flag when dropped, i.e. when the future owning it goes away.
#[derive(Default)]
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// SQLite-backed account store. The connection is shared behind a mutex and
/// every async call runs on the blocking pool.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RegenError::Other(anyhow::anyhow!("database connection lock poisoned")))
    }

    /// Run `f` on the blocking pool. If the returned future is dropped (the
    /// caller timed out or was cancelled) before `f` gets the connection,
    /// `f` never runs, so an abandoned call cannot commit behind its
    /// caller's back.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let abandoned = AbandonOnDrop::default();
        let flag = Arc::clone(&abandoned.0);

        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| RegenError::Other(anyhow::anyhow!("database connection lock poisoned")))?;
            if flag.load(Ordering::SeqCst) {
                debug!("Skipping database call abandoned by its caller");
                return Err(RegenError::Other(anyhow::anyhow!("database call abandoned")));
            }
            f(&guard)
        })
        .await
        .map_err(|e| RegenError::Other(anyhow::anyhow!("database task failed: {}", e)))?
    }

    /// Insert or replace an account. Account lifecycle belongs to the
    /// account-management flows; the regeneration cycle never calls this.
    pub fn insert_account(&self, account: &Account) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO accounts
             (id, is_active, entitlement_balance, usage_counter, last_regen_at,
              total_entitlements_received, total_entitlements_given)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                account.id,
                account.is_active,
                account.entitlement_balance,
                account.usage_counter,
                account.last_regen_at.map(format_ts),
                account.total_entitlements_received,
                account.total_entitlements_given,
            ],
        )?;
        Ok(())
    }

    pub fn get_account(&self, id: &str) -> Result<Option<Account>> {
        select_account(&*self.lock()?, id)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        select_accounts(&*self.lock()?, EligibilityPolicy::All)
    }

    pub fn get_audit_history(&self, limit: Option<usize>) -> Result<Vec<AuditRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY id DESC LIMIT ?1"
        ))?;

        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let records = stmt
            .query_map([limit], audit_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn count_audit_records(&self) -> Result<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn get_stats(&self, bonus_threshold: u32) -> Result<DatabaseStats> {
        let conn = self.lock()?;

        let total_accounts: i64 =
            conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;

        let active_accounts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;

        let total_balance: i64 = conn.query_row(
            "SELECT COALESCE(SUM(entitlement_balance), 0) FROM accounts",
            [],
            |row| row.get(0),
        )?;

        let accounts_over_threshold: i64 = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE usage_counter >= ?1",
            [bonus_threshold],
            |row| row.get(0),
        )?;

        let audit_runs: i64 =
            conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;

        let last_run_at: Option<String> = conn.query_row(
            "SELECT MAX(executed_at) FROM audit_log",
            [],
            |row| row.get(0),
        )?;

        Ok(DatabaseStats {
            total_accounts: total_accounts as usize,
            active_accounts: active_accounts as usize,
            total_balance: total_balance as u64,
            accounts_over_threshold: accounts_over_threshold as usize,
            audit_runs: audit_runs as usize,
            last_run_at: last_run_at.map(|s| parse_ts(0, &s)).transpose()?,
        })
    }
}

#[async_trait]
impl AccountStore for Database {
    async fn fetch_eligible(&self, policy: EligibilityPolicy) -> Result<Vec<Account>> {
        self.with_conn(move |conn| select_accounts(conn, policy)).await
    }

    async fn fetch_account(&self, id: &str) -> Result<Option<Account>> {
        let id = id.to_string();
        self.with_conn(move |conn| select_account(conn, &id)).await
    }

    async fn apply_regeneration(&self, update: &AccountUpdate) -> Result<UpdateOutcome> {
        let update = update.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE accounts
                 SET entitlement_balance = ?2, usage_counter = 0, last_regen_at = ?3
                 WHERE id = ?1
                   AND usage_counter = ?4
                   AND (last_regen_at IS NULL OR last_regen_at < ?5)",
                params![
                    update.account_id,
                    update.new_balance,
                    format_ts(update.regenerated_at),
                    update.expected_usage,
                    format_ts(update.regenerated_before),
                ],
            )?;

            Ok(if changed == 1 {
                UpdateOutcome::Applied
            } else {
                UpdateOutcome::Stale
            })
        })
        .await
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<i64> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO audit_log
                 (action, executed_at, accounts_updated, bonuses_granted, error_count, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.action,
                    format_ts(record.executed_at),
                    record.accounts_updated,
                    record.bonuses_granted,
                    record.error_count,
                    serde_json::to_string(&record.details)?,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            is_active INTEGER NOT NULL DEFAULT 1,
            entitlement_balance INTEGER NOT NULL DEFAULT 0 CHECK (entitlement_balance >= 0),
            usage_counter INTEGER NOT NULL DEFAULT 0 CHECK (usage_counter >= 0),
            last_regen_at TEXT,
            total_entitlements_received INTEGER NOT NULL DEFAULT 0,
            total_entitlements_given INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_accounts_active ON accounts(is_active);

        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            executed_at TEXT NOT NULL,
            accounts_updated INTEGER NOT NULL,
            bonuses_granted INTEGER NOT NULL,
            error_count INTEGER NOT NULL,
            details TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TRIGGER IF NOT EXISTS audit_log_no_update
        BEFORE UPDATE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit_log is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
        BEFORE DELETE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit_log is append-only');
        END;",
    )?;
    Ok(())
}

fn select_accounts(conn: &Connection, policy: EligibilityPolicy) -> Result<Vec<Account>> {
    let filter = match policy {
        EligibilityPolicy::ActiveOnly => "WHERE is_active = 1",
        EligibilityPolicy::All => "",
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts {filter} ORDER BY id"
    ))?;

    let accounts = stmt
        .query_map([], account_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(accounts)
}

fn select_account(conn: &Connection, id: &str) -> Result<Option<Account>> {
    let mut stmt = conn.prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"))?;
    let mut rows = stmt.query_map([id], account_from_row)?;
    Ok(rows.next().transpose()?)
}

fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        is_active: row.get(1)?,
        entitlement_balance: row.get(2)?,
        usage_counter: row.get(3)?,
        last_regen_at: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_ts(4, &s))
            .transpose()?,
        total_entitlements_received: row.get(5)?,
        total_entitlements_given: row.get(6)?,
    })
}

fn audit_from_row(row: &Row) -> rusqlite::Result<AuditRecord> {
    let details: String = row.get(6)?;
    Ok(AuditRecord {
        id: row.get(0)?,
        action: row.get(1)?,
        executed_at: parse_ts(2, &row.get::<_, String>(2)?)?,
        accounts_updated: row.get(3)?,
        bonuses_granted: row.get(4)?,
        error_count: row.get(5)?,
        details: serde_json::from_str(&details)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
    })
}

/// Fixed-width RFC 3339 so that text comparison in SQL orders correctly.
#[cfg(test)]
impl Database {
    /// Take the connection on another thread and keep it for `hold`.
    /// Returns once the connection is held.
    pub(crate) fn hold_connection(&self, hold: std::time::Duration) -> std::thread::JoinHandle<()> {
        let conn = Arc::clone(&self.conn);
        let (taken_tx, taken_rx) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            taken_tx.send(()).unwrap();
            std::thread::sleep(hold);
        });
        taken_rx.recv().unwrap();
        handle
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn seeded() -> Database {
        let db = Database::in_memory().unwrap();
        db.insert_account(&Account::new("a").with_usage(2)).unwrap();
        db.insert_account(&Account::new("b").with_usage(6)).unwrap();
        db.insert_account(&Account::new("c").with_usage(9).inactive()).unwrap();
        db
    }

    fn update_for(account: &Account, new_balance: u32, now: DateTime<Utc>) -> AccountUpdate {
        AccountUpdate {
            account_id: account.id.clone(),
            new_balance,
            expected_usage: account.usage_counter,
            regenerated_at: now,
            regenerated_before: now,
        }
    }

    #[tokio::test]
    async fn test_fetch_eligible_respects_policy() {
        let db = seeded();

        let active = db.fetch_eligible(EligibilityPolicy::ActiveOnly).await.unwrap();
        let ids: Vec<_> = active.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let all = db.fetch_eligible(EligibilityPolicy::All).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_conditional_update_applies_once() {
        let db = seeded();
        let now: DateTime<Utc> = "2026-10-18T00:00:05Z".parse().unwrap();
        let account = db.fetch_account("b").await.unwrap().unwrap();

        let outcome = db.apply_regeneration(&update_for(&account, 2, now)).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);

        let stored = db.get_account("b").unwrap().unwrap();
        assert_eq!(stored.entitlement_balance, 2);
        assert_eq!(stored.usage_counter, 0);
        assert_eq!(stored.last_regen_at, Some(now));

        // replaying the same write no longer matches the row
        let outcome = db.apply_regeneration(&update_for(&account, 2, now)).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Stale);
    }

    #[tokio::test]
    async fn test_conditional_update_detects_usage_change() {
        let db = seeded();
        let account = db.get_account("a").unwrap().unwrap();

        db.insert_account(&account.clone().with_usage(3)).unwrap();

        let outcome = db
            .apply_regeneration(&update_for(&account, 1, Utc::now()))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Stale);
        assert_eq!(db.get_account("a").unwrap().unwrap().usage_counter, 3);
    }

    #[tokio::test]
    async fn test_update_respects_regenerated_before_cutoff() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();
        let mut account = Account::new("x").with_usage(1);
        account.last_regen_at = Some(now - Duration::hours(1));
        db.insert_account(&account).unwrap();

        let mut update = update_for(&account, 1, now);
        update.regenerated_before = now - Duration::hours(2);
        assert_eq!(db.apply_regeneration(&update).await.unwrap(), UpdateOutcome::Stale);

        update.regenerated_before = now;
        assert_eq!(db.apply_regeneration(&update).await.unwrap(), UpdateOutcome::Applied);
    }

    #[tokio::test]
    async fn test_audit_log_is_append_only() {
        let db = Database::in_memory().unwrap();
        let record = AuditRecord {
            id: 0,
            action: "golden_boost_regeneration".into(),
            executed_at: Utc::now(),
            accounts_updated: 2,
            bonuses_granted: 1,
            error_count: 0,
            details: serde_json::json!({ "accountsSkipped": 0 }),
        };

        let id = db.append_audit(&record).await.unwrap();
        assert!(id > 0);

        let history = db.get_audit_history(None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].accounts_updated, 2);
        assert_eq!(history[0].details["accountsSkipped"], 0);

        let conn = db.lock().unwrap();
        assert!(conn.execute("UPDATE audit_log SET error_count = 9", []).is_err());
        assert!(conn.execute("DELETE FROM audit_log", []).is_err());
    }

    #[tokio::test]
    async fn test_timed_out_call_never_commits_later() {
        let db = seeded();
        let account = db.get_account("b").unwrap().unwrap();
        let record = AuditRecord {
            id: 0,
            action: "golden_boost_regeneration".into(),
            executed_at: Utc::now(),
            accounts_updated: 1,
            bonuses_granted: 1,
            error_count: 0,
            details: serde_json::json!({}),
        };

        let holder = db.hold_connection(StdDuration::from_millis(300));
        let update = update_for(&account, 2, Utc::now());
        let write = db.apply_regeneration(&update);
        assert!(tokio::time::timeout(StdDuration::from_millis(50), write).await.is_err());
        let audit = db.append_audit(&record);
        assert!(tokio::time::timeout(StdDuration::from_millis(50), audit).await.is_err());

        holder.join().unwrap();
        // give the abandoned blocking tasks their turn at the connection
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        let stored = db.get_account("b").unwrap().unwrap();
        assert_eq!(stored.entitlement_balance, 0);
        assert_eq!(stored.usage_counter, 6);
        assert!(stored.last_regen_at.is_none());
        assert_eq!(db.count_audit_records().unwrap(), 0);

        // the connection is usable again afterwards
        let outcome = db.apply_regeneration(&update_for(&account, 2, Utc::now())).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);
    }

    #[test]
    fn test_balance_cannot_go_negative() {
        let db = seeded();
        let conn = db.lock().unwrap();
        let result = conn.execute(
            "UPDATE accounts SET entitlement_balance = -1 WHERE id = 'a'",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_stats() {
        let db = seeded();
        let stats = db.get_stats(5).unwrap();
        assert_eq!(stats.total_accounts, 3);
        assert_eq!(stats.active_accounts, 2);
        assert_eq!(stats.total_balance, 0);
        assert_eq!(stats.accounts_over_threshold, 2);
        assert_eq!(stats.audit_runs, 0);
        assert!(stats.last_run_at.is_none());
    }

    #[test]
    fn test_schema_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boost.db");
        let path = path.to_str().unwrap();

        Database::new(path)
            .unwrap()
            .insert_account(&Account::new("kept"))
            .unwrap();

        let reopened = Database::new(path).unwrap();
        assert!(reopened.get_account("kept").unwrap().is_some());
    }
}

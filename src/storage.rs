//! SQLite storage layer for ResQ.
//!
//! Exclusive owner of the `users` and `alerts` tables; no other component
//! mutates persisted state. Every mutation is a single-record update, so a
//! failed operation leaves prior state completely unchanged.
//!
//! Lifecycle transitions are enforced with conditional updates: `respond`
//! succeeds only while the alert is still active with no responder, and
//! `verify` only once a responder is assigned. When a conditional update
//! matches nothing, the row is re-read and [`AlertState`] classifies the
//! failure as NotFound or Conflict, so two near-simultaneous responders
//! cannot both win.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::error::{Error, Result};
use crate::geo::{Coordinates, haversine_distance_m};
use crate::lifecycle::AlertState;
use crate::model::{Alert, AlertLevel, User};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:resq.db?mode=rwc"
    ///   or "sqlite::memory:")
    pub async fn new(database_url: &str) -> Result<Self> {
        // A single pooled connection: SQLite serializes writers anyway, and
        // in-memory databases are per-connection, so one connection keeps
        // `sqlite::memory:` consistent across operations.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL UNIQUE,
                email TEXT UNIQUE,
                password TEXT,
                latitude REAL,
                longitude REAL,
                last_seen INTEGER NOT NULL,
                name TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                level INTEGER NOT NULL CHECK (level BETWEEN 1 AND 3),
                message TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                helper_id INTEGER,
                verified INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Discovery scans active alerts; history views scan by sender/helper.
        for index in [
            "CREATE INDEX IF NOT EXISTS idx_alerts_active ON alerts(active)",
            "CREATE INDEX IF NOT EXISTS idx_alerts_device ON alerts(device_id)",
            "CREATE INDEX IF NOT EXISTS idx_alerts_helper ON alerts(helper_id)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Presence tracking
    // ------------------------------------------------------------------

    /// Record a device heartbeat: an idempotent upsert keyed by device id.
    ///
    /// Creates the user on first contact; afterwards overwrites location and
    /// last-seen on every call. The display name is updated only when a
    /// non-empty name is supplied, so an anonymous heartbeat never erases a
    /// previously-set name. No separate registration step is required.
    pub async fn record_heartbeat(
        &self,
        device_id: &str,
        latitude: f64,
        longitude: f64,
        name: Option<&str>,
    ) -> Result<User> {
        if device_id.trim().is_empty() {
            return Err(Error::Validation("deviceId must not be empty".to_string()));
        }

        let name = name.filter(|n| !n.trim().is_empty());
        let now = Utc::now().timestamp();

        let row = sqlx::query(
            r#"
            INSERT INTO users (device_id, latitude, longitude, last_seen, name)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(device_id) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                last_seen = excluded.last_seen,
                name = COALESCE(excluded.name, users.name)
            RETURNING *
            "#,
        )
        .bind(device_id)
        .bind(latitude)
        .bind(longitude)
        .bind(now)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        user_from_row(&row)
    }

    /// Look up a user by device id.
    pub async fn get_user(&self, device_id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Look up a user by registered email.
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Link account credentials to a device.
    ///
    /// If the device already exists from anonymous heartbeats, the account
    /// fields are attached to the existing row rather than inserting a
    /// duplicate device.
    pub async fn create_user(
        &self,
        device_id: &str,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User> {
        if device_id.trim().is_empty() {
            return Err(Error::Validation("deviceId must not be empty".to_string()));
        }

        let now = Utc::now().timestamp();

        let row = sqlx::query(
            r#"
            INSERT INTO users (device_id, email, password, last_seen, name)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(device_id) DO UPDATE SET
                email = excluded.email,
                password = excluded.password,
                name = COALESCE(excluded.name, users.name)
            RETURNING *
            "#,
        )
        .bind(device_id)
        .bind(email)
        .bind(password)
        .bind(now)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        user_from_row(&row)
    }

    // ------------------------------------------------------------------
    // Alert lifecycle
    // ------------------------------------------------------------------

    /// Insert a new alert: active, unverified, no responder, server-assigned
    /// creation timestamp.
    pub async fn create_alert(
        &self,
        device_id: &str,
        latitude: f64,
        longitude: f64,
        level: AlertLevel,
        message: &str,
    ) -> Result<Alert> {
        if device_id.trim().is_empty() {
            return Err(Error::Validation("deviceId must not be empty".to_string()));
        }
        if message.trim().is_empty() {
            return Err(Error::Validation("message must not be empty".to_string()));
        }

        let now = Utc::now().timestamp();

        let row = sqlx::query(
            r#"
            INSERT INTO alerts (device_id, latitude, longitude, level, message, active, verified, created_at)
            VALUES (?, ?, ?, ?, ?, 1, 0, ?)
            RETURNING *
            "#,
        )
        .bind(device_id)
        .bind(latitude)
        .bind(longitude)
        .bind(level.as_repr())
        .bind(message)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        alert_from_row(&row)
    }

    /// Fetch a single alert by id.
    pub async fn get_alert(&self, alert_id: i64) -> Result<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(alert_from_row).transpose()
    }

    /// All active alerts within `radius_m` meters of `center`.
    ///
    /// Includes the caller's own alerts; self-exclusion is a client concern,
    /// not a server guarantee. Ordering is unspecified.
    pub async fn nearby_active_alerts(
        &self,
        center: Coordinates,
        radius_m: f64,
    ) -> Result<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;

        let mut nearby = Vec::new();
        for row in &rows {
            let alert = alert_from_row(row)?;
            let location = Coordinates::new(alert.latitude, alert.longitude);
            if haversine_distance_m(center, location) <= radius_m {
                nearby.push(alert);
            }
        }

        Ok(nearby)
    }

    /// Assign a responder to an alert and take it out of discovery.
    ///
    /// Conditional write: succeeds only while the alert is ACTIVE with no
    /// responder. A second responder racing for the same alert gets a
    /// Conflict; exactly one wins.
    pub async fn respond_to_alert(&self, alert_id: i64, helper_id: i64) -> Result<Alert> {
        let row = sqlx::query(
            r#"
            UPDATE alerts SET helper_id = ?, active = 0
            WHERE id = ? AND active = 1 AND helper_id IS NULL
            RETURNING *
            "#,
        )
        .bind(helper_id)
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => alert_from_row(&row),
            None => Err(self.transition_failure(alert_id, "respond to").await),
        }
    }

    /// Mark a responded alert as verified by its sender.
    ///
    /// Requires a responder to be assigned: verification is an annotation on
    /// top of RESPONDED, and verifying an unresponded alert must neither flip
    /// it back to active nor fabricate a helper. Re-verifying an already
    /// verified alert is an idempotent success.
    pub async fn verify_alert(&self, alert_id: i64) -> Result<Alert> {
        let row = sqlx::query(
            r#"
            UPDATE alerts SET verified = 1
            WHERE id = ? AND helper_id IS NOT NULL
            RETURNING *
            "#,
        )
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => alert_from_row(&row),
            None => Err(self.transition_failure(alert_id, "verify").await),
        }
    }

    /// Cancel an alert: take it out of discovery, leave helper and verified
    /// untouched. Idempotent; cancelling twice has no additional effect.
    pub async fn cancel_alert(&self, alert_id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE alerts SET active = 0 WHERE id = ?")
            .bind(alert_id)
            .execute(&self.pool)
            .await?;

        // SQLite counts matched rows even when the value was already 0, so
        // zero here means the alert does not exist.
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("alert"));
        }

        Ok(())
    }

    /// Classify a conditional update that matched nothing: either the alert
    /// does not exist, or it is in a state that forbids the transition.
    async fn transition_failure(&self, alert_id: i64, attempted: &str) -> Error {
        match self.get_alert(alert_id).await {
            Ok(Some(alert)) => {
                let state = AlertState::of(&alert);
                Error::Conflict(format!(
                    "cannot {attempted} an alert in the {} state",
                    state.label()
                ))
            }
            Ok(None) => Error::NotFound("alert"),
            Err(e) => e,
        }
    }

    // ------------------------------------------------------------------
    // History views
    // ------------------------------------------------------------------

    /// All alerts ever sent by a device ("ResQuest" view).
    pub async fn alerts_by_sender(&self, device_id: &str) -> Result<Vec<Alert>> {
        let rows =
            sqlx::query("SELECT * FROM alerts WHERE device_id = ? ORDER BY created_at DESC, id DESC")
                .bind(device_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(alert_from_row).collect()
    }

    /// All alerts a helper has responded to ("ResQued" view).
    pub async fn alerts_by_helper(&self, helper_id: i64) -> Result<Vec<Alert>> {
        let rows =
            sqlx::query("SELECT * FROM alerts WHERE helper_id = ? ORDER BY created_at DESC, id DESC")
                .bind(helper_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(alert_from_row).collect()
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let last_seen: i64 = row.get("last_seen");

    Ok(User {
        id: row.get("id"),
        device_id: row.get("device_id"),
        email: row.get("email"),
        password: row.get("password"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        last_seen: timestamp_from_secs(last_seen)?,
        name: row.get("name"),
    })
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert> {
    let level: i64 = row.get("level");
    let created_at: i64 = row.get("created_at");

    Ok(Alert {
        id: row.get("id"),
        device_id: row.get("device_id"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        level: AlertLevel::from_repr(level).ok_or_else(|| {
            Error::Storage(sqlx::Error::Decode(
                format!("alert level out of range: {level}").into(),
            ))
        })?,
        message: row.get("message"),
        active: row.get("active"),
        helper_id: row.get("helper_id"),
        verified: row.get("verified"),
        created_at: timestamp_from_secs(created_at)?,
    })
}

fn timestamp_from_secs(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        Error::Storage(sqlx::Error::Decode(
            format!("timestamp out of range: {secs}").into(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_storage() -> Storage {
        Storage::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_heartbeat_creates_user() {
        let storage = setup_test_storage().await;

        let user = storage
            .record_heartbeat("abc", 37.0, -122.0, None)
            .await
            .unwrap();

        assert_eq!(user.device_id, "abc");
        assert_eq!(user.latitude, Some(37.0));
        assert_eq!(user.longitude, Some(-122.0));
        assert!(user.name.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_overwrites_location_preserves_name() {
        let storage = setup_test_storage().await;

        storage
            .record_heartbeat("abc", 37.0, -122.0, Some("Ada"))
            .await
            .unwrap();

        // Omitted name keeps the existing one.
        let user = storage
            .record_heartbeat("abc", 38.0, -121.0, None)
            .await
            .unwrap();
        assert_eq!(user.latitude, Some(38.0));
        assert_eq!(user.longitude, Some(-121.0));
        assert_eq!(user.name.as_deref(), Some("Ada"));

        // Empty name keeps the existing one too.
        let user = storage
            .record_heartbeat("abc", 39.0, -120.0, Some(""))
            .await
            .unwrap();
        assert_eq!(user.name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_heartbeat_rejects_empty_device_id() {
        let storage = setup_test_storage().await;

        let result = storage.record_heartbeat("  ", 37.0, -122.0, None).await;

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_alert_rejects_empty_message() {
        let storage = setup_test_storage().await;

        let result = storage
            .create_alert("abc", 37.0, -122.0, AlertLevel::Immediate, "   ")
            .await;

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_and_find_nearby() {
        let storage = setup_test_storage().await;

        let alert = storage
            .create_alert("abc", 37.0, -122.0, AlertLevel::Immediate, "Help!")
            .await
            .unwrap();
        assert!(alert.active);
        assert!(!alert.verified);
        assert!(alert.helper_id.is_none());

        // Exact location, tiny radius: found.
        let nearby = storage
            .nearby_active_alerts(Coordinates::new(37.0, -122.0), 100.0)
            .await
            .unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].id, alert.id);

        // ~111 km north: out of range.
        let far = storage
            .nearby_active_alerts(Coordinates::new(38.0, -122.0), 100.0)
            .await
            .unwrap();
        assert!(far.is_empty());
    }

    #[tokio::test]
    async fn test_nearby_includes_senders_own_alerts() {
        let storage = setup_test_storage().await;

        storage
            .create_alert("abc", 37.0, -122.0, AlertLevel::Urgent, "Help!")
            .await
            .unwrap();

        // The server contract is "all active alerts in radius"; the client
        // filters its own alerts locally.
        let nearby = storage
            .nearby_active_alerts(Coordinates::new(37.0, -122.0), 5000.0)
            .await
            .unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].device_id, "abc");
    }

    #[tokio::test]
    async fn test_respond_hides_alert_from_discovery() {
        let storage = setup_test_storage().await;

        let alert = storage
            .create_alert("abc", 37.0, -122.0, AlertLevel::Immediate, "Help!")
            .await
            .unwrap();

        let responded = storage.respond_to_alert(alert.id, 5).await.unwrap();
        assert!(!responded.active);
        assert_eq!(responded.helper_id, Some(5));

        let nearby = storage
            .nearby_active_alerts(Coordinates::new(37.0, -122.0), 5000.0)
            .await
            .unwrap();
        assert!(nearby.is_empty());
    }

    #[tokio::test]
    async fn test_second_responder_conflicts() {
        let storage = setup_test_storage().await;

        let alert = storage
            .create_alert("abc", 37.0, -122.0, AlertLevel::Immediate, "Help!")
            .await
            .unwrap();

        storage.respond_to_alert(alert.id, 5).await.unwrap();
        let second = storage.respond_to_alert(alert.id, 6).await;

        assert!(matches!(second, Err(Error::Conflict(_))));

        // The first responder's assignment is untouched.
        let stored = storage.get_alert(alert.id).await.unwrap().unwrap();
        assert_eq!(stored.helper_id, Some(5));
    }

    #[tokio::test]
    async fn test_concurrent_respond_exactly_one_winner() {
        let storage = setup_test_storage().await;

        let alert = storage
            .create_alert("abc", 37.0, -122.0, AlertLevel::Immediate, "Help!")
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            storage.respond_to_alert(alert.id, 5),
            storage.respond_to_alert(alert.id, 6),
        );

        let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);

        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_respond_to_missing_alert() {
        let storage = setup_test_storage().await;

        let result = storage.respond_to_alert(999, 5).await;

        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_verify_requires_responder() {
        let storage = setup_test_storage().await;

        let alert = storage
            .create_alert("abc", 37.0, -122.0, AlertLevel::Immediate, "Help!")
            .await
            .unwrap();

        let result = storage.verify_alert(alert.id).await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        // Rejected verify leaves the record completely unchanged.
        let stored = storage.get_alert(alert.id).await.unwrap().unwrap();
        assert!(stored.active);
        assert!(stored.helper_id.is_none());
        assert!(!stored.verified);
    }

    #[tokio::test]
    async fn test_verify_after_respond() {
        let storage = setup_test_storage().await;

        let alert = storage
            .create_alert("abc", 37.0, -122.0, AlertLevel::Immediate, "Help!")
            .await
            .unwrap();
        storage.respond_to_alert(alert.id, 5).await.unwrap();

        let verified = storage.verify_alert(alert.id).await.unwrap();
        assert!(verified.verified);
        assert_eq!(verified.helper_id, Some(5));

        // Re-verifying is an idempotent success.
        let again = storage.verify_alert(alert.id).await.unwrap();
        assert!(again.verified);
    }

    #[tokio::test]
    async fn test_verify_missing_alert() {
        let storage = setup_test_storage().await;

        let result = storage.verify_alert(999).await;

        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let storage = setup_test_storage().await;

        let alert = storage
            .create_alert("abc", 37.0, -122.0, AlertLevel::Immediate, "Help!")
            .await
            .unwrap();

        storage.cancel_alert(alert.id).await.unwrap();
        let first = storage.get_alert(alert.id).await.unwrap().unwrap();

        storage.cancel_alert(alert.id).await.unwrap();
        let second = storage.get_alert(alert.id).await.unwrap().unwrap();

        assert!(!first.active);
        assert!(first.helper_id.is_none());
        assert!(!first.verified);
        assert_eq!(second.active, first.active);
        assert_eq!(second.helper_id, first.helper_id);
        assert_eq!(second.verified, first.verified);
    }

    #[tokio::test]
    async fn test_cancel_missing_alert() {
        let storage = setup_test_storage().await;

        let result = storage.cancel_alert(999).await;

        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancelled_alert_cannot_be_responded() {
        let storage = setup_test_storage().await;

        let alert = storage
            .create_alert("abc", 37.0, -122.0, AlertLevel::Immediate, "Help!")
            .await
            .unwrap();
        storage.cancel_alert(alert.id).await.unwrap();

        let result = storage.respond_to_alert(alert.id, 5).await;

        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_history_views() {
        let storage = setup_test_storage().await;

        let sent = storage
            .create_alert("sender-1", 37.0, -122.0, AlertLevel::Immediate, "Help!")
            .await
            .unwrap();
        let other = storage
            .create_alert("sender-2", 37.0, -122.0, AlertLevel::Urgent, "Also help!")
            .await
            .unwrap();
        storage.respond_to_alert(other.id, 7).await.unwrap();

        let resquest = storage.alerts_by_sender("sender-1").await.unwrap();
        assert_eq!(resquest.len(), 1);
        assert_eq!(resquest[0].id, sent.id);

        let resqued = storage.alerts_by_helper(7).await.unwrap();
        assert_eq!(resqued.len(), 1);
        assert_eq!(resqued[0].id, other.id);

        // History retains resolved alerts indefinitely.
        storage.cancel_alert(sent.id).await.unwrap();
        let resquest = storage.alerts_by_sender("sender-1").await.unwrap();
        assert_eq!(resquest.len(), 1);
    }

    #[tokio::test]
    async fn test_create_user_links_account_to_existing_device() {
        let storage = setup_test_storage().await;

        storage
            .record_heartbeat("abc", 37.0, -122.0, None)
            .await
            .unwrap();

        let user = storage
            .create_user("abc", "ada@example.com", "s3cret", Some("Ada"))
            .await
            .unwrap();

        assert_eq!(user.device_id, "abc");
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
        assert_eq!(user.latitude, Some(37.0));

        let by_email = storage
            .get_user_by_email("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, user.id);
    }
}

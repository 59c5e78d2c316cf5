//! Soft identity resolution
//!
//! Respondents are not authenticated. A submission is matched to a returning
//! respondent by, in strict precedence order: the server-issued update code,
//! the browser fingerprint, then the email address. The first signal that
//! matches wins; conflicting weaker signals are ignored.
//!
//! A present-but-unknown update code is not an error. A mistyped or stale
//! code degrades to fingerprint/email matching instead of blocking the
//! submission.

use crate::Result;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

/// Identity signals supplied with a submission
///
/// The fingerprint is an opaque client-side device-signal hash: untrusted
/// and collision-tolerant, a de-duplication hint rather than an
/// authorization.
#[derive(Debug, Clone, Default)]
pub struct IdentitySignals {
    pub fingerprint: String,
    pub email: Option<String>,
    pub update_code: Option<String>,
}

/// Outcome of identity resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No prior submission matched; a new one will be created
    New,
    /// An existing submission to amend
    Existing(Uuid),
}

/// Resolve the target submission for an incoming request
///
/// Pure function of persisted state plus the given signals: no counters,
/// no randomness. Empty-string signals are treated as absent.
pub async fn resolve(pool: &SqlitePool, signals: &IdentitySignals) -> Result<Resolution> {
    let mut conn = pool.acquire().await?;
    resolve_on(&mut conn, signals).await
}

/// Resolve against an already-open connection
///
/// Reconciliation re-runs resolution on its write transaction before
/// inserting, so a first submission that landed between the caller's
/// lookup and the write is picked up instead of duplicated.
pub async fn resolve_on(
    conn: &mut SqliteConnection,
    signals: &IdentitySignals,
) -> Result<Resolution> {
    // 1. Update code: explicit intent to edit, authoritative
    if let Some(code) = non_empty(signals.update_code.as_deref()) {
        if let Some(id) = find_by_column(&mut *conn, "update_code", code).await? {
            debug!("Resolved submission {} by update code", id);
            return Ok(Resolution::Existing(id));
        }
        debug!("Update code matched nothing; falling back to fingerprint/email");
    }

    // 2. Same device, no (valid) code given - still an update, not a duplicate
    if let Some(fingerprint) = non_empty(Some(signals.fingerprint.as_str())) {
        if let Some(id) = find_by_column(&mut *conn, "fingerprint", fingerprint).await? {
            debug!("Resolved submission {} by fingerprint", id);
            return Ok(Resolution::Existing(id));
        }
    }

    // 3. Email as the weakest signal
    if let Some(email) = non_empty(signals.email.as_deref()) {
        if let Some(id) = find_by_column(&mut *conn, "email", email).await? {
            debug!("Resolved submission {} by email", id);
            return Ok(Resolution::Existing(id));
        }
    }

    Ok(Resolution::New)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

async fn find_by_column(
    conn: &mut SqliteConnection,
    column: &str,
    value: &str,
) -> Result<Option<Uuid>> {
    // `column` is one of three fixed names above, never user input
    let sql = format!(
        "SELECT id FROM submissions WHERE {} = ? ORDER BY created_at LIMIT 1",
        column
    );
    let id: Option<String> = sqlx::query_scalar(&sql)
        .bind(value)
        .fetch_optional(&mut *conn)
        .await?;

    match id {
        Some(id_str) => {
            let id = Uuid::parse_str(&id_str)
                .map_err(|e| crate::Error::Internal(format!("Invalid submission id in database: {}", e)))?;
            Ok(Some(id))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool_with_submission(fingerprint: &str, email: Option<&str>, code: &str) -> (SqlitePool, Uuid) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        dreamclimb_common::db::create_schema(&pool).await.unwrap();

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO submissions (id, fingerprint, email, update_code, created_at, updated_at)
             VALUES (?, ?, ?, ?, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .bind(id.to_string())
        .bind(fingerprint)
        .bind(email)
        .bind(code)
        .execute(&pool)
        .await
        .unwrap();

        (pool, id)
    }

    #[tokio::test]
    async fn test_update_code_wins_over_mismatched_fingerprint() {
        let (pool, id) = pool_with_submission("fp-original", None, "CODE42").await;

        let signals = IdentitySignals {
            fingerprint: "fp-different-device".to_string(),
            email: None,
            update_code: Some("CODE42".to_string()),
        };
        assert_eq!(resolve(&pool, &signals).await.unwrap(), Resolution::Existing(id));
    }

    #[tokio::test]
    async fn test_unknown_code_falls_back_to_fingerprint() {
        let (pool, id) = pool_with_submission("fp-abc", None, "CODE42").await;

        let signals = IdentitySignals {
            fingerprint: "fp-abc".to_string(),
            email: None,
            update_code: Some("TYPO-CODE".to_string()),
        };
        assert_eq!(resolve(&pool, &signals).await.unwrap(), Resolution::Existing(id));
    }

    #[tokio::test]
    async fn test_email_matches_when_fingerprint_does_not() {
        let (pool, id) = pool_with_submission("fp-abc", Some("climber@example.com"), "CODE42").await;

        let signals = IdentitySignals {
            fingerprint: "fp-new-laptop".to_string(),
            email: Some("climber@example.com".to_string()),
            update_code: None,
        };
        assert_eq!(resolve(&pool, &signals).await.unwrap(), Resolution::Existing(id));
    }

    #[tokio::test]
    async fn test_no_match_resolves_to_new() {
        let (pool, _) = pool_with_submission("fp-abc", Some("a@example.com"), "CODE42").await;

        let signals = IdentitySignals {
            fingerprint: "fp-unseen".to_string(),
            email: Some("b@example.com".to_string()),
            update_code: None,
        };
        assert_eq!(resolve(&pool, &signals).await.unwrap(), Resolution::New);
    }

    #[tokio::test]
    async fn test_empty_signals_are_absent() {
        let (pool, _) = pool_with_submission("fp-abc", Some(""), "CODE42").await;

        // An empty stored email must not match an empty supplied email
        let signals = IdentitySignals {
            fingerprint: "fp-unseen".to_string(),
            email: Some("".to_string()),
            update_code: Some("".to_string()),
        };
        assert_eq!(resolve(&pool, &signals).await.unwrap(), Resolution::New);
    }
}

//! Submission reconciliation
//!
//! Owns the upsert/merge algorithm: given a resolved identity and a
//! payload, creates or mutates exactly one submission row.
//!
//! Merge rules:
//! - scalar demographics overwrite per field (an absent field leaves the
//!   stored value untouched)
//! - climbed problems and preferred tags are unioned, never replaced, so
//!   repeat submissions accumulate history
//! - the newsletter flag is overwritten by the latest value
//! - the update code is generated once and preserved for the life of the
//!   submission
//!
//! Unknown problem ids and tag keys are dropped and reported back, never
//! fatal. Only malformed scalars reject the request.

use crate::catalog;
use crate::identity::{self, IdentitySignals, Resolution};
use crate::taxonomy::Taxonomy;
use crate::{Error, Result};
use chrono::Utc;
use dreamclimb_common::db::models::{Gender, Submission};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Alphabet for update codes: no 0/O, 1/I/L lookalikes, human-typable
const UPDATE_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Update code length in characters
const UPDATE_CODE_LEN: usize = 8;

/// Retries for transient SQLITE_BUSY/LOCKED conflicts
const BUSY_RETRIES: u32 = 3;

/// Plausible bounds for height and arm span in centimeters
const SCALAR_CM_RANGE: std::ops::RangeInclusive<i64> = 1..=300;

/// Validated survey payload, one canonical schema for all clients
#[derive(Debug, Clone, Default)]
pub struct SubmissionPayload {
    pub fingerprint: String,
    pub email: Option<String>,
    pub gender: Option<Gender>,
    pub height_cm: Option<i64>,
    pub arm_span_cm: Option<i64>,
    pub climbed_problem_ids: Vec<String>,
    pub preferred_tag_keys: Vec<String>,
    pub subscribe_newsletter: bool,
}

/// Result of a successful reconcile
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub submission_id: Uuid,
    /// The code the client retains to amend this submission later.
    /// Returned on every successful edit, newly minted only on creation.
    pub update_code: String,
    pub dropped_problem_ids: Vec<String>,
    pub dropped_tag_keys: Vec<String>,
}

/// Create or amend the submission targeted by `resolution`
pub async fn reconcile(
    pool: &SqlitePool,
    taxonomy: &Taxonomy,
    resolution: Resolution,
    payload: &SubmissionPayload,
) -> Result<ReconcileOutcome> {
    validate_scalars(payload)?;

    // Reference validation: drop-and-warn, never fail the whole submission
    let (valid_problem_ids, dropped_problem_ids) =
        catalog::filter_known_ids(pool, &payload.climbed_problem_ids).await?;
    let tag_resolution = taxonomy.resolve(&payload.preferred_tag_keys);

    if !dropped_problem_ids.is_empty() {
        warn!("Dropping {} unknown problem id(s)", dropped_problem_ids.len());
    }
    if !tag_resolution.invalid.is_empty() {
        warn!("Dropping {} unknown tag key(s)", tag_resolution.invalid.len());
    }

    let valid_tag_keys: Vec<String> = tag_resolution.valid.into_iter().collect();
    let dropped_tag_keys: Vec<String> = tag_resolution.invalid.into_iter().collect();

    // Same-identity writers contend on these rows; retry transparently on
    // SQLITE_BUSY so the caller never sees the conflict. A unique-index
    // conflict means a racing first submission won the insert; the retry
    // re-resolves inside the transaction and takes the update path.
    let mut attempt = 0;
    let (submission_id, update_code) = loop {
        match write_submission(pool, resolution, payload, &valid_problem_ids, &valid_tag_keys).await
        {
            Ok(result) => break result,
            Err(Error::Database(e))
                if (is_busy(&e) || is_unique_conflict(&e)) && attempt < BUSY_RETRIES =>
            {
                attempt += 1;
                debug!("Submission write hit a conflict, retry {}", attempt);
                tokio::time::sleep(std::time::Duration::from_millis(50 * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    };

    Ok(ReconcileOutcome {
        submission_id,
        update_code,
        dropped_problem_ids,
        dropped_tag_keys,
    })
}

/// Single transactional validate-then-write pass
async fn write_submission(
    pool: &SqlitePool,
    resolution: Resolution,
    payload: &SubmissionPayload,
    valid_problem_ids: &[String],
    valid_tag_keys: &[String],
) -> Result<(Uuid, String)> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    // The caller resolved on the pool before this transaction opened; a
    // racing first submission may have landed in between. Re-resolve on
    // the transaction so one identity never forks into two rows.
    let resolution = match resolution {
        Resolution::Existing(id) => Resolution::Existing(id),
        Resolution::New => {
            let recheck = IdentitySignals {
                fingerprint: payload.fingerprint.clone(),
                email: payload.email.clone(),
                update_code: None,
            };
            identity::resolve_on(&mut *tx, &recheck).await?
        }
    };

    let (submission_id, update_code) = match resolution {
        Resolution::New => {
            let id = Uuid::new_v4();
            let code = mint_update_code(&mut tx).await?;

            sqlx::query(
                r#"
                INSERT INTO submissions
                    (id, fingerprint, email, update_code, gender, height_cm,
                     arm_span_cm, subscribe_newsletter, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id.to_string())
            .bind(&payload.fingerprint)
            .bind(payload.email.as_deref())
            .bind(&code)
            .bind(payload.gender.map(|g| g.as_str()))
            .bind(payload.height_cm)
            .bind(payload.arm_span_cm)
            .bind(payload.subscribe_newsletter)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            info!("Created submission {}", id);
            (id, code)
        }
        Resolution::Existing(id) => {
            // Per-field overwrite: COALESCE keeps the stored value when the
            // request omits a field. The newsletter flag is always explicit.
            sqlx::query(
                r#"
                UPDATE submissions SET
                    email = COALESCE(?, email),
                    gender = COALESCE(?, gender),
                    height_cm = COALESCE(?, height_cm),
                    arm_span_cm = COALESCE(?, arm_span_cm),
                    subscribe_newsletter = ?,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(payload.email.as_deref())
            .bind(payload.gender.map(|g| g.as_str()))
            .bind(payload.height_cm)
            .bind(payload.arm_span_cm)
            .bind(payload.subscribe_newsletter)
            .bind(&now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

            let code: String =
                sqlx::query_scalar("SELECT update_code FROM submissions WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_one(&mut *tx)
                    .await?;

            info!("Amended submission {}", id);
            (id, code)
        }
    };

    // Union-merge: re-inserting an already-present reference is a no-op
    for problem_id in valid_problem_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO submission_problems (submission_id, problem_id) VALUES (?, ?)",
        )
        .bind(submission_id.to_string())
        .bind(problem_id)
        .execute(&mut *tx)
        .await?;
    }
    for tag_key in valid_tag_keys {
        sqlx::query(
            "INSERT OR IGNORE INTO submission_tags (submission_id, tag_key) VALUES (?, ?)",
        )
        .bind(submission_id.to_string())
        .bind(tag_key)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok((submission_id, update_code))
}

/// Load a full submission with its problem and tag sets
pub async fn fetch_submission(
    pool: &SqlitePool,
    id: Uuid,
) -> Result<Option<(Submission, Vec<String>, Vec<String>)>> {
    let row: Option<(String, Option<String>, String, Option<String>, Option<i64>, Option<i64>, bool, String, String)> =
        sqlx::query_as(
            "SELECT fingerprint, email, update_code, gender, height_cm, arm_span_cm,
                    subscribe_newsletter, created_at, updated_at
             FROM submissions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    let Some((fingerprint, email, update_code, gender, height_cm, arm_span_cm, subscribe_newsletter, created_at, updated_at)) = row
    else {
        return Ok(None);
    };

    let parse_ts = |s: &str| {
        chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::Internal(format!("Invalid timestamp in database: {}", e)))
    };

    let submission = Submission {
        id,
        fingerprint,
        email,
        update_code,
        gender: gender.as_deref().and_then(Gender::parse),
        height_cm,
        arm_span_cm,
        subscribe_newsletter,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    };

    let problems: Vec<String> = sqlx::query_scalar(
        "SELECT problem_id FROM submission_problems WHERE submission_id = ? ORDER BY problem_id",
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;

    let tags: Vec<String> = sqlx::query_scalar(
        "SELECT tag_key FROM submission_tags WHERE submission_id = ? ORDER BY tag_key",
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(Some((submission, problems, tags)))
}

/// Generate a fresh update code, collision-checked against existing rows
async fn mint_update_code(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<String> {
    loop {
        let code = generate_update_code();
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM submissions WHERE update_code = ?)")
                .bind(&code)
                .fetch_one(&mut **tx)
                .await?;
        if !taken {
            return Ok(code);
        }
        debug!("Update code collision, regenerating");
    }
}

/// Random human-typable token from the unambiguous alphabet
fn generate_update_code() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..UPDATE_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..UPDATE_CODE_ALPHABET.len());
            UPDATE_CODE_ALPHABET[idx] as char
        })
        .collect()
}

fn validate_scalars(payload: &SubmissionPayload) -> Result<()> {
    // The fingerprint is the one mandatory identity signal; without it
    // a resubmission from the same device could never be matched
    if payload.fingerprint.trim().is_empty() {
        return Err(Error::validation(
            "browser_id",
            "must not be empty".to_string(),
        ));
    }
    if let Some(height) = payload.height_cm {
        if !SCALAR_CM_RANGE.contains(&height) {
            return Err(Error::validation(
                "height",
                format!("must be between 1 and 300 cm, got {}", height),
            ));
        }
    }
    if let Some(arm_span) = payload.arm_span_cm {
        if !SCALAR_CM_RANGE.contains(&arm_span) {
            return Err(Error::validation(
                "arm_span",
                format!("must be between 1 and 300 cm, got {}", arm_span),
            ));
        }
    }
    Ok(())
}

fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<u32>().ok())
            .map_or(false, is_busy_code),
        _ => false,
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), matched on the primary result
/// code so extended variants like SQLITE_BUSY_SNAPSHOT (517) count too
fn is_busy_code(code: u32) -> bool {
    matches!(code & 0xff, 5 | 6)
}

fn is_unique_conflict(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{self, IdentitySignals};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        dreamclimb_common::db::create_schema(&pool).await.unwrap();

        sqlx::query("INSERT INTO sectors (id, name, slug) VALUES (1, 'Apremont', 'apremont')")
            .execute(&pool)
            .await
            .unwrap();
        for (id, name, styles) in [
            ("a", "Problem A", "dalle"),
            ("b", "Problem B", "dalle, jeté"),
            ("c", "Problem C", "mur"),
        ] {
            sqlx::query(
                "INSERT INTO problems (id, name, grade, styles, sector_id) VALUES (?, ?, '6a', ?, 1)",
            )
            .bind(id)
            .bind(name)
            .bind(styles)
            .execute(&pool)
            .await
            .unwrap();
        }
        pool
    }

    fn test_taxonomy() -> Taxonomy {
        let mut counts = HashMap::new();
        counts.insert("dalle".to_string(), 2);
        counts.insert("jeté".to_string(), 1);
        counts.insert("mur".to_string(), 1);
        Taxonomy::from_counts(counts)
    }

    fn payload(fingerprint: &str) -> SubmissionPayload {
        SubmissionPayload {
            fingerprint: fingerprint.to_string(),
            ..Default::default()
        }
    }

    async fn problems_of(pool: &SqlitePool, id: Uuid) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT problem_id FROM submission_problems WHERE submission_id = ? ORDER BY problem_id",
        )
        .bind(id.to_string())
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_submission_mints_code() {
        let pool = test_pool().await;
        let taxonomy = test_taxonomy();

        let outcome = reconcile(&pool, &taxonomy, Resolution::New, &payload("fp-1"))
            .await
            .unwrap();

        assert_eq!(outcome.update_code.len(), UPDATE_CODE_LEN);
        assert!(outcome
            .update_code
            .bytes()
            .all(|b| UPDATE_CODE_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn test_idempotent_resubmission() {
        let pool = test_pool().await;
        let taxonomy = test_taxonomy();

        let mut p = payload("fp-1");
        p.climbed_problem_ids = vec!["a".to_string(), "b".to_string()];
        p.preferred_tag_keys = vec!["dalle".to_string()];

        let first = reconcile(&pool, &taxonomy, Resolution::New, &p).await.unwrap();

        // Identical payload again, resolved through the fingerprint
        let signals = IdentitySignals {
            fingerprint: "fp-1".to_string(),
            ..Default::default()
        };
        let resolution = identity::resolve(&pool, &signals).await.unwrap();
        assert_eq!(resolution, Resolution::Existing(first.submission_id));

        let second = reconcile(&pool, &taxonomy, resolution, &p).await.unwrap();
        assert_eq!(second.submission_id, first.submission_id);
        assert_eq!(second.update_code, first.update_code);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(problems_of(&pool, first.submission_id).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_racing_first_submissions_share_one_row() {
        let pool = test_pool().await;
        let taxonomy = test_taxonomy();

        // Two near-simultaneous requests from the same device both resolve
        // before either writes, so both arrive believing they are first
        let signals = IdentitySignals {
            fingerprint: "fp-1".to_string(),
            ..Default::default()
        };
        let r1 = identity::resolve(&pool, &signals).await.unwrap();
        let r2 = identity::resolve(&pool, &signals).await.unwrap();
        assert_eq!(r1, Resolution::New);
        assert_eq!(r2, Resolution::New);

        let mut p1 = payload("fp-1");
        p1.climbed_problem_ids = vec!["a".to_string()];
        let mut p2 = payload("fp-1");
        p2.climbed_problem_ids = vec!["b".to_string()];

        let first = reconcile(&pool, &taxonomy, r1, &p1).await.unwrap();
        let second = reconcile(&pool, &taxonomy, r2, &p2).await.unwrap();

        // The second write converges on the first row instead of forking
        assert_eq!(second.submission_id, first.submission_id);
        assert_eq!(second.update_code, first.update_code);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(problems_of(&pool, first.submission_id).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_union_accumulation() {
        let pool = test_pool().await;
        let taxonomy = test_taxonomy();

        let mut p = payload("fp-1");
        p.climbed_problem_ids = vec!["a".to_string(), "b".to_string()];
        let first = reconcile(&pool, &taxonomy, Resolution::New, &p).await.unwrap();

        p.climbed_problem_ids = vec!["b".to_string(), "c".to_string()];
        reconcile(&pool, &taxonomy, Resolution::Existing(first.submission_id), &p)
            .await
            .unwrap();

        assert_eq!(
            problems_of(&pool, first.submission_id).await,
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn test_scalar_overwrite_independence() {
        let pool = test_pool().await;
        let taxonomy = test_taxonomy();

        let mut p = payload("fp-1");
        p.height_cm = Some(170);
        p.arm_span_cm = Some(175);
        let first = reconcile(&pool, &taxonomy, Resolution::New, &p).await.unwrap();

        let mut update = payload("fp-1");
        update.height_cm = Some(180);
        reconcile(&pool, &taxonomy, Resolution::Existing(first.submission_id), &update)
            .await
            .unwrap();

        let (submission, _, _) = fetch_submission(&pool, first.submission_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.height_cm, Some(180));
        assert_eq!(submission.arm_span_cm, Some(175));
        assert_eq!(submission.update_code, first.update_code);
    }

    #[tokio::test]
    async fn test_newsletter_flag_overwritten() {
        let pool = test_pool().await;
        let taxonomy = test_taxonomy();

        let mut p = payload("fp-1");
        p.subscribe_newsletter = true;
        let first = reconcile(&pool, &taxonomy, Resolution::New, &p).await.unwrap();

        p.subscribe_newsletter = false;
        reconcile(&pool, &taxonomy, Resolution::Existing(first.submission_id), &p)
            .await
            .unwrap();

        let subscribed: bool = sqlx::query_scalar(
            "SELECT subscribe_newsletter FROM submissions WHERE id = ?",
        )
        .bind(first.submission_id.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(!subscribed);
    }

    #[tokio::test]
    async fn test_reference_hygiene() {
        let pool = test_pool().await;
        let taxonomy = test_taxonomy();

        let mut p = payload("fp-1");
        p.climbed_problem_ids = vec!["a".to_string(), "bogus99".to_string()];
        p.preferred_tag_keys = vec!["dalle".to_string(), "volume".to_string()];

        let outcome = reconcile(&pool, &taxonomy, Resolution::New, &p).await.unwrap();
        assert_eq!(outcome.dropped_problem_ids, vec!["bogus99"]);
        assert_eq!(outcome.dropped_tag_keys, vec!["volume"]);
        assert_eq!(problems_of(&pool, outcome.submission_id).await, vec!["a"]);

        let tags: Vec<String> = sqlx::query_scalar(
            "SELECT tag_key FROM submission_tags WHERE submission_id = ?",
        )
        .bind(outcome.submission_id.to_string())
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tags, vec!["dalle"]);
    }

    #[tokio::test]
    async fn test_out_of_range_height_rejected() {
        let pool = test_pool().await;
        let taxonomy = test_taxonomy();

        let mut p = payload("fp-1");
        p.height_cm = Some(-5);

        let err = reconcile(&pool, &taxonomy, Resolution::New, &p)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "height", .. }));

        // Rejected whole: nothing persisted
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_empty_fingerprint_rejected() {
        let pool = test_pool().await;
        let taxonomy = test_taxonomy();

        let err = reconcile(&pool, &taxonomy, Resolution::New, &payload("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "browser_id", .. }));
    }

    #[test]
    fn test_busy_detection_covers_extended_codes() {
        assert!(is_busy_code(5)); // SQLITE_BUSY
        assert!(is_busy_code(6)); // SQLITE_LOCKED
        assert!(is_busy_code(517)); // SQLITE_BUSY_SNAPSHOT
        assert!(is_busy_code(262)); // SQLITE_LOCKED_SHAREDCACHE
        assert!(!is_busy_code(1)); // SQLITE_ERROR
        assert!(!is_busy_code(19)); // SQLITE_CONSTRAINT
        assert!(!is_busy_code(2067)); // SQLITE_CONSTRAINT_UNIQUE
    }

    #[test]
    fn test_generate_update_code_shape() {
        for _ in 0..100 {
            let code = generate_update_code();
            assert_eq!(code.len(), UPDATE_CODE_LEN);
            assert!(code.bytes().all(|b| UPDATE_CODE_ALPHABET.contains(&b)));
        }
    }
}

//! Email retention policy
//!
//! Once the initial collection phase closes, emails are kept only for
//! respondents who opted into the newsletter. Submissions themselves are
//! never deleted; only the email column is nulled. Run out-of-band via the
//! `sweep-emails` binary.

use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Null the email of every submission that did not opt into the newsletter
///
/// Returns the number of emails cleared. Safe to run repeatedly.
pub async fn sweep_unsubscribed_emails(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE submissions SET email = NULL
         WHERE subscribe_newsletter = 0 AND email IS NOT NULL",
    )
    .execute(pool)
    .await?;

    let cleared = result.rows_affected();
    info!("Retention sweep cleared {} email(s)", cleared);
    Ok(cleared)
}

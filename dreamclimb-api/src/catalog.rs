//! Problem catalog queries
//!
//! The catalog is a read-only collaborator: this module searches it for the
//! questionnaire autocomplete and filters submitted problem ids against it.
//! Nothing here ever mutates catalog rows.

use crate::Result;
use dreamclimb_common::db::models::{Problem, SectorRef};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

/// Queries shorter than this return empty without touching the database
pub const MIN_QUERY_LEN: usize = 3;

/// Default result cap for autocomplete searches
pub const DEFAULT_SEARCH_LIMIT: i64 = 20;

/// Ids per IN(...) batch, well under SQLite's 999 bind-variable floor
const ID_BATCH_SIZE: usize = 500;

/// Case-insensitive substring search over problem names
///
/// Ordered by match position (earlier match ranks higher), then name.
/// Queries of length <= 2 short-circuit to an empty result; the threshold
/// keeps one- and two-letter autocomplete keystrokes off the index.
pub async fn search(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<Problem>> {
    let query = query.trim();
    if query.chars().count() < MIN_QUERY_LEN {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT p.id, p.name, p.grade, s.id AS sector_id, s.name AS sector_name
        FROM problems p
        JOIN sectors s ON s.id = p.sector_id
        WHERE INSTR(LOWER(p.name), LOWER(?1)) > 0
        ORDER BY INSTR(LOWER(p.name), LOWER(?1)), p.name
        LIMIT ?2
        "#,
    )
    .bind(query)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let problems = rows
        .into_iter()
        .map(|row| Problem {
            id: row.get("id"),
            name: row.get("name"),
            grade: row.get("grade"),
            sector: SectorRef {
                id: row.get("sector_id"),
                name: row.get("sector_name"),
            },
        })
        .collect();

    Ok(problems)
}

/// Partition candidate problem ids into catalog-known and unknown
///
/// Input order is preserved and duplicates collapse. Unknown ids are
/// returned for reporting, never treated as an error.
pub async fn filter_known_ids(
    pool: &SqlitePool,
    ids: &[String],
) -> Result<(Vec<String>, Vec<String>)> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<String> = Vec::new();
    for id in ids {
        if !id.is_empty() && seen.insert(id.as_str()) {
            candidates.push(id.clone());
        }
    }
    if candidates.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    // Batched so an oversized id list stays under the bind-variable limit
    let mut known: HashSet<String> = HashSet::new();
    for batch in candidates.chunks(ID_BATCH_SIZE) {
        let placeholders = vec!["?"; batch.len()].join(", ");
        let sql = format!("SELECT id FROM problems WHERE id IN ({})", placeholders);
        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for id in batch {
            query = query.bind(id);
        }
        known.extend(query.fetch_all(pool).await?);
    }

    let (valid, dropped) = candidates
        .into_iter()
        .partition(|id| known.contains(id));

    Ok((valid, dropped))
}

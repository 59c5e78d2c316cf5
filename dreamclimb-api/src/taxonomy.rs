//! Bilingual tag taxonomy
//!
//! Style tags are authored in French on the catalog side (the canonical
//! key) and displayed in English. Submissions always store the canonical
//! key, so display labels can change without breaking stored preferences.
//!
//! The taxonomy is built once at startup from the catalog's style column
//! and is read-only afterwards. Resolving keys never fails: unknown keys
//! are reported in the result rather than raised as errors.

use crate::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// French canonical key -> English display label
const TAG_TRANSLATIONS: &[(&str, &str)] = &[
    // Wall angles / types
    ("mur", "wall"),
    ("dalle", "slab"),
    ("dévers", "overhang"),
    ("surplomb", "steep overhang"),
    ("toit", "roof"),
    ("arête", "arete"),
    ("dièdre", "corner"),
    ("proue", "prow"),
    ("pilier", "pillar"),
    ("bombé", "rounded"),
    ("cheminée", "chimney"),
    // Traverses
    ("traversée g-d", "traverse L-R"),
    ("traversée d-g", "traverse R-L"),
    ("traversée", "traverse"),
    // Hold types
    ("aplats", "slopers"),
    ("réglettes", "crimps"),
    ("réta", "mantle"),
    ("trous", "pockets"),
    ("bidoigts", "two-finger pockets"),
    ("monodoigts", "monos"),
    ("inversées", "underclings"),
    ("pincettes", "pinches"),
    // Techniques and features
    ("jeté", "dyno"),
    ("fissure", "crack"),
    ("boucle", "loop"),
    ("saut", "jump"),
    // Height and difficulty
    ("haut", "highball"),
    ("expo", "exposed"),
    // Start types
    ("départ assis", "sit start"),
    // Special
    ("descente", "descent"),
    ("avec corde", "with rope"),
];

/// One taxonomy entry
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    /// Canonical (French) key, the identity stored by submissions
    pub original_key: String,
    /// English display label; falls back to the key when untranslated
    pub display_label: String,
    /// Number of catalog problems carrying this tag
    pub usage_count: i64,
}

/// Result of resolving a batch of candidate tag keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagResolution {
    pub valid: BTreeSet<String>,
    pub invalid: BTreeSet<String>,
}

/// Read-only tag lookup table
#[derive(Debug, Clone)]
pub struct Taxonomy {
    /// Sorted by usage_count descending, then display_label ascending
    tags: Vec<Tag>,
    known: BTreeSet<String>,
}

impl Taxonomy {
    /// Build the taxonomy from the catalog's comma-separated style lists
    pub async fn load(pool: &SqlitePool) -> Result<Taxonomy> {
        let styles: Vec<Option<String>> = sqlx::query_scalar("SELECT styles FROM problems")
            .fetch_all(pool)
            .await?;

        let mut counts: HashMap<String, i64> = HashMap::new();
        for style_list in styles.into_iter().flatten() {
            for raw in style_list.split(',') {
                let key = normalize_key(raw);
                if !key.is_empty() {
                    *counts.entry(key).or_insert(0) += 1;
                }
            }
        }

        let taxonomy = Taxonomy::from_counts(counts);
        info!("Loaded tag taxonomy with {} tags", taxonomy.tags.len());
        Ok(taxonomy)
    }

    /// Build from precomputed usage counts
    pub fn from_counts(counts: HashMap<String, i64>) -> Taxonomy {
        let translations: HashMap<&str, &str> = TAG_TRANSLATIONS.iter().copied().collect();

        let mut tags: Vec<Tag> = counts
            .into_iter()
            .map(|(key, count)| {
                let label = translations
                    .get(key.as_str())
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| key.clone());
                Tag {
                    original_key: key,
                    display_label: label,
                    usage_count: count,
                }
            })
            .collect();

        // Deterministic ordering for reproducible UI and tests
        tags.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then_with(|| a.display_label.cmp(&b.display_label))
        });

        let known = tags.iter().map(|t| t.original_key.clone()).collect();
        Taxonomy { tags, known }
    }

    /// All tags, most used first, label as tie-break
    pub fn list_all(&self) -> &[Tag] {
        &self.tags
    }

    /// Partition candidate keys into known and unknown
    ///
    /// Keys are normalized before lookup; duplicates collapse via set
    /// semantics. Never errors: the taxonomy is advisory metadata.
    pub fn resolve<I, S>(&self, keys: I) -> TagResolution
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolution = TagResolution::default();
        for key in keys {
            let normalized = normalize_key(key.as_ref());
            if normalized.is_empty() {
                continue;
            }
            if self.known.contains(&normalized) {
                resolution.valid.insert(normalized);
            } else {
                resolution.invalid.insert(normalized);
            }
        }
        resolution
    }
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

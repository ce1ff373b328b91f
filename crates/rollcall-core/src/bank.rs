//! Person bank — known identities as unit-normalized centroid embeddings.
//!
//! Built once at startup from a precomputed embedding store and read-only
//! afterwards, so it can be shared across threads without locking.

use crate::types::Embedding;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BankError {
    #[error("embedding store not found: {0}")]
    StoreNotFound(String),
    #[error("failed to read embedding store: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse embedding store: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("store has {names} names but {embeddings} embeddings")]
    LengthMismatch { names: usize, embeddings: usize },
    #[error("store embeddings have inconsistent dimensions ({0} vs {1})")]
    DimensionMismatch(usize, usize),
    #[error("embedding store is empty")]
    Empty,
}

/// One known identity: a unit centroid plus the normalized exemplars it was
/// built from.
#[derive(Debug, Clone)]
pub struct PersonEntry {
    pub name: String,
    pub centroid: Embedding,
    pub exemplars: Vec<Embedding>,
}

/// Outcome of matching a probe embedding against the bank.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Best similarity cleared the floor and the margin over the runner-up.
    Match {
        name: String,
        similarity: f32,
        margin: f32,
    },
    /// Best similarity cleared the floor but the runner-up was too close.
    Ambiguous { best: f32, second: f32 },
    /// Best similarity below the floor.
    NoMatch { best: f32 },
}

/// On-disk embedding store: one row per exemplar, names aligned by index.
#[derive(Deserialize)]
struct EmbeddingStore {
    names: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

pub struct PersonBank {
    entries: Vec<PersonEntry>,
}

impl PersonBank {
    /// Build the bank from raw `(name, embedding)` rows.
    ///
    /// Rows are grouped by name; each exemplar is unit-normalized, the
    /// per-person centroid is the normalized mean of its exemplars.
    pub fn build(names: Vec<String>, embeddings: Vec<Vec<f32>>) -> Result<Self, BankError> {
        if names.len() != embeddings.len() {
            return Err(BankError::LengthMismatch {
                names: names.len(),
                embeddings: embeddings.len(),
            });
        }
        if names.is_empty() {
            return Err(BankError::Empty);
        }

        let dim = embeddings[0].len();
        for row in &embeddings {
            if row.len() != dim {
                return Err(BankError::DimensionMismatch(dim, row.len()));
            }
        }

        let mut grouped: BTreeMap<String, Vec<Embedding>> = BTreeMap::new();
        for (name, row) in names.into_iter().zip(embeddings) {
            grouped
                .entry(name)
                .or_default()
                .push(Embedding::new(row).l2_normalized());
        }

        let entries = grouped
            .into_iter()
            .map(|(name, exemplars)| {
                let mut mean = vec![0.0f32; dim];
                for e in &exemplars {
                    for (m, v) in mean.iter_mut().zip(&e.values) {
                        *m += v;
                    }
                }
                let count = exemplars.len() as f32;
                for m in mean.iter_mut() {
                    *m /= count;
                }
                let centroid = Embedding::new(mean).l2_normalized();
                PersonEntry {
                    name,
                    centroid,
                    exemplars,
                }
            })
            .collect();

        Ok(Self { entries })
    }

    /// Load the bank from a JSON embedding store
    /// (`{"names": [...], "embeddings": [[...]]}`).
    pub fn load_json(path: &Path) -> Result<Self, BankError> {
        if !path.exists() {
            return Err(BankError::StoreNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let store: EmbeddingStore = serde_json::from_str(&raw)?;
        let bank = Self::build(store.names, store.embeddings)?;
        tracing::info!(
            path = %path.display(),
            people = bank.len(),
            "person bank loaded"
        );
        Ok(bank)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Match a probe against every centroid and apply the similarity-margin
    /// rule: accept only when the best similarity reaches `min_similarity`
    /// AND leads the runner-up by at least `min_margin`.
    ///
    /// The probe is expected to be unit-normalized; similarity is then a
    /// plain dot product against the unit centroids. A single-person bank
    /// has no runner-up; its margin is measured against -1.
    pub fn identify(
        &self,
        probe: &Embedding,
        min_similarity: f32,
        min_margin: f32,
    ) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;
        let mut second = -1.0f32;

        for (i, entry) in self.entries.iter().enumerate() {
            let sim = entry.centroid.dot(probe);
            match best {
                Some((_, best_sim)) if sim <= best_sim => second = second.max(sim),
                Some((_, best_sim)) => {
                    second = second.max(best_sim);
                    best = Some((i, sim));
                }
                None => best = Some((i, sim)),
            }
        }

        let Some((idx, best_sim)) = best else {
            return MatchOutcome::NoMatch { best: -1.0 };
        };

        if best_sim < min_similarity {
            return MatchOutcome::NoMatch { best: best_sim };
        }
        let margin = best_sim - second;
        if margin < min_margin {
            return MatchOutcome::Ambiguous {
                best: best_sim,
                second,
            };
        }
        MatchOutcome::Match {
            name: self.entries[idx].name.clone(),
            similarity: best_sim,
            margin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_with(entries: &[(&str, Vec<f32>)]) -> PersonBank {
        let names = entries.iter().map(|(n, _)| n.to_string()).collect();
        let rows = entries.iter().map(|(_, e)| e.clone()).collect();
        PersonBank::build(names, rows).unwrap()
    }

    #[test]
    fn build_groups_exemplars_by_name() {
        let bank = bank_with(&[
            ("alice", vec![1.0, 0.0]),
            ("alice", vec![1.0, 0.1]),
            ("bob", vec![0.0, 1.0]),
        ]);
        assert_eq!(bank.len(), 2);
        let names: Vec<&str> = bank.names().collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn centroid_is_unit_normalized() {
        let bank = bank_with(&[("alice", vec![3.0, 0.0]), ("alice", vec![0.0, 4.0])]);
        let centroid = &bank.entries[0].centroid;
        assert!((centroid.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_store_rejected() {
        assert!(matches!(
            PersonBank::build(vec![], vec![]),
            Err(BankError::Empty)
        ));
    }

    #[test]
    fn mismatched_lengths_rejected() {
        assert!(matches!(
            PersonBank::build(vec!["a".into()], vec![]),
            Err(BankError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn mismatched_dimensions_rejected() {
        let result = PersonBank::build(
            vec!["a".into(), "b".into()],
            vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]],
        );
        assert!(matches!(result, Err(BankError::DimensionMismatch(2, 3))));
    }

    #[test]
    fn clear_margin_is_accepted() {
        // best 0.85 vs second 0.60 at floor 0.72 / margin 0.05 -> accept.
        let bank = bank_with(&[("alice", vec![1.0, 0.0]), ("bob", vec![0.0, 1.0])]);
        let probe = Embedding::new(vec![0.85, 0.60]); // already scaled for dot
        let outcome = bank.identify(&probe, 0.72, 0.05);
        match outcome {
            MatchOutcome::Match { name, similarity, margin } => {
                assert_eq!(name, "alice");
                assert!((similarity - 0.85).abs() < 1e-5);
                assert!((margin - 0.25).abs() < 1e-5);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn thin_margin_is_ambiguous() {
        // best 0.85 vs second 0.84: floor passes, margin 0.01 < 0.05.
        let bank = bank_with(&[("alice", vec![1.0, 0.0]), ("bob", vec![0.0, 1.0])]);
        let probe = Embedding::new(vec![0.85, 0.84]);
        let outcome = bank.identify(&probe, 0.72, 0.05);
        assert!(matches!(outcome, MatchOutcome::Ambiguous { .. }));
    }

    #[test]
    fn below_floor_is_no_match() {
        let bank = bank_with(&[("alice", vec![1.0, 0.0]), ("bob", vec![0.0, 1.0])]);
        let probe = Embedding::new(vec![0.5, 0.1]);
        let outcome = bank.identify(&probe, 0.72, 0.05);
        assert!(matches!(outcome, MatchOutcome::NoMatch { .. }));
    }

    #[test]
    fn single_person_bank_matches_without_runner_up() {
        let bank = bank_with(&[("alice", vec![1.0, 0.0])]);
        let probe = Embedding::new(vec![1.0, 0.0]);
        let outcome = bank.identify(&probe, 0.72, 0.05);
        assert!(matches!(outcome, MatchOutcome::Match { .. }));
    }

    #[test]
    fn load_json_round_trip() {
        let dir = std::env::temp_dir().join("rollcall-bank-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bank.json");
        std::fs::write(
            &path,
            r#"{"names": ["alice", "bob"], "embeddings": [[1.0, 0.0], [0.0, 1.0]]}"#,
        )
        .unwrap();
        let bank = PersonBank::load_json(&path).unwrap();
        assert_eq!(bank.len(), 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_json_missing_file() {
        let result = PersonBank::load_json(Path::new("/nonexistent/bank.json"));
        assert!(matches!(result, Err(BankError::StoreNotFound(_))));
    }
}

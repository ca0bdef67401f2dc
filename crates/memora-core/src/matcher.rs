//! Nearest-neighbour identity lookup.

use crate::types::{Embedding, KnownIdentity};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_TOLERANCE: f32 = 0.4;

/// A registry entry that matched a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMatch {
    /// Position of the matched entry in the registry snapshot.
    pub index: usize,
    pub name: String,
    pub relation: String,
    pub notes: String,
    pub distance: f32,
}

/// Strategy for looking a probe embedding up in a registry snapshot.
pub trait Matcher {
    fn find(&self, probe: &Embedding, gallery: &[KnownIdentity]) -> Option<IdentityMatch>;
}

/// Minimum-Euclidean-distance matcher.
///
/// Reports a match only when the best distance is strictly below
/// `tolerance`. Ties go to the earliest registry entry. Entries whose
/// dimension differs from the probe, or whose distance is not a number,
/// are skipped.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
}

impl EuclideanMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl Matcher for EuclideanMatcher {
    fn find(&self, probe: &Embedding, gallery: &[KnownIdentity]) -> Option<IdentityMatch> {
        let mut best: Option<(usize, f32)> = None;

        for (i, identity) in gallery.iter().enumerate() {
            let Some(distance) = probe.euclidean_distance(&identity.embedding) else {
                tracing::debug!(
                    index = i,
                    probe_dim = probe.dim(),
                    entry_dim = identity.embedding.dim(),
                    "skipping registry entry with mismatched dimension"
                );
                continue;
            };
            if distance.is_nan() {
                continue;
            }
            // Strict comparison keeps the first minimal index.
            let is_better = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if is_better {
                best = Some((i, distance));
            }
        }

        let (index, distance) = best.filter(|&(_, d)| d < self.tolerance)?;
        let identity = &gallery[index];
        Some(IdentityMatch {
            index,
            name: identity.name.clone(),
            relation: identity.relation.clone(),
            notes: identity.notes.clone(),
            distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, values: Vec<f32>) -> KnownIdentity {
        KnownIdentity {
            name: name.into(),
            relation: "Friend".into(),
            notes: String::new(),
            embedding: Embedding::new(values),
            reference_path: None,
        }
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert!(EuclideanMatcher::default().find(&probe, &[]).is_none());
    }

    #[test]
    fn test_match_below_tolerance() {
        let probe = Embedding::new(vec![0.3, 0.0]);
        let gallery = vec![identity("alex", vec![0.0, 0.0])];

        let found = EuclideanMatcher::new(0.4).find(&probe, &gallery).unwrap();
        assert_eq!(found.name, "alex");
        assert_eq!(found.relation, "Friend");
        assert!((found.distance - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_distance_equal_to_tolerance_is_rejected() {
        let probe = Embedding::new(vec![0.5, 0.0]);
        let gallery = vec![identity("alex", vec![0.0, 0.0])];
        assert!(EuclideanMatcher::new(0.5).find(&probe, &gallery).is_none());
    }

    #[test]
    fn test_picks_nearest_entry() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![
            identity("far", vec![0.0, 1.0]),
            identity("near", vec![0.9, 0.0]),
            identity("middle", vec![0.7, 0.0]),
        ];

        let found = EuclideanMatcher::new(0.4).find(&probe, &gallery).unwrap();
        assert_eq!(found.name, "near");
        assert_eq!(found.index, 1);
    }

    #[test]
    fn test_tie_goes_to_first_entry() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            identity("first", vec![0.1, 0.0]),
            identity("second", vec![0.0, 0.1]),
        ];

        let found = EuclideanMatcher::new(0.4).find(&probe, &gallery).unwrap();
        assert_eq!(found.index, 0);
        assert_eq!(found.name, "first");
    }

    #[test]
    fn test_never_reports_distance_at_or_above_tolerance() {
        let gallery: Vec<_> = (0..20)
            .map(|i| identity(&format!("p{i}"), vec![i as f32 * 0.05, 0.0]))
            .collect();
        let matcher = EuclideanMatcher::new(0.2);

        for step in 0..50 {
            let probe = Embedding::new(vec![-1.0 + step as f32 * 0.05, 0.3]);
            if let Some(found) = matcher.find(&probe, &gallery) {
                assert!(found.distance < matcher.tolerance);
            }
        }
    }

    #[test]
    fn test_mismatched_dimension_is_skipped() {
        let probe = Embedding::new(vec![0.1, 0.2, 9.0, 9.0, 9.0]);
        let gallery = vec![
            identity("old", vec![0.1, 0.2]),
            identity("current", vec![0.1, 0.2, 9.0, 9.0, 9.1]),
        ];

        let found = EuclideanMatcher::new(0.4).find(&probe, &gallery).unwrap();
        assert_eq!(found.name, "current");
        assert_eq!(found.index, 1);
        assert!(EuclideanMatcher::new(0.4).find(&probe, &gallery[..1]).is_none());
    }

    #[test]
    fn test_nan_embedding_never_matches() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let broken = vec![identity("broken", vec![f32::NAN, 0.0])];
        assert!(EuclideanMatcher::new(0.4).find(&probe, &broken).is_none());

        let gallery = vec![identity("broken", vec![f32::NAN, 0.0]), identity("alex", vec![0.1, 0.0])];
        assert_eq!(EuclideanMatcher::new(0.4).find(&probe, &gallery).map(|m| m.index), Some(1));

        let nan_probe = Embedding::new(vec![f32::NAN, 0.0]);
        assert!(EuclideanMatcher::new(0.4).find(&nan_probe, &gallery).is_none());
    }
}

//! Gallery matching.
//!
//! Resolves a candidate encoding to the closest known identity, or
//! `Unknown` when no reference is within the acceptance threshold.

use crate::types::{Embedding, Gallery, IdentityMatch};

/// Default maximum Euclidean distance for a positive match.
///
/// Encodings are L2-normalized, so a distance of 1.10 corresponds to a
/// cosine similarity of roughly 0.40.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.10;

/// Strategy for comparing a query encoding against the gallery.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &Gallery, threshold: f32) -> IdentityMatch;
}

/// Minimum-distance matcher.
///
/// Every gallery entry is compared; among the entries within `threshold`
/// the one with the lowest distance wins. Equal distances resolve to the
/// earliest-inserted entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct DistanceMatcher;

impl Matcher for DistanceMatcher {
    fn compare(&self, query: &Embedding, gallery: &Gallery, threshold: f32) -> IdentityMatch {
        let mut best: Option<(usize, f32)> = None;

        for (i, identity) in gallery.identities().iter().enumerate() {
            if identity.encoding.dim() != query.dim() {
                tracing::debug!(
                    name = %identity.name,
                    expected = query.dim(),
                    got = identity.encoding.dim(),
                    "skipping reference with mismatched dimension"
                );
                continue;
            }

            let distance = query.euclidean_distance(&identity.encoding);
            if !distance.is_finite() || distance > threshold {
                continue;
            }

            // Strict `<` keeps the earlier entry on ties.
            let better = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if better {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) => IdentityMatch::Known {
                name: gallery.identities()[idx].name.clone(),
                distance,
            },
            None => IdentityMatch::Unknown,
        }
    }
}

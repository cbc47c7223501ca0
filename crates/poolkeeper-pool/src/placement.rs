//! Destination ranking.

use std::cmp::Ordering;

use poolkeeper_meta::DriveId;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::drive::Drive;

/// How destination drives are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Highest free fraction first.
    #[default]
    MostFree,
    /// Random draw without replacement, weighted by free bytes.
    WeightedRandom,
}

fn most_free_order(a: &Drive, b: &Drive) -> Ordering {
    b.free_fraction()
        .total_cmp(&a.free_fraction())
        .then_with(|| a.id.cmp(&b.id))
}

/// Orders `candidates` for placement. Drives with less than
/// `min_free_bytes` free always come after every other drive.
pub fn rank_destinations<R: Rng + ?Sized>(
    candidates: &[&Drive],
    min_free_bytes: u64,
    policy: PlacementPolicy,
    rng: &mut R,
) -> Vec<DriveId> {
    let (mut roomy, mut tight): (Vec<&Drive>, Vec<&Drive>) = candidates
        .iter()
        .copied()
        .partition(|d| d.free_bytes >= min_free_bytes);
    tight.sort_by(|a, b| most_free_order(a, b));

    let mut ranked = Vec::with_capacity(candidates.len());
    match policy {
        PlacementPolicy::MostFree => {
            roomy.sort_by(|a, b| most_free_order(a, b));
            ranked.extend(roomy.iter().map(|d| d.id.clone()));
        }
        PlacementPolicy::WeightedRandom => {
            // stable starting order so a seeded rng is reproducible
            roomy.sort_by(|a, b| a.id.cmp(&b.id));
            while !roomy.is_empty() {
                let total: u128 = roomy.iter().map(|d| d.free_bytes.max(1) as u128).sum();
                let mut pick = rng.gen_range(0..total);
                let mut chosen = roomy.len() - 1;
                for (i, d) in roomy.iter().enumerate() {
                    let w = d.free_bytes.max(1) as u128;
                    if pick < w {
                        chosen = i;
                        break;
                    }
                    pick -= w;
                }
                ranked.push(roomy.remove(chosen).id.clone());
            }
        }
    }
    ranked.extend(tight.iter().map(|d| d.id.clone()));
    ranked
}

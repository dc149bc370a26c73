//! Utility scoring for target selection.
//!
//! All utilities reward novelty and punish travel cost, and every distance
//! is floored before division so a well-formed utility is always positive.
//! Selection failures are fatal: they mean the caller performed a selection
//! it had no grounds for.

use cachebots_core::{BlockSummary, CacheSummary, PerceivedMap, Vec2};
use ordered_float::OrderedFloat;
use thiserror::Error;

/// Distances shorter than this are floored before division.
const DIST_FLOOR: f64 = 1e-3;

/// Fractions of the robot-to-nest segment probed as new cache sites.
const SITE_FRACTIONS: [f64; 5] = [0.25, 0.375, 0.5, 0.625, 0.75];

/// Utility-selection faults.
#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    /// A selection was performed over no candidates at all.
    #[error("utility selection over an empty candidate list")]
    EmptyCandidates,
    /// Even the best candidate scored non-positive.
    #[error("best candidate utility {utility} is non-positive")]
    NonPositiveUtility { utility: f64 },
}

fn floored(distance: f64) -> f64 {
    distance.max(DIST_FLOOR)
}

/// Scores a prospective new cache site.
///
/// Sites far from every existing cache but close to both the robot and the
/// nest score highest: novelty over travel cost.
#[derive(Debug, Clone, Copy)]
pub struct CacheSiteUtility {
    robot: Vec2,
    nest: Vec2,
}

impl CacheSiteUtility {
    #[must_use]
    pub fn new(robot: Vec2, nest: Vec2) -> Self {
        Self { robot, nest }
    }

    /// Utility of `site` given the nearest existing cache position.
    #[must_use]
    pub fn calc(&self, site: Vec2, nearest_cache: Vec2) -> f64 {
        floored(site.distance(nearest_cache))
            / (floored(site.distance(self.robot)) * floored(site.distance(self.nest)))
    }
}

/// Scores an existing cache as a pickup or deposit target.
///
/// Fuller, fresher caches on short robot-to-cache-to-nest routes win.
#[derive(Debug, Clone, Copy)]
pub struct ExistingCacheUtility {
    robot: Vec2,
    nest: Vec2,
}

impl ExistingCacheUtility {
    #[must_use]
    pub fn new(robot: Vec2, nest: Vec2) -> Self {
        Self { robot, nest }
    }

    /// Utility of a cache at `cache` believed with `density` confidence.
    #[must_use]
    pub fn calc(&self, cache: Vec2, density: f64, blocks: usize) -> f64 {
        (density * blocks as f64)
            / (floored(self.robot.distance(cache)) * floored(cache.distance(self.nest)))
    }
}

/// Picks the strictly greatest-scoring candidate.
///
/// Empty candidate lists and non-positive best scores are invariant
/// violations, not recoverable conditions.
pub fn select_max<T: Copy>(candidates: &[(T, f64)]) -> Result<T, SelectionError> {
    let (choice, utility) = candidates
        .iter()
        .max_by_key(|(_, utility)| OrderedFloat(*utility))
        .ok_or(SelectionError::EmptyCandidates)?;
    if *utility <= 0.0 {
        return Err(SelectionError::NonPositiveUtility { utility: *utility });
    }
    Ok(*choice)
}

/// Best believed block to fetch, by confidence over travel distance.
///
/// `Ok(None)` when no block is believed at all; exploring is the caller's
/// fallback, not an error.
pub fn best_block(
    belief: &PerceivedMap,
    robot: Vec2,
) -> Result<Option<BlockSummary>, SelectionError> {
    let known = belief.known_blocks();
    if known.is_empty() {
        return Ok(None);
    }
    let candidates: Vec<(BlockSummary, f64)> = known
        .iter()
        .map(|block| {
            let utility = block.density / floored(robot.distance(block.summary.position));
            (block.summary, utility)
        })
        .collect();
    select_max(&candidates).map(Some)
}

/// Best believed cache to visit, or `Ok(None)` when none is believed.
pub fn best_cache(
    belief: &PerceivedMap,
    robot: Vec2,
    nest: Vec2,
) -> Result<Option<CacheSummary>, SelectionError> {
    let known = belief.known_caches();
    if known.is_empty() {
        return Ok(None);
    }
    let utility = ExistingCacheUtility::new(robot, nest);
    let candidates: Vec<(CacheSummary, f64)> = known
        .iter()
        .map(|cache| {
            let score = utility.calc(cache.summary.position, cache.density, cache.summary.blocks);
            (cache.summary, score)
        })
        .collect();
    select_max(&candidates).map(Some)
}

/// Best spot to seed a new cache, probing points along the robot-to-nest
/// line. With no caches believed, the nest stands in as the "nearest cache"
/// so early sites still trade novelty off against travel.
pub fn best_cache_site(
    belief: &PerceivedMap,
    robot: Vec2,
    nest: Vec2,
) -> Result<Vec2, SelectionError> {
    let utility = CacheSiteUtility::new(robot, nest);
    let caches = belief.known_caches();
    let mut candidates = Vec::with_capacity(SITE_FRACTIONS.len());
    for fraction in SITE_FRACTIONS {
        let site = robot + (nest - robot) * fraction;
        let nearest = caches
            .iter()
            .map(|cache| cache.summary.position)
            .min_by_key(|position| OrderedFloat(position.distance(site)))
            .unwrap_or(nest);
        candidates.push((site, utility.calc(site, nearest)));
    }
    select_max(&candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachebots_core::{BlockFound, BlockId, CacheFound, CacheId, GridCoord, PerceptionConfig};

    fn block_summary(coord: GridCoord) -> BlockSummary {
        BlockSummary {
            id: BlockId::default(),
            display_id: 0,
            coord,
            position: coord.to_real(0.2),
        }
    }

    fn cache_summary(coord: GridCoord, blocks: usize) -> CacheSummary {
        CacheSummary {
            id: CacheId::default(),
            display_id: 0,
            coord,
            position: coord.to_real(0.2),
            blocks,
        }
    }

    #[test]
    fn selector_picks_the_strictly_greatest_score() {
        let candidates = [("a", 0.2), ("b", 0.5), ("c", 0.1)];
        assert_eq!(select_max(&candidates), Ok("b"));
    }

    #[test]
    fn empty_candidates_are_a_fault() {
        let none: [((), f64); 0] = [];
        assert_eq!(select_max(&none), Err(SelectionError::EmptyCandidates));
    }

    #[test]
    fn non_positive_best_score_is_a_fault() {
        let candidates = [("a", -0.5), ("b", 0.0)];
        assert_eq!(
            select_max(&candidates),
            Err(SelectionError::NonPositiveUtility { utility: 0.0 })
        );
    }

    #[test]
    fn closer_blocks_win_at_equal_confidence() {
        let mut belief = PerceivedMap::new(20, 20, PerceptionConfig::default());
        let near = block_summary(GridCoord::new(2, 2));
        let far = block_summary(GridCoord::new(18, 18));
        BlockFound { summary: near }.apply_to_perceived(&mut belief);
        BlockFound { summary: far }.apply_to_perceived(&mut belief);

        let choice = best_block(&belief, Vec2::new(0.1, 0.1))
            .expect("selection")
            .expect("some block");
        assert_eq!(choice.coord, near.coord);
    }

    #[test]
    fn fuller_caches_win_at_equal_distance() {
        let mut belief = PerceivedMap::new(20, 20, PerceptionConfig::default());
        let small = cache_summary(GridCoord::new(5, 2), 2);
        let big = cache_summary(GridCoord::new(5, 18), 6);
        CacheFound { summary: small }.apply_to_perceived(&mut belief);
        CacheFound { summary: big }.apply_to_perceived(&mut belief);

        // robot and nest sit equidistant from the two caches
        let robot = Vec2::new(1.1, 2.1);
        let nest = Vec2::new(1.1, 2.1);
        let choice = best_cache(&belief, robot, nest)
            .expect("selection")
            .expect("some cache");
        assert_eq!(choice.coord, big.coord);
    }

    #[test]
    fn no_beliefs_mean_no_candidates_not_an_error() {
        let belief = PerceivedMap::new(10, 10, PerceptionConfig::default());
        assert_eq!(best_block(&belief, Vec2::ZERO), Ok(None));
        assert_eq!(best_cache(&belief, Vec2::ZERO, Vec2::ZERO), Ok(None));
    }

    #[test]
    fn cache_sites_steer_away_from_existing_caches() {
        let mut belief = PerceivedMap::new(20, 20, PerceptionConfig::default());
        let robot = Vec2::new(3.6, 0.2);
        let nest = Vec2::new(0.4, 0.2);

        // a cache already sits near the robot end of the segment
        let near_robot = cache_summary(GridCoord::new(15, 1), 2);
        CacheFound { summary: near_robot }.apply_to_perceived(&mut belief);

        let site = best_cache_site(&belief, robot, nest).expect("site");
        let toward_nest = site.distance(nest) < site.distance(robot);
        assert!(
            toward_nest,
            "the chosen site {site} should sit away from the existing cache"
        );
    }
}

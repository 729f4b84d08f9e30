//! Variable-pool sampling.
//!
//! A [`Sampler`] turns the pools attached to a task into a lazy stream of
//! prompt combinations. Every pool owns an independent draw order and draw
//! `i` takes the `i`-th output of every pool, so generation stays linear in
//! the number of prompts instead of expanding the Cartesian product.
//!
//! The whole sampler state is the number of draws consumed per pool
//! ([`SamplerCursor`]). Given the same pools, task seed and cursor the
//! remaining sequence is reproduced exactly.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of items a single pool may hold.
pub const MAX_POOL_ITEMS: usize = 10_000;

/// Maximum length of one pool item.
const MAX_ITEM_LEN: usize = 1_000;

/// Maximum length of a pool name.
const MAX_POOL_NAME_LEN: usize = 64;

/// Upper bound (inclusive) for generated render seeds.
pub const MAX_SEED: i64 = u32::MAX as i64;

/// Odd 64-bit constant used to spread draw indices across the seed space.
const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a pool hands out its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Every item is used at most once, in a seeded shuffled order. The pool
    /// exhausts after `items.len()` draws.
    NoReplacement,
    /// Items cycle in their stored order and never exhaust.
    Permutation,
}

impl SamplingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoReplacement => "no_replacement",
            Self::Permutation => "permutation",
        }
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_replacement" => Ok(Self::NoReplacement),
            "permutation" => Ok(Self::Permutation),
            other => Err(CoreError::Validation(format!(
                "Unknown sampling mode '{other}': expected no_replacement or permutation"
            ))),
        }
    }
}

/// One pool as seen by the sampler.
#[derive(Debug, Clone)]
pub struct PoolSource {
    pub id: DbId,
    /// Slot the pool fills in the workflow template.
    pub name: String,
    pub mode: SamplingMode,
    pub items: Vec<String>,
}

/// Consumed draw count per pool id.
pub type SamplerCursor = BTreeMap<DbId, u64>;

/// Slot name -> chosen item, in pool order.
pub type Combination = IndexMap<String, String>;

/// A combination together with the draw index that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    pub index: u64,
    pub combination: Combination,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a pool name. Pool names double as template slot names, so they
/// are restricted to ASCII letters, digits, underscore and hyphen.
pub fn validate_pool_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Pool name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_POOL_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Pool name must not exceed {MAX_POOL_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::Validation(
            "Pool name may only contain ASCII letters, digits, underscore, or hyphen".to_string(),
        ));
    }
    Ok(())
}

/// Validate the item list of a pool.
///
/// Rules:
/// - At least one item and at most `MAX_POOL_ITEMS`.
/// - No blank items, none longer than `MAX_ITEM_LEN`.
///
/// Duplicate items are allowed; the sampler skips repeated combinations.
pub fn validate_pool_items(items: &[String]) -> Result<(), CoreError> {
    if items.is_empty() {
        return Err(CoreError::Validation(
            "A variable pool must contain at least one item".to_string(),
        ));
    }
    if items.len() > MAX_POOL_ITEMS {
        return Err(CoreError::Validation(format!(
            "A variable pool may hold at most {MAX_POOL_ITEMS} items"
        )));
    }
    for (i, item) in items.iter().enumerate() {
        if item.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Item at index {i} must not be blank"
            )));
        }
        if item.len() > MAX_ITEM_LEN {
            return Err(CoreError::Validation(format!(
                "Item at index {i} exceeds {MAX_ITEM_LEN} characters"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-pool streams
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PoolStream {
    id: DbId,
    name: String,
    mode: SamplingMode,
    items: Vec<String>,
    order: Vec<usize>,
}

impl PoolStream {
    fn new(source: PoolSource, rng_seed: u64) -> Self {
        let mut order: Vec<usize> = (0..source.items.len()).collect();
        if source.mode == SamplingMode::NoReplacement {
            let mut rng = StdRng::seed_from_u64(mix(rng_seed, source.id as u64));
            order.shuffle(&mut rng);
        }
        Self {
            id: source.id,
            name: source.name,
            mode: source.mode,
            items: source.items,
            order,
        }
    }

    /// The item produced by draw `draw`, or `None` once the pool is spent.
    fn item(&self, draw: u64) -> Option<&str> {
        if self.order.is_empty() {
            return None;
        }
        let pos = match self.mode {
            SamplingMode::NoReplacement => {
                usize::try_from(draw).ok().filter(|&i| i < self.order.len())?
            }
            SamplingMode::Permutation => (draw % self.order.len() as u64) as usize,
        };
        Some(&self.items[self.order[pos]])
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Deterministic, resumable combination stream over a task's pools.
#[derive(Debug)]
pub struct Sampler {
    streams: Vec<PoolStream>,
    position: u64,
    /// Item tuples already emitted. Only tracked when at least one pool is
    /// `no_replacement`, which makes the stream finite.
    emitted: Option<HashSet<Vec<String>>>,
}

impl Sampler {
    /// Build a sampler positioned at draw 0.
    pub fn new(sources: Vec<PoolSource>, rng_seed: u64) -> Result<Self, CoreError> {
        if sources.is_empty() {
            return Err(CoreError::Validation(
                "At least one variable pool is required".to_string(),
            ));
        }
        let mut names = HashSet::with_capacity(sources.len());
        for source in &sources {
            if source.items.is_empty() {
                return Err(CoreError::Validation(format!(
                    "Variable pool '{}' has no items",
                    source.name
                )));
            }
            if !names.insert(source.name.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate variable pool name '{}'",
                    source.name
                )));
            }
        }

        let finite = sources
            .iter()
            .any(|s| s.mode == SamplingMode::NoReplacement);
        let streams = sources
            .into_iter()
            .map(|s| PoolStream::new(s, rng_seed))
            .collect();

        Ok(Self {
            streams,
            position: 0,
            emitted: finite.then(HashSet::new),
        })
    }

    /// Rebuild a sampler from a persisted cursor.
    ///
    /// All pools advance together, so the resume position is the smallest
    /// recorded count (a pool missing from the cursor counts as 0). Draws
    /// before that position are replayed to restore the uniqueness set.
    pub fn resume(
        sources: Vec<PoolSource>,
        rng_seed: u64,
        cursor: &SamplerCursor,
    ) -> Result<Self, CoreError> {
        let mut sampler = Self::new(sources, rng_seed)?;
        let target = sampler
            .streams
            .iter()
            .map(|s| cursor.get(&s.id).copied().unwrap_or(0))
            .min()
            .unwrap_or(0);

        while sampler.position < target {
            if sampler.step().is_none() {
                break;
            }
        }
        Ok(sampler)
    }

    /// Number of draws consumed so far (including skipped duplicates).
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Snapshot of the consumed draw count per pool.
    pub fn cursor(&self) -> SamplerCursor {
        self.streams
            .iter()
            .map(|s| (s.id, self.position))
            .collect()
    }

    /// Draw the next unique combination, or `None` once a pool is exhausted.
    pub fn next_draw(&mut self) -> Option<Draw> {
        loop {
            if let Some(draw) = self.step()? {
                return Some(draw);
            }
        }
    }

    /// Draw up to `count` combinations. Fewer are returned when a
    /// `no_replacement` pool runs out; that is a partial result, not an error.
    pub fn next(&mut self, count: usize) -> Vec<Draw> {
        let mut draws = Vec::with_capacity(count.min(MAX_POOL_ITEMS));
        while draws.len() < count {
            match self.next_draw() {
                Some(draw) => draws.push(draw),
                None => break,
            }
        }
        draws
    }

    /// Advance one position. `None` means exhausted, `Some(None)` means the
    /// position produced an already-emitted combination and was skipped.
    fn step(&mut self) -> Option<Option<Draw>> {
        let index = self.position;
        let mut combination = Combination::with_capacity(self.streams.len());
        for stream in &self.streams {
            let item = stream.item(index)?;
            combination.insert(stream.name.clone(), item.to_string());
        }
        self.position += 1;

        if let Some(emitted) = self.emitted.as_mut() {
            let key: Vec<String> = combination.values().cloned().collect();
            if !emitted.insert(key) {
                return Some(None);
            }
        }
        Some(Some(Draw { index, combination }))
    }
}

// ---------------------------------------------------------------------------
// Seeds and previews
// ---------------------------------------------------------------------------

fn mix(seed: u64, salt: u64) -> u64 {
    seed ^ salt.wrapping_add(1).wrapping_mul(SEED_MIX)
}

/// Derive the `count` distinct render seeds for draw `draw_index`.
///
/// Purely a function of its arguments, so a resumed task regenerates the
/// same seeds for the same draw.
pub fn derive_seeds(rng_seed: u64, draw_index: u64, count: usize) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(mix(rng_seed, draw_index));
    let mut seen = HashSet::with_capacity(count);
    let mut seeds = Vec::with_capacity(count);
    while seeds.len() < count {
        let seed = rng.random_range(0..=MAX_SEED);
        if seen.insert(seed) {
            seeds.push(seed);
        }
    }
    seeds
}

/// Pick a fresh task-level RNG seed.
pub fn random_rng_seed() -> i64 {
    rand::rng().random_range(0..i64::MAX)
}

/// Preview the first `count` items a single pool would hand out.
pub fn preview(source: PoolSource, rng_seed: u64, count: usize) -> Result<Vec<String>, CoreError> {
    let name = source.name.clone();
    let mut sampler = Sampler::new(vec![source], rng_seed)?;
    Ok(sampler
        .next(count)
        .into_iter()
        .filter_map(|mut d| d.combination.shift_remove(&name))
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn pool(id: DbId, name: &str, mode: SamplingMode, items: &[&str]) -> PoolSource {
        PoolSource {
            id,
            name: name.to_string(),
            mode,
            items: items.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn items_of(draws: &[Draw], slot: &str) -> Vec<String> {
        draws.iter().map(|d| d.combination[slot].clone()).collect()
    }

    // -- SamplingMode ---------------------------------------------------------

    #[test]
    fn mode_parses_known_values() {
        assert_eq!(
            "no_replacement".parse::<SamplingMode>().unwrap(),
            SamplingMode::NoReplacement
        );
        assert_eq!(
            "permutation".parse::<SamplingMode>().unwrap(),
            SamplingMode::Permutation
        );
    }

    #[test]
    fn mode_rejects_unknown_value() {
        assert_matches!(
            "random".parse::<SamplingMode>(),
            Err(CoreError::Validation(_))
        );
    }

    // -- validation -----------------------------------------------------------

    #[test]
    fn pool_name_rules() {
        assert!(validate_pool_name("colors").is_ok());
        assert!(validate_pool_name("art-style_2").is_ok());
        assert!(validate_pool_name("").is_err());
        assert!(validate_pool_name("two words").is_err());
        assert!(validate_pool_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn pool_items_rules() {
        assert!(validate_pool_items(&["red".to_string()]).is_ok());
        assert!(validate_pool_items(&[]).is_err());
        assert!(validate_pool_items(&["red".to_string(), "  ".to_string()]).is_err());
    }

    // -- no_replacement -------------------------------------------------------

    #[test]
    fn no_replacement_stops_at_pool_size() {
        let mut sampler = Sampler::new(
            vec![pool(1, "colors", SamplingMode::NoReplacement, &["a", "b", "c"])],
            42,
        )
        .unwrap();

        let draws = sampler.next(10);
        assert_eq!(draws.len(), 3);
        assert!(sampler.next_draw().is_none());
        assert_eq!(sampler.position(), 3);

        let mut seen = items_of(&draws, "colors");
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn no_replacement_order_is_seeded() {
        let items = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let first = Sampler::new(vec![pool(1, "x", SamplingMode::NoReplacement, &items)], 7)
            .unwrap()
            .next(8);
        let second = Sampler::new(vec![pool(1, "x", SamplingMode::NoReplacement, &items)], 7)
            .unwrap()
            .next(8);
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_items_are_not_emitted_twice() {
        let mut sampler = Sampler::new(
            vec![pool(1, "x", SamplingMode::NoReplacement, &["a", "a", "b"])],
            3,
        )
        .unwrap();
        let mut seen = items_of(&sampler.next(5), "x");
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);
    }

    // -- permutation ----------------------------------------------------------

    #[test]
    fn permutation_rotates_three_times() {
        let items = ["red", "green", "blue", "white"];
        let mut sampler =
            Sampler::new(vec![pool(1, "colors", SamplingMode::Permutation, &items)], 99).unwrap();

        let drawn = items_of(&sampler.next(items.len() * 3), "colors");
        assert_eq!(drawn.len(), 12);
        for (i, item) in drawn.iter().enumerate() {
            assert_eq!(item, items[i % items.len()]);
        }
        for item in items {
            assert_eq!(drawn.iter().filter(|d| *d == item).count(), 3);
        }
        assert!(sampler.next_draw().is_some());
        assert_eq!(sampler.position(), 13);
    }

    // -- multiple pools -------------------------------------------------------

    #[test]
    fn pools_pair_positionally() {
        let mut sampler = Sampler::new(
            vec![
                pool(1, "subject", SamplingMode::Permutation, &["cat", "dog", "fox"]),
                pool(2, "style", SamplingMode::Permutation, &["oil", "ink"]),
            ],
            1,
        )
        .unwrap();

        let draws = sampler.next(4);
        assert_eq!(items_of(&draws, "subject"), vec!["cat", "dog", "fox", "cat"]);
        assert_eq!(items_of(&draws, "style"), vec!["oil", "ink", "oil", "ink"]);
        let slots: Vec<_> = draws[0].combination.keys().cloned().collect();
        assert_eq!(slots, vec!["subject", "style"]);
    }

    #[test]
    fn mixed_pools_stop_at_shortest_no_replacement_pool() {
        let mut sampler = Sampler::new(
            vec![
                pool(1, "subject", SamplingMode::NoReplacement, &["cat", "dog"]),
                pool(2, "style", SamplingMode::Permutation, &["oil"]),
            ],
            5,
        )
        .unwrap();
        assert_eq!(sampler.next(10).len(), 2);
    }

    #[test]
    fn duplicate_pool_names_are_rejected() {
        let result = Sampler::new(
            vec![
                pool(1, "x", SamplingMode::Permutation, &["a"]),
                pool(2, "x", SamplingMode::Permutation, &["b"]),
            ],
            0,
        );
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn empty_source_list_is_rejected() {
        assert_matches!(Sampler::new(vec![], 0), Err(CoreError::Validation(_)));
    }

    // -- resume ---------------------------------------------------------------

    #[test]
    fn resume_continues_without_gaps_or_repeats() {
        let sources = || {
            vec![
                pool(1, "subject", SamplingMode::NoReplacement, &["a", "b", "c", "d", "e", "f"]),
                pool(2, "style", SamplingMode::Permutation, &["x", "y"]),
            ]
        };

        let full = Sampler::new(sources(), 11).unwrap().next(6);

        let mut first = Sampler::new(sources(), 11).unwrap();
        let head = first.next(2);
        let cursor = first.cursor();
        assert_eq!(cursor.get(&1), Some(&2));

        let mut resumed = Sampler::resume(sources(), 11, &cursor).unwrap();
        let tail = resumed.next(10);

        let mut joined = head;
        joined.extend(tail);
        assert_eq!(joined, full);
    }

    #[test]
    fn resume_keeps_skipping_emitted_duplicates() {
        let sources = || vec![pool(1, "x", SamplingMode::NoReplacement, &["a", "a", "b", "a"])];
        let mut first = Sampler::new(sources(), 2).unwrap();
        let head = first.next(1);
        let mut resumed = Sampler::resume(sources(), 2, &first.cursor()).unwrap();
        let tail = resumed.next(5);

        let mut all = items_of(&head, "x");
        all.extend(items_of(&tail, "x"));
        all.sort();
        assert_eq!(all, vec!["a", "b"]);
    }

    // -- seeds ----------------------------------------------------------------

    #[test]
    fn derived_seeds_are_stable_and_distinct() {
        let a = derive_seeds(123, 4, 8);
        let b = derive_seeds(123, 4, 8);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        let unique: HashSet<_> = a.iter().collect();
        assert_eq!(unique.len(), 8);
        assert!(a.iter().all(|s| (0..=MAX_SEED).contains(s)));
    }

    #[test]
    fn derived_seeds_differ_per_draw() {
        assert_ne!(derive_seeds(123, 0, 4), derive_seeds(123, 1, 4));
    }

    // -- preview --------------------------------------------------------------

    #[test]
    fn preview_matches_sampler_order() {
        let source = pool(9, "x", SamplingMode::Permutation, &["a", "b"]);
        assert_eq!(preview(source, 0, 3).unwrap(), vec!["a", "b", "a"]);
    }
}

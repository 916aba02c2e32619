//! Identifier allocation
//!
//! Ids are six-digit numbers embedded in file names, so there is no central
//! counter: every allocation scans the whole store for ids already in use and
//! picks a free one. File names count as well as document text, so a file
//! whose name and body disagree still blocks its name. Candidates mix the
//! low digits of the clock with a random two-digit salt; after 100 misses a
//! linear scan from 100000 takes over.
//!
//! Uniqueness holds against everything visible at scan time plus everything
//! this allocator has handed out before. Another process allocating at the
//! same moment is not seen.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::context::{type_from_file_name, StoreContext};
use crate::error::StoreError;
use crate::models::IdPrefix;
use crate::storage::Document;

static ANY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(CAP|ENB|FR|NFR)-(\d+)\b").unwrap());

pub const MAX_RANDOM_ATTEMPTS: usize = 100;
pub const LINEAR_SCAN_START: u64 = 100_000;

fn prefix_for(tag: &str) -> Option<IdPrefix> {
    match tag {
        "CAP" => Some(IdPrefix::Capability),
        "ENB" => Some(IdPrefix::Enabler),
        "FR" => Some(IdPrefix::FunctionalRequirement),
        "NFR" => Some(IdPrefix::NonFunctionalRequirement),
        _ => None,
    }
}

/// Numeric parts of every id with `prefix` found in `text`
pub fn ids_in_text(text: &str, prefix: IdPrefix) -> impl Iterator<Item = u64> + '_ {
    ANY_ID.captures_iter(text).filter_map(move |caps| {
        if prefix_for(&caps[1]) == Some(prefix) {
            caps[2].parse().ok()
        } else {
            None
        }
    })
}

/// Number reserved by a file name such as `000123-capability.md`
fn number_in_file_name(path: &Path, prefix: IdPrefix) -> Option<u64> {
    let doc_type = type_from_file_name(path)?;
    if doc_type.id_prefix() != prefix {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(doc_type.file_suffix())?.parse().ok()
}

/// Scans every document under the context roots for ids with `prefix`
pub fn collect_existing_ids(ctx: &StoreContext, prefix: IdPrefix) -> HashSet<u64> {
    let mut existing = HashSet::new();
    for path in ctx.markdown_files() {
        existing.extend(number_in_file_name(&path, prefix));
        match Document::read(&path) {
            Ok(doc) => existing.extend(ids_in_text(&doc.content, prefix)),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping document during id scan"),
        }
    }
    existing
}

/// Picks a number absent from `taken`.
///
/// Never fails: when the random phase is exhausted the linear scan runs
/// upward without bound, so a saturated six-digit space yields a longer id.
pub fn choose_number<R: Rng>(
    taken: &HashSet<u64>,
    prefix: IdPrefix,
    clock_millis: u64,
    rng: &mut R,
) -> u64 {
    for attempt in 0..MAX_RANDOM_ATTEMPTS as u64 {
        let time_part = (clock_millis.wrapping_add(attempt)) % 10_000;
        let salt: u64 = rng.gen_range(0..100);
        let candidate = time_part * 100 + salt;
        if !taken.contains(&candidate) {
            return candidate;
        }
    }

    let exhausted = StoreError::IdExhausted {
        prefix: prefix.to_string(),
        attempts: MAX_RANDOM_ATTEMPTS,
    };
    warn!(error = %exhausted, "Falling back to linear id scan");

    (LINEAR_SCAN_START..)
        .find(|n| !taken.contains(n))
        .unwrap_or(LINEAR_SCAN_START)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Allocates ids, remembering what it has issued
#[derive(Debug, Default)]
pub struct IdAllocator {
    issued: Mutex<HashMap<IdPrefix, HashSet<u64>>>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh id such as `ENB-734512`
    pub fn allocate(&self, ctx: &StoreContext, prefix: IdPrefix) -> String {
        let mut taken = collect_existing_ids(ctx, prefix);
        let mut rng = StdRng::from_entropy();

        let mut issued = match self.issued.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let issued_for_prefix = issued.entry(prefix).or_default();
        taken.extend(issued_for_prefix.iter().copied());

        let number = choose_number(&taken, prefix, now_millis(), &mut rng);
        issued_for_prefix.insert(number);

        let id = prefix.format(number);
        debug!(%id, scanned = taken.len(), "Allocated id");
        id
    }
}

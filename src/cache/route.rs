//! Per-request route caching decision.
//!
//! Every unit of work that runs for a request (handlers, nested renders,
//! data fetches) may propose directives. Each field merges with a
//! commutative rule, so contribution order never matters:
//!
//! - `cacheable`: a single veto is absorbing; nothing re-enables caching.
//! - `tags` and cache-control directives: set union.
//! - `max_age`: the smallest proposal wins.
//!
//! The helper is resolved once, after the handler completes, and discarded.

use std::collections::BTreeSet;
use std::sync::Mutex;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::route";

/// Directives that forbid shared caching of the response.
const VETO_DIRECTIVES: [&str; 2] = ["private", "no-store"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Cacheable {
    #[default]
    Undetermined,
    Yes,
    /// Absorbing.
    Vetoed,
}

impl Cacheable {
    fn combine(self, other: Cacheable) -> Cacheable {
        match (self, other) {
            (Cacheable::Vetoed, _) | (_, Cacheable::Vetoed) => Cacheable::Vetoed,
            (Cacheable::Yes, _) | (_, Cacheable::Yes) => Cacheable::Yes,
            _ => Cacheable::Undetermined,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct RouteCacheState {
    cacheable: Cacheable,
    tags: BTreeSet<String>,
    max_age: Option<u64>,
    cache_control: BTreeSet<String>,
}

/// Outcome of a resolved helper.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteCacheDecision {
    pub should_cache: bool,
    pub tags: BTreeSet<String>,
    pub max_age: Option<u64>,
    pub cache_control: BTreeSet<String>,
}

/// Accumulates caching directives for one in-flight request.
///
/// Shared behind an `Arc` by everything that runs for the request; all
/// mutation goes through an internal lock so concurrent contributors are
/// safe on a multi-threaded runtime.
#[derive(Debug, Default)]
pub struct RouteCacheHelper {
    state: Mutex<RouteCacheState>,
}

impl RouteCacheHelper {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, op: &'static str, f: impl FnOnce(&mut RouteCacheState)) -> &Self {
        f(&mut mutex_lock(&self.state, SOURCE, op));
        self
    }

    /// Mark the response cacheable unless someone already vetoed it.
    pub fn set_cacheable(&self) -> &Self {
        self.update("set_cacheable", |state| {
            state.cacheable = state.cacheable.combine(Cacheable::Yes);
        })
    }

    /// Veto caching for the rest of the request.
    pub fn set_uncacheable(&self) -> &Self {
        self.update("set_uncacheable", |state| {
            state.cacheable = state.cacheable.combine(Cacheable::Vetoed);
        })
    }

    pub fn add_tags<I, S>(&self, tags: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        self.update("add_tags", |state| state.tags.extend(tags))
    }

    /// Propose a max-age; the smallest proposal is kept.
    pub fn set_max_age(&self, seconds: u64) -> &Self {
        self.update("set_max_age", |state| {
            state.max_age = Some(state.max_age.map_or(seconds, |current| current.min(seconds)));
        })
    }

    /// Add cache-control directive tokens such as `public` or `no-store`.
    pub fn add_cache_control<I, S>(&self, directives: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directives: Vec<String> = directives
            .into_iter()
            .map(|directive| directive.into().trim().to_ascii_lowercase())
            .filter(|directive| !directive.is_empty())
            .collect();
        self.update("add_cache_control", |state| {
            state.cache_control.extend(directives)
        })
    }

    /// Produce the decision from the accumulated state. Performs no I/O and
    /// returns the same answer however often it is called.
    pub fn resolve(&self) -> RouteCacheDecision {
        let state = mutex_lock(&self.state, SOURCE, "resolve").clone();
        let vetoed_by_directive = state
            .cache_control
            .iter()
            .any(|directive| VETO_DIRECTIVES.contains(&directive.as_str()));

        RouteCacheDecision {
            should_cache: state.cacheable == Cacheable::Yes && !vetoed_by_directive,
            tags: state.tags,
            max_age: state.max_age,
            cache_control: state.cache_control,
        }
    }
}

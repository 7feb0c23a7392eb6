//! Metric names emitted by the cache layer.

pub const HIT: &str = "multicache_hit_total";
pub const MISS: &str = "multicache_miss_total";
pub const BACKEND_ERROR: &str = "multicache_backend_error_total";
pub const PURGE: &str = "multicache_purge_total";
pub const SWEEP_MS: &str = "multicache_sweep_ms";
pub const ROUTE_WRITE: &str = "multicache_route_write_total";
pub const ROUTE_SKIP: &str = "multicache_route_skip_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    /// Milliseconds.
    Histogram,
}

/// Every metric with its kind and help text, for exporters to describe.
pub const CATALOG: &[(&str, MetricKind, &str)] = &[
    (HIT, MetricKind::Counter, "Cache hits, labelled by cache name."),
    (MISS, MetricKind::Counter, "Cache misses, labelled by cache name."),
    (
        BACKEND_ERROR,
        MetricKind::Counter,
        "Storage backend failures that were swallowed, labelled by cache name.",
    ),
    (PURGE, MetricKind::Counter, "Purge operations, labelled by kind."),
    (
        SWEEP_MS,
        MetricKind::Histogram,
        "Time spent applying due tag invalidations.",
    ),
    (
        ROUTE_WRITE,
        MetricKind::Counter,
        "Responses written to the route cache.",
    ),
    (
        ROUTE_SKIP,
        MetricKind::Counter,
        "Responses not written to the route cache, labelled by reason.",
    ),
];

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn catalog_names_are_unique_and_prefixed() {
        let names: HashSet<_> = CATALOG.iter().map(|(name, _, _)| *name).collect();
        assert_eq!(names.len(), CATALOG.len());
        assert!(names.iter().all(|name| name.starts_with("multicache_")));
    }
}

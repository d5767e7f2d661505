//
// reparse/config.rs
//
// Configuration for incremental reparsing
//

use super::types::Priority;

/// Default capacity of the retired-variant pool
pub const DEFAULT_RETIRED_VARIANT_CAPACITY: usize = 64;

/// Upper bound for the default worker count
const MAX_DEFAULT_WORKERS: usize = 8;

/// Incremental reparse configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReparseConfig {
    /// Number of parser worker threads
    pub worker_count: usize,
    /// Share parsed header variants between inclusion sites with equal
    /// fingerprints. When off, every inclusion context is parsed on its own.
    pub smart_headers: bool,
    /// Reuse a variant that compiled a superset of the requested code when no
    /// exact match exists
    pub reuse_covering_variants: bool,
    /// Variants kept after losing their last context (0 disables the pool)
    pub retired_variant_capacity: usize,
    /// Priority for headers discovered while parsing a translation unit
    pub include_priority: Priority,
    /// Library hops within which consumers of a changed header are reparsed
    /// first, at `Head`. Consumers further away are reparsed at `Tail`.
    pub max_fan_out_depth: usize,
}

impl Default for ReparseConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(1, MAX_DEFAULT_WORKERS);
        Self {
            worker_count,
            smart_headers: true,
            reuse_covering_variants: false,
            retired_variant_capacity: DEFAULT_RETIRED_VARIANT_CAPACITY,
            include_priority: Priority::Head,
            max_fan_out_depth: 1,
        }
    }
}

/// Read the `"reparse"` section of a settings object.
///
/// Returns `None` if the section is absent. Missing or mistyped keys keep
/// their defaults.
pub fn parse_reparse_config(settings: &serde_json::Value) -> Option<ReparseConfig> {
    let reparse = settings.get("reparse")?;

    let mut config = ReparseConfig::default();

    if let Some(v) = reparse.get("workerCount").and_then(|v| v.as_u64()) {
        config.worker_count = (v as usize).max(1);
    }
    if let Some(v) = reparse.get("smartHeaders").and_then(|v| v.as_bool()) {
        config.smart_headers = v;
    }
    if let Some(v) = reparse
        .get("reuseCoveringVariants")
        .and_then(|v| v.as_bool())
    {
        config.reuse_covering_variants = v;
    }
    if let Some(v) = reparse
        .get("retiredVariantCapacity")
        .and_then(|v| v.as_u64())
    {
        config.retired_variant_capacity = v as usize;
    }
    if let Some(v) = reparse.get("includePriority").and_then(|v| v.as_str()) {
        match Priority::parse(v) {
            Some(Priority::Immediate) | None => {
                log::warn!("Ignoring invalid includePriority {:?}", v);
            }
            Some(priority) => config.include_priority = priority,
        }
    }
    if let Some(v) = reparse.get("maxFanOutDepth").and_then(|v| v.as_u64()) {
        config.max_fan_out_depth = v as usize;
    }

    log::info!(
        "Reparse config: workers={}, smart_headers={}, covering={}, retired={}, include_priority={:?}, fan_out_depth={}",
        config.worker_count,
        config.smart_headers,
        config.reuse_covering_variants,
        config.retired_variant_capacity,
        config.include_priority,
        config.max_fan_out_depth
    );

    Some(config)
}

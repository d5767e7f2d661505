//
// reparse/inclusion_cache.rs
//
// Smart header parsing: parsed header variants shared across inclusion sites
//

use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use lru::LruCache;

use super::fingerprint::ConditionalFingerprint;
use super::types::{AstHandle, FileKey, InclusionContext, ProjectId};

/// Process-unique identity of a header variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantId(u64);

static NEXT_VARIANT_ID: AtomicU64 = AtomicU64::new(1);

/// Parsed model of a header for one equivalence class of inclusion contexts.
///
/// Immutable: a fingerprint change produces (or reuses) another variant.
#[derive(Debug, PartialEq, Eq)]
pub struct HeaderModelVariant {
    pub id: VariantId,
    pub header: FileKey,
    pub fingerprint: ConditionalFingerprint,
    pub ast: AstHandle,
}

impl HeaderModelVariant {
    pub fn new(header: FileKey, fingerprint: ConditionalFingerprint, ast: AstHandle) -> Arc<Self> {
        Arc::new(Self {
            id: VariantId(NEXT_VARIANT_ID.fetch_add(1, Ordering::Relaxed)),
            header,
            fingerprint,
            ast,
        })
    }
}

/// Result of [`InclusionCache::record`]
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    /// The variant the context now points at. May be an earlier variant with
    /// the same fingerprint instead of the one passed in.
    pub variant: Arc<HeaderModelVariant>,
    /// True if the passed variant became a new equivalence class
    pub created: bool,
    /// The variant the context pointed at before, if it was a different one
    pub replaced: Option<Arc<HeaderModelVariant>>,
}

/// Result of [`InclusionCache::observe`]
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// Variant that can be shared by the includer; `None` means the header has
    /// to be parsed in this context
    pub variant: Option<Arc<HeaderModelVariant>>,
    /// Contexts of the same project that lost their last includer
    pub dropped: Vec<InclusionContext>,
    /// True if this (project, fingerprint) context did not exist before
    pub is_new_context: bool,
}

/// A context removed by [`InclusionCache::invalidate`], with the translation
/// units it was observed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleInclusion {
    pub context: InclusionContext,
    pub includers: Vec<FileKey>,
}

#[derive(Debug, Default)]
struct ContextSlot {
    variant: Option<Arc<HeaderModelVariant>>,
    includers: BTreeSet<FileKey>,
}

#[derive(Debug, Default)]
struct HeaderEntry {
    /// One variant per equivalence class
    variants: HashMap<ConditionalFingerprint, Arc<HeaderModelVariant>>,
    /// Including project -> fingerprint -> context state
    projects: HashMap<ProjectId, HashMap<ConditionalFingerprint, ContextSlot>>,
}

impl HeaderEntry {
    fn is_empty(&self) -> bool {
        self.variants.is_empty() && self.projects.is_empty()
    }

    /// Remove `includer` from every context of `project` other than `keep`;
    /// returns the contexts that became empty.
    fn detach_includer(
        &mut self,
        project: &ProjectId,
        includer: &FileKey,
        keep: Option<&ConditionalFingerprint>,
    ) -> Vec<InclusionContext> {
        let mut dropped = Vec::new();
        let Some(slots) = self.projects.get_mut(project) else {
            return dropped;
        };
        slots.retain(|fp, slot| {
            if Some(fp) == keep || !slot.includers.remove(includer) {
                return true;
            }
            if slot.includers.is_empty() {
                dropped.push(InclusionContext::new(project.clone(), fp.clone()));
                false
            } else {
                true
            }
        });
        if slots.is_empty() {
            self.projects.remove(project);
        }
        dropped
    }

    /// Move variants no slot points at into the retired pool
    fn sweep(&mut self, header: &FileKey, retired: Option<&RetiredPool>) {
        let referenced: HashSet<VariantId> = self
            .projects
            .values()
            .flat_map(|slots| slots.values())
            .filter_map(|slot| slot.variant.as_ref().map(|v| v.id))
            .collect();
        let mut unreferenced = Vec::new();
        self.variants.retain(|fp, variant| {
            if referenced.contains(&variant.id) {
                true
            } else {
                unreferenced.push((fp.clone(), variant.clone()));
                false
            }
        });
        if unreferenced.is_empty() {
            return;
        }
        log::trace!(
            "Retiring {} unreferenced variants of {}",
            unreferenced.len(),
            header
        );
        if let Some(Ok(mut pool)) = retired.map(|pool| pool.lock()) {
            for (fp, variant) in unreferenced {
                pool.push((header.clone(), fp), variant);
            }
        }
    }
}

type RetiredPool = Mutex<LruCache<(FileKey, ConditionalFingerprint), Arc<HeaderModelVariant>>>;

/// Header-keyed cache of parsed header variants and the inclusion contexts
/// sharing them.
///
/// Each header is its own shard; operations on different headers never
/// contend and there is no cross-header atomicity. When the retired pool is
/// enabled, variants that lose their last context stay revivable until
/// evicted, so an undo that flips macro visibility back does not reparse.
///
/// Lock order: a header shard first, then the retired pool.
pub struct InclusionCache {
    headers: DashMap<FileKey, HeaderEntry>,
    retired: Option<RetiredPool>,
}

impl std::fmt::Debug for InclusionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InclusionCache")
            .field("headers", &self.headers.len())
            .finish_non_exhaustive()
    }
}

impl Default for InclusionCache {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_RETIRED_VARIANT_CAPACITY)
    }
}

impl InclusionCache {
    /// `retired_capacity == 0` disables the retired-variant pool
    pub fn new(retired_capacity: usize) -> Self {
        Self {
            headers: DashMap::new(),
            retired: NonZeroUsize::new(retired_capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Point `context` at `variant`.
    ///
    /// If the header already has a variant with the same fingerprint, that
    /// one is kept and returned; the first variant recorded for a fingerprint
    /// wins.
    pub fn record(
        &self,
        header: &FileKey,
        context: &InclusionContext,
        variant: Arc<HeaderModelVariant>,
    ) -> RecordOutcome {
        let mut entry = self.headers.entry(header.clone()).or_default();

        let existing = entry.variants.get(&variant.fingerprint).cloned();
        let (canonical, created) = match existing {
            Some(existing) => (existing, false),
            None => {
                let revived = self.take_retired(header, &variant.fingerprint);
                let created = revived.is_none();
                let canonical = revived.unwrap_or(variant);
                entry
                    .variants
                    .insert(canonical.fingerprint.clone(), canonical.clone());
                (canonical, created)
            }
        };

        let slot = entry
            .projects
            .entry(context.project.clone())
            .or_default()
            .entry(context.fingerprint.clone())
            .or_default();
        let replaced = match slot.variant.replace(canonical.clone()) {
            Some(old) if old.id != canonical.id => Some(old),
            _ => None,
        };

        if replaced.is_some() {
            entry.sweep(header, self.retired.as_ref());
        }

        log::trace!(
            "Recorded variant {:?} of {} for context {} (created: {})",
            canonical.id,
            header,
            context,
            created
        );

        RecordOutcome {
            variant: canonical,
            created,
            replaced,
        }
    }

    /// Variant reusable for `context`: any variant of the header with an equal
    /// fingerprint, whichever project it was parsed for.
    pub fn lookup(
        &self,
        header: &FileKey,
        context: &InclusionContext,
    ) -> Option<Arc<HeaderModelVariant>> {
        self.lookup_fingerprint(header, &context.fingerprint)
    }

    pub fn lookup_fingerprint(
        &self,
        header: &FileKey,
        fingerprint: &ConditionalFingerprint,
    ) -> Option<Arc<HeaderModelVariant>> {
        if let Some(entry) = self.headers.get(header) {
            if let Some(variant) = entry.variants.get(fingerprint) {
                return Some(variant.clone());
            }
        }
        let pool = self.retired.as_ref()?.lock().ok()?;
        let retired = pool.peek(&(header.clone(), fingerprint.clone())).cloned();
        retired
    }

    /// Live variant that compiled at least everything `fingerprint` would.
    ///
    /// Among several candidates the one excluding the most bytes wins, being
    /// the closest to the requested configuration.
    pub fn lookup_covering(
        &self,
        header: &FileKey,
        fingerprint: &ConditionalFingerprint,
    ) -> Option<Arc<HeaderModelVariant>> {
        let entry = self.headers.get(header)?;
        let covering = entry
            .variants
            .values()
            .filter(|v| v.fingerprint.is_better_or_equal(fingerprint))
            .max_by_key(|v| (v.fingerprint.excluded_len(), std::cmp::Reverse(v.id)))
            .cloned();
        covering
    }

    /// Register that `includer` saw `header` under `context`.
    ///
    /// The includer is moved out of any other context of the same project.
    /// On a hit the context is attached to the shared variant, reviving a
    /// retired one if needed.
    pub fn observe(
        &self,
        header: &FileKey,
        context: &InclusionContext,
        includer: &FileKey,
    ) -> Observation {
        let mut entry = self.headers.entry(header.clone()).or_default();

        let dropped = entry.detach_includer(&context.project, includer, Some(&context.fingerprint));

        let mut variant = entry.variants.get(&context.fingerprint).cloned();
        if variant.is_none() {
            if let Some(revived) = self.take_retired(header, &context.fingerprint) {
                log::trace!("Revived retired variant {:?} of {}", revived.id, header);
                entry
                    .variants
                    .insert(revived.fingerprint.clone(), revived.clone());
                variant = Some(revived);
            }
        }

        let slots = entry.projects.entry(context.project.clone()).or_default();
        let is_new_context = !slots.contains_key(&context.fingerprint);
        let slot = slots.entry(context.fingerprint.clone()).or_default();
        slot.includers.insert(includer.clone());
        if let Some(variant) = &variant {
            slot.variant = Some(variant.clone());
        } else {
            variant = slot.variant.clone();
        }

        if !dropped.is_empty() {
            entry.sweep(header, self.retired.as_ref());
        }

        Observation {
            variant,
            dropped,
            is_new_context,
        }
    }

    /// `includer` no longer includes `header`. Returns contexts that lost
    /// their last includer.
    pub fn forget_includer(
        &self,
        header: &FileKey,
        project: &ProjectId,
        includer: &FileKey,
    ) -> Vec<InclusionContext> {
        let Some(mut entry) = self.headers.get_mut(header) else {
            return Vec::new();
        };
        let dropped = entry.detach_includer(project, includer, None);
        if !dropped.is_empty() {
            entry.sweep(header, self.retired.as_ref());
        }
        let now_empty = entry.is_empty();
        drop(entry);
        if now_empty {
            self.headers.remove_if(header, |_, e| e.is_empty());
        }
        dropped
    }

    pub fn has_context(&self, header: &FileKey, context: &InclusionContext) -> bool {
        self.headers.get(header).is_some_and(|entry| {
            entry
                .projects
                .get(&context.project)
                .is_some_and(|slots| slots.contains_key(&context.fingerprint))
        })
    }

    pub fn includers_of(&self, header: &FileKey, context: &InclusionContext) -> Vec<FileKey> {
        self.headers
            .get(header)
            .and_then(|entry| {
                entry
                    .projects
                    .get(&context.project)?
                    .get(&context.fingerprint)
                    .map(|slot| slot.includers.iter().cloned().collect())
            })
            .unwrap_or_default()
    }

    pub fn included_contexts_of(
        &self,
        header: &FileKey,
    ) -> HashMap<ProjectId, HashSet<InclusionContext>> {
        let Some(entry) = self.headers.get(header) else {
            return HashMap::new();
        };
        entry
            .projects
            .iter()
            .map(|(project, slots)| {
                let contexts: HashSet<_> = slots
                    .keys()
                    .map(|fp| InclusionContext::new(project.clone(), fp.clone()))
                    .collect();
                (project.clone(), contexts)
            })
            .collect()
    }

    /// Contexts of `header` still waiting for a variant
    pub fn pending_contexts(&self, header: &FileKey) -> Vec<InclusionContext> {
        let Some(entry) = self.headers.get(header) else {
            return Vec::new();
        };
        let mut pending: Vec<_> = entry
            .projects
            .iter()
            .flat_map(|(project, slots)| {
                slots
                    .iter()
                    .filter(|(_, slot)| slot.variant.is_none())
                    .map(move |(fp, _)| InclusionContext::new(project.clone(), fp.clone()))
            })
            .collect();
        pending.sort();
        pending
    }

    /// The header's text changed: drop every context and variant, live or
    /// retired, and return the removed contexts sorted by (project,
    /// fingerprint).
    pub fn invalidate(&self, header: &FileKey) -> Vec<StaleInclusion> {
        let removed = self.headers.remove(header);
        self.purge_retired(|(key, _)| key == header);

        let Some((_, entry)) = removed else {
            return Vec::new();
        };
        let mut stale: Vec<StaleInclusion> = entry
            .projects
            .into_iter()
            .flat_map(|(project, slots)| {
                slots.into_iter().map(move |(fp, slot)| StaleInclusion {
                    context: InclusionContext::new(project.clone(), fp),
                    includers: slot.includers.into_iter().collect(),
                })
            })
            .collect();
        stale.sort_by(|a, b| a.context.cmp(&b.context));

        log::debug!(
            "Invalidated {} ({} variants, {} contexts)",
            header,
            entry.variants.len(),
            stale.len()
        );
        stale
    }

    /// Forget a closed project: headers it owns and every context it
    /// contributed to other projects' headers.
    pub fn remove_project(&self, project: &ProjectId) {
        let retired = self.retired.as_ref();
        self.headers.retain(|header, entry| {
            if &header.project == project {
                return false;
            }
            if entry.projects.remove(project).is_some() {
                entry.sweep(header, retired);
            }
            !entry.is_empty()
        });
        self.purge_retired(|(key, _)| &key.project == project);
        log::debug!("Removed project {} from inclusion cache", project);
    }

    /// Number of live variants of `header`
    pub fn variant_count(&self, header: &FileKey) -> usize {
        self.headers
            .get(header)
            .map(|entry| entry.variants.len())
            .unwrap_or(0)
    }

    /// Number of inclusion sites, over all projects, sharing the variant
    /// with `fingerprint`
    pub fn sharing_count(&self, header: &FileKey, fingerprint: &ConditionalFingerprint) -> usize {
        self.headers
            .get(header)
            .map(|entry| {
                entry
                    .projects
                    .values()
                    .flat_map(|slots| slots.values())
                    .filter(|slot| {
                        slot.variant
                            .as_ref()
                            .is_some_and(|v| &v.fingerprint == fingerprint)
                    })
                    .map(|slot| slot.includers.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn headers(&self) -> Vec<FileKey> {
        let mut headers: Vec<_> = self.headers.iter().map(|e| e.key().clone()).collect();
        headers.sort();
        headers
    }

    pub fn retired_len(&self) -> usize {
        self.retired
            .as_ref()
            .and_then(|pool| pool.lock().ok().map(|p| p.len()))
            .unwrap_or(0)
    }

    fn take_retired(
        &self,
        header: &FileKey,
        fingerprint: &ConditionalFingerprint,
    ) -> Option<Arc<HeaderModelVariant>> {
        let mut pool = self.retired.as_ref()?.lock().ok()?;
        pool.pop(&(header.clone(), fingerprint.clone()))
    }

    fn purge_retired(&self, matches: impl Fn(&(FileKey, ConditionalFingerprint)) -> bool) {
        let Some(Ok(mut pool)) = self.retired.as_ref().map(|pool| pool.lock()) else {
            return;
        };
        let doomed: Vec<_> = pool
            .iter()
            .filter(|(key, _)| matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            pool.pop(&key);
        }
    }
}

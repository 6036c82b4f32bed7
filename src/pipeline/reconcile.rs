//! Reconciliation: per-page fragments → one record per borehole.
//!
//! Each page yields two independent fragments (soil and sample). A single
//! physical borehole usually spans several pages, so fragments are first
//! grouped by the hole number the model reported, then every soil layer is
//! joined to the samples whose depth falls inside the layer's depth range.
//!
//! ```text
//! soil fragments ──group_by_borehole──▶ hole → (metadata, layers) ──┐
//!                                                                    ├─ join ─▶ Vec<Borehole>
//! sample fragments ─group_by_borehole─▶ hole → (metadata, samples) ─┘
//!                         └─ sort_samples (by number suffix)
//! ```
//!
//! Reconciliation is pure and synchronous. Malformed input never raises:
//! every oddity has an in-band fallback and is reported as a
//! [`ReconciliationAnomaly`].

use crate::config::IdentifierPolicy;
use crate::output::{Borehole, LayerWithSamples};
use crate::schema::{Metadata, PageExtraction, SampleRecord, SoilLayer};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

static RE_DEPTH_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d*)?|\.\d+)\s*[~～]\s*(\d+(?:\.\d*)?|\.\d+)\s*m?\s*$").unwrap()
});

static RE_SAMPLE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\D+?)\s*(\d+)\s*$").unwrap());

// ── Depth ranges ─────────────────────────────────────────────────────────

/// Inclusive depth interval in meters, `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthRange {
    pub min: f64,
    pub max: f64,
}

impl DepthRange {
    /// Inclusive on both ends.
    pub fn contains(&self, depth: f64) -> bool {
        self.min <= depth && depth <= self.max
    }
}

/// Parse `"<number>~<number>"` with an optional trailing `m`.
///
/// Whitespace around either number is ignored and the full-width tilde
/// `～` is accepted. Returns `None` for anything else, including reversed
/// ranges such as `"5~3"`.
pub fn parse_depth_range(text: &str) -> Option<DepthRange> {
    let caps = RE_DEPTH_RANGE.captures(text)?;
    let min = caps[1].parse::<f64>().ok()?;
    let max = caps[2].parse::<f64>().ok()?;
    (min <= max).then_some(DepthRange { min, max })
}

// ── Anomalies ────────────────────────────────────────────────────────────

/// A soft reconciliation problem. Never fatal; each has a defined fallback.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconciliationAnomaly {
    /// The layer matches no samples.
    #[error("{hole_no}: layer {layer_index} has unparseable depth range '{depth_range}'")]
    UnparseableDepthRange {
        hole_no: String,
        layer_index: usize,
        depth_range: String,
    },

    /// Sorting was skipped; samples keep arrival order.
    #[error("{hole_no}: sample number '{sample_number}' has no numeric suffix, samples left unsorted")]
    UnsortableSamples {
        hole_no: String,
        sample_number: String,
    },

    /// Samples were extracted for a hole with no soil data; they are dropped.
    #[error("{hole_no}: {samples} samples but no soil layers, borehole dropped")]
    SampleOnlyBorehole { hole_no: String, samples: usize },

    /// The hole has soil layers but no sample fragment; layers get no samples.
    #[error("{hole_no}: soil layers but no sample data")]
    SoilOnlyBorehole { hole_no: String },
}

// ── Grouping ─────────────────────────────────────────────────────────────

/// Everything extracted for one identifier on one side of the join.
#[derive(Debug, Clone, PartialEq)]
pub struct BoreholeGroup<T> {
    /// Grouping key (the identifier under the active [`IdentifierPolicy`]).
    pub hole_no: String,
    /// Metadata of the first fragment seen for this identifier.
    pub metadata: Metadata,
    /// Items of every fragment for this identifier, in arrival order.
    pub items: Vec<T>,
    /// Pages that contributed, in arrival order.
    pub pages: Vec<usize>,
}

/// Identifier → group, iterated in first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoreholeGroups<T> {
    groups: Vec<BoreholeGroup<T>>,
    index: HashMap<String, usize>,
}

impl<T> BoreholeGroups<T> {
    pub fn get(&self, hole_no: &str) -> Option<&BoreholeGroup<T>> {
        self.index.get(hole_no).map(|&i| &self.groups[i])
    }

    pub fn contains(&self, hole_no: &str) -> bool {
        self.index.contains_key(hole_no)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoreholeGroup<T>> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Group same-kind fragments by borehole identifier.
///
/// The first fragment for an identifier fixes its metadata; later fragments
/// only contribute items. Metadata is never merged field by field.
pub fn group_by_borehole<T: Clone>(
    fragments: &[PageExtraction<T>],
    policy: IdentifierPolicy,
) -> BoreholeGroups<T> {
    let mut groups: Vec<BoreholeGroup<T>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for fragment in fragments {
        let key = policy.key(&fragment.hole_no);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(BoreholeGroup {
                hole_no: key,
                metadata: fragment.metadata.clone(),
                items: Vec::new(),
                pages: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.items.extend(fragment.items.iter().cloned());
        group.pages.push(fragment.page_num);
    }

    BoreholeGroups { groups, index }
}

// ── Sample ordering ──────────────────────────────────────────────────────

fn sample_suffix(sample_number: &str) -> Option<u64> {
    RE_SAMPLE_NUMBER
        .captures(sample_number)
        .and_then(|caps| caps[2].parse::<u64>().ok())
}

/// Sort samples ascending by the integer suffix of their sample number.
///
/// All-or-nothing: if any number lacks a `<prefix><integer>` shape the slice
/// is left untouched and the offending number is returned. Equal suffixes
/// keep their relative order.
pub fn sort_samples(samples: &mut [SampleRecord]) -> Result<(), String> {
    if let Some(bad) = samples
        .iter()
        .find(|s| sample_suffix(&s.sample_number).is_none())
    {
        return Err(bad.sample_number.clone());
    }
    samples.sort_by_key(|s| sample_suffix(&s.sample_number).unwrap_or(u64::MAX));
    Ok(())
}

// ── Join ─────────────────────────────────────────────────────────────────

/// Depth-sorted view over a sample list for range lookups.
struct DepthIndex {
    order: Vec<usize>,
    depths: Vec<f64>,
}

impl DepthIndex {
    fn new(samples: &[SampleRecord]) -> Self {
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.sort_by(|&a, &b| samples[a].depth.total_cmp(&samples[b].depth));
        let depths = order.iter().map(|&i| samples[i].depth).collect();
        Self { order, depths }
    }

    /// Positions of samples inside `range`, in sample-list order.
    fn matching(&self, range: DepthRange) -> Vec<usize> {
        let lo = self.depths.partition_point(|&d| d < range.min);
        let hi = self.depths.partition_point(|&d| d <= range.max);
        let mut hits = self.order[lo..hi.max(lo)].to_vec();
        hits.sort_unstable();
        hits
    }
}

/// Attach samples to every soil layer of every soil-side borehole.
///
/// Only identifiers present on the soil side produce a [`Borehole`]. A
/// sample may land in several layers when ranges share a boundary.
pub fn join(
    soil: &BoreholeGroups<SoilLayer>,
    samples: &BoreholeGroups<SampleRecord>,
    source: &str,
) -> (Vec<Borehole>, Vec<ReconciliationAnomaly>) {
    let mut boreholes = Vec::with_capacity(soil.len());
    let mut anomalies = Vec::new();

    for group in soil.iter() {
        let hole_samples: Vec<SampleRecord> = match samples.get(&group.hole_no) {
            Some(s) => s.items.clone(),
            None => {
                warn!("{}: no sample data for borehole", group.hole_no);
                anomalies.push(ReconciliationAnomaly::SoilOnlyBorehole {
                    hole_no: group.hole_no.clone(),
                });
                Vec::new()
            }
        };
        let index = DepthIndex::new(&hole_samples);

        let soil_data = group
            .items
            .iter()
            .enumerate()
            .map(|(layer_index, layer)| {
                let depth = parse_depth_range(&layer.depth_range);
                let matched = match depth {
                    Some(range) => index
                        .matching(range)
                        .into_iter()
                        .map(|i| hole_samples[i].clone())
                        .collect(),
                    None => {
                        warn!(
                            "{}: unparseable depth range '{}' on layer {}",
                            group.hole_no, layer.depth_range, layer_index
                        );
                        anomalies.push(ReconciliationAnomaly::UnparseableDepthRange {
                            hole_no: group.hole_no.clone(),
                            layer_index,
                            depth_range: layer.depth_range.clone(),
                        });
                        Vec::new()
                    }
                };
                LayerWithSamples {
                    layer: layer.clone(),
                    depth,
                    samples: matched,
                }
            })
            .collect();

        boreholes.push(Borehole {
            hole_no: group.hole_no.clone(),
            metadata: group.metadata.clone(),
            soil_data,
            sample_data: hole_samples,
            pages: group.pages.clone(),
            source: source.to_string(),
        });
    }

    for group in samples.iter().filter(|g| !soil.contains(&g.hole_no)) {
        warn!(
            "{}: {} samples without soil layers, dropping",
            group.hole_no,
            group.items.len()
        );
        anomalies.push(ReconciliationAnomaly::SampleOnlyBorehole {
            hole_no: group.hole_no.clone(),
            samples: group.items.len(),
        });
    }

    (boreholes, anomalies)
}

// ── Entry point ──────────────────────────────────────────────────────────

/// Result of reconciling one document's fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub boreholes: Vec<Borehole>,
    /// First-seen sample-side metadata per identifier. The joined boreholes
    /// carry soil-side metadata only.
    pub sample_metadata: BTreeMap<String, Metadata>,
    pub anomalies: Vec<ReconciliationAnomaly>,
}

/// Group both sides, order samples, and join.
pub fn reconcile(
    soil: &[PageExtraction<SoilLayer>],
    samples: &[PageExtraction<SampleRecord>],
    policy: IdentifierPolicy,
    source: &str,
) -> Reconciliation {
    debug!(
        "Reconciling {} soil and {} sample fragments from {}",
        soil.len(),
        samples.len(),
        source
    );

    let soil_groups = group_by_borehole(soil, policy);
    let mut sample_groups = group_by_borehole(samples, policy);
    let mut anomalies = Vec::new();

    for group in sample_groups.groups.iter_mut() {
        if let Err(sample_number) = sort_samples(&mut group.items) {
            warn!(
                "{}: cannot sort samples, '{}' has no numeric suffix",
                group.hole_no, sample_number
            );
            anomalies.push(ReconciliationAnomaly::UnsortableSamples {
                hole_no: group.hole_no.clone(),
                sample_number,
            });
        }
    }

    let (boreholes, join_anomalies) = join(&soil_groups, &sample_groups, source);
    anomalies.extend(join_anomalies);

    let sample_metadata = sample_groups
        .iter()
        .map(|g| (g.hole_no.clone(), g.metadata.clone()))
        .collect();

    Reconciliation {
        boreholes,
        sample_metadata,
        anomalies,
    }
}

// ============================================================================
// SERIES MODEL
// ============================================================================
// The inbound contract from the collector: one metric time series with its
// stable identity, its label set and the metadata describing how it was
// produced. Everything downstream (matching, autogen, caching) reads series
// through the types defined here.
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use crate::selector::Tags;

// ----------------------------------------------------------------------------
// Series Identity
// ----------------------------------------------------------------------------

/// Stable identity of one metric time series (metric name + full label set).
///
/// Two series with equal names and label sets always produce equal `id` and
/// `hash64` values, regardless of the order the labels were supplied in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesIdentity {
    /// Canonical textual form: `name{k1="v1",k2="v2"}` with sorted keys
    pub id: CompactString,
    /// xxh3 hash of the length-prefixed name, keys and values
    pub hash64: u64,
}

impl SeriesIdentity {
    /// Create an identity from precomputed parts
    pub fn new(id: impl Into<CompactString>, hash64: u64) -> Self {
        Self {
            id: id.into(),
            hash64,
        }
    }

    /// Compute the identity of a metric name and label set
    pub fn compute(name: &str, labels: &LabelSet) -> Self {
        let mut hasher = Xxh3::new();
        hash_field(&mut hasher, name);

        let mut id = CompactString::from(name);
        id.push('{');
        for (i, label) in labels.iter().enumerate() {
            hash_field(&mut hasher, &label.key);
            hash_field(&mut hasher, &label.value);

            if i > 0 {
                id.push(',');
            }
            id.push_str(&label.key);
            id.push_str("=\"");
            push_escaped(&mut id, &label.value);
            id.push('"');
        }
        id.push('}');

        Self {
            id,
            hash64: hasher.digest(),
        }
    }
}

/// Hash one field with a length prefix.
fn hash_field(hasher: &mut Xxh3, field: &str) {
    hasher.update(&(field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

fn push_escaped(id: &mut CompactString, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => id.push_str("\\\\"),
            '"' => id.push_str("\\\""),
            '\n' => id.push_str("\\n"),
            _ => id.push(c),
        }
    }
}

impl Display for SeriesIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

// ----------------------------------------------------------------------------
// Labels
// ----------------------------------------------------------------------------

/// A single label (key-value pair) of a series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: CompactString,
    pub value: CompactString,
}

impl Label {
    /// Create a new label
    #[inline]
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<CompactString>,
        V: Into<CompactString>,
    {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Stack-allocated label storage; most series carry fewer than 8 labels.
pub type Labels = SmallVec<[Label; 8]>;

/// Read-only accessor over a series' labels.
///
/// Keys are unique. Iteration order is not semantically meaningful; callers
/// that need determinism sort the keys themselves.
pub trait LabelView {
    /// Point lookup by key
    fn get(&self, key: &str) -> Option<&str>;

    /// Visit every label until the visitor returns `false`
    fn for_each_label(&self, visit: &mut dyn FnMut(&str, &str) -> bool);

    /// Number of labels
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Label set kept sorted by key with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct LabelSet {
    labels: Labels,
}

impl LabelSet {
    /// Create an empty label set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a label set from key-value pairs; a repeated key keeps the last value
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<CompactString>,
        V: Into<CompactString>,
    {
        let mut set = Self::new();
        for (key, value) in pairs {
            set.insert(key, value);
        }
        set
    }

    /// Insert or replace a label, keeping key order
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<CompactString>,
        V: Into<CompactString>,
    {
        let label = Label::new(key, value);
        match self
            .labels
            .binary_search_by(|l| l.key.as_str().cmp(label.key.as_str()))
        {
            Ok(pos) => self.labels[pos] = label,
            Err(pos) => self.labels.insert(pos, label),
        }
    }

    /// Iterate labels in key order
    pub fn iter(&self) -> impl Iterator<Item = &Label> + '_ {
        self.labels.iter()
    }

    /// Labels excluding the given keys, in key order
    pub fn without<'a>(&'a self, excluded: &'a [&'a str]) -> impl Iterator<Item = &'a Label> + 'a {
        self.labels
            .iter()
            .filter(move |l| !excluded.contains(&l.key.as_str()))
    }
}

impl LabelView for LabelSet {
    fn get(&self, key: &str) -> Option<&str> {
        self.labels
            .binary_search_by(|l| l.key.as_str().cmp(key))
            .ok()
            .map(|pos| self.labels[pos].value.as_str())
    }

    fn for_each_label(&self, visit: &mut dyn FnMut(&str, &str) -> bool) {
        for label in &self.labels {
            if !visit(&label.key, &label.value) {
                return;
            }
        }
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}

impl LabelView for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        BTreeMap::get(self, key).map(String::as_str)
    }

    fn for_each_label(&self, visit: &mut dyn FnMut(&str, &str) -> bool) {
        for (key, value) in self {
            if !visit(key, value) {
                return;
            }
        }
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self::from_pairs(map)
    }
}

impl From<LabelSet> for BTreeMap<String, String> {
    fn from(set: LabelSet) -> Self {
        set.labels
            .into_iter()
            .map(|l| (l.key.to_string(), l.value.to_string()))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<CompactString>,
    V: Into<CompactString>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

// ----------------------------------------------------------------------------
// Series Metadata
// ----------------------------------------------------------------------------

/// Kind of the metric a series was produced from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    #[default]
    Unknown,
    Counter,
    Gauge,
    Histogram,
    Summary,
    StateSet,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Unknown => "unknown",
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::StateSet => "stateset",
        }
    }
}

/// How a multi-value metric was flattened into this scalar series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenRole {
    #[default]
    None,
    HistogramBucket,
    HistogramSum,
    HistogramCount,
    SummaryQuantile,
    SummarySum,
    SummaryCount,
    StateSetState,
}

/// Classifies a series; drives autogen algorithm and unit selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesMeta {
    #[serde(default)]
    pub kind: MetricKind,
    #[serde(default)]
    pub flatten_role: FlattenRole,
}

impl SeriesMeta {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            flatten_role: FlattenRole::None,
        }
    }

    pub fn counter() -> Self {
        Self::new(MetricKind::Counter)
    }

    pub fn gauge() -> Self {
        Self::new(MetricKind::Gauge)
    }

    pub fn flattened(kind: MetricKind, flatten_role: FlattenRole) -> Self {
        Self { kind, flatten_role }
    }
}

// ----------------------------------------------------------------------------
// Series
// ----------------------------------------------------------------------------

/// One series as supplied to the engine for a collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SeriesRecord", into = "SeriesRecord")]
pub struct Series {
    pub name: CompactString,
    pub identity: SeriesIdentity,
    pub labels: LabelSet,
    pub meta: SeriesMeta,
    /// Build sequence in which the collector last wrote this series, if known
    pub seen_seq: Option<u64>,
}

impl Series {
    /// Create a series, computing its identity from name and labels
    pub fn new(name: impl Into<CompactString>, labels: LabelSet, meta: SeriesMeta) -> Self {
        let name = name.into();
        let identity = SeriesIdentity::compute(&name, &labels);
        Self {
            name,
            identity,
            labels,
            meta,
            seen_seq: None,
        }
    }

    /// Builder: set the build sequence the series was last written in
    #[inline]
    pub fn with_seen_seq(mut self, seq: u64) -> Self {
        self.seen_seq = Some(seq);
        self
    }

    /// Tag set used by selectors: the metric name, every label key and
    /// every `key=value` pair.
    pub fn tags(&self) -> Tags {
        let mut tags = Tags::with_capacity(1 + self.labels.len() * 2);
        tags.insert(self.name.as_str());
        for label in self.labels.iter() {
            tags.insert(label.key.as_str());
            tags.insert(label.to_string());
        }
        tags
    }
}

impl Display for Series {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)
    }
}

/// Serialized form of a series; the identity is derived, never trusted from input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub kind: MetricKind,
    #[serde(default)]
    pub flatten_role: FlattenRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_seq: Option<u64>,
}

impl From<SeriesRecord> for Series {
    fn from(record: SeriesRecord) -> Self {
        let series = Series::new(
            record.name,
            LabelSet::from(record.labels),
            SeriesMeta::flattened(record.kind, record.flatten_role),
        );
        match record.seen_seq {
            Some(seq) => series.with_seen_seq(seq),
            None => series,
        }
    }
}

impl From<Series> for SeriesRecord {
    fn from(series: Series) -> Self {
        Self {
            name: series.name.to_string(),
            labels: series.labels.into(),
            kind: series.meta.kind,
            flatten_role: series.meta.flatten_role,
            seen_seq: series.seen_seq,
        }
    }
}

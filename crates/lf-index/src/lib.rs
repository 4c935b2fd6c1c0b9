#![forbid(unsafe_code)]

use std::cell::OnceCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A row or column label.
///
/// Labels are totally ordered: every `Int64` label sorts before every `Utf8`
/// label, and each kind sorts by its natural order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexLabel {
    Int64(i64),
    Utf8(String),
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

/// Ordered sequence of labels.
///
/// Duplicate and sortedness checks are computed lazily and cached; equality
/// only looks at the labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<IndexLabel>,
    #[serde(skip)]
    duplicate_cache: OnceCell<bool>,
    #[serde(skip)]
    sorted_cache: OnceCell<bool>,
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

impl Eq for Index {}

impl FromIterator<IndexLabel> for Index {
    fn from_iter<T: IntoIterator<Item = IndexLabel>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

fn detect_duplicates(labels: &[IndexLabel]) -> bool {
    let mut seen = HashMap::<&IndexLabel, ()>::with_capacity(labels.len());
    labels.iter().any(|label| seen.insert(label, ()).is_some())
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<IndexLabel>) -> Self {
        Self {
            labels,
            duplicate_cache: OnceCell::new(),
            sorted_cache: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn from_i64(values: Vec<i64>) -> Self {
        values.into_iter().map(IndexLabel::from).collect()
    }

    #[must_use]
    pub fn from_utf8<S: Into<String>>(values: Vec<S>) -> Self {
        values
            .into_iter()
            .map(|value| IndexLabel::Utf8(value.into()))
            .collect()
    }

    /// `0..len` as `Int64` labels.
    #[must_use]
    pub fn range(len: usize) -> Self {
        (0..len as i64).map(IndexLabel::Int64).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[IndexLabel] {
        &self.labels
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        *self
            .duplicate_cache
            .get_or_init(|| detect_duplicates(&self.labels))
    }

    /// First duplicated label in order of appearance, if any.
    #[must_use]
    pub fn first_duplicate(&self) -> Option<&IndexLabel> {
        if !self.has_duplicates() {
            return None;
        }
        let mut seen = HashMap::<&IndexLabel, ()>::new();
        self.labels
            .iter()
            .find(|label| seen.insert(*label, ()).is_some())
    }

    /// Strictly ascending, which also implies unique.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        *self
            .sorted_cache
            .get_or_init(|| self.labels.windows(2).all(|w| w[0] < w[1]))
    }

    /// Binary search on sorted indexes, linear scan otherwise.
    #[must_use]
    pub fn position(&self, needle: &IndexLabel) -> Option<usize> {
        if self.is_sorted() {
            self.labels.binary_search(needle).ok()
        } else {
            self.labels.iter().position(|label| label == needle)
        }
    }

    #[must_use]
    pub fn contains(&self, label: &IndexLabel) -> bool {
        self.position(label).is_some()
    }

    fn position_map_first(&self) -> HashMap<&IndexLabel, usize> {
        let mut positions = HashMap::with_capacity(self.labels.len());
        for (idx, label) in self.labels.iter().enumerate() {
            positions.entry(label).or_insert(idx);
        }
        positions
    }

    /// For each label of `target`, its position in `self`.
    #[must_use]
    pub fn get_indexer(&self, target: &Index) -> Vec<Option<usize>> {
        let map = self.position_map_first();
        target
            .labels
            .iter()
            .map(|label| map.get(label).copied())
            .collect()
    }

    /// Sorted, deduplicated union of both label sets.
    #[must_use]
    pub fn union_sorted(&self, other: &Self) -> Self {
        let set: BTreeSet<&IndexLabel> = self.labels.iter().chain(&other.labels).collect();
        set.into_iter().cloned().collect()
    }

    /// Labels of `self` also present in `other`, in `self`'s order.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let other_map = other.position_map_first();
        let mut seen = HashMap::<&IndexLabel, ()>::new();
        self.labels
            .iter()
            .filter(|label| other_map.contains_key(*label) && seen.insert(*label, ()).is_none())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn sort_values(&self) -> Self {
        let mut labels = self.labels.clone();
        labels.sort();
        Self::new(labels)
    }

    /// Labels at `positions`; positions out of range are skipped.
    #[must_use]
    pub fn take(&self, positions: &[usize]) -> Self {
        positions
            .iter()
            .filter_map(|&pos| self.labels.get(pos).cloned())
            .collect()
    }

    /// Every `step`-th label starting at the first.
    #[must_use]
    pub fn step_by(&self, step: usize) -> Self {
        self.labels.iter().step_by(step.max(1)).cloned().collect()
    }
}

/// Maps every output label to a source position in each operand, or `None`
/// when that operand lacks the label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentPlan {
    pub union_index: Index,
    pub left_positions: Vec<Option<usize>>,
    pub right_positions: Vec<Option<usize>>,
}

impl AlignmentPlan {
    /// Number of output slots that one operand or the other cannot fill.
    #[must_use]
    pub fn unmatched_slots(&self) -> usize {
        self.left_positions
            .iter()
            .zip(&self.right_positions)
            .filter(|(l, r)| l.is_none() || r.is_none())
            .count()
    }

    /// True when both operands already carry exactly the output labels.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        is_identity_positions(&self.left_positions) && is_identity_positions(&self.right_positions)
    }
}

fn is_identity_positions(positions: &[Option<usize>]) -> bool {
    positions
        .iter()
        .enumerate()
        .all(|(i, pos)| *pos == Some(i))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("alignment vectors must have equal lengths")]
    InvalidAlignmentVectors,
}

/// Which labels survive an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignMode {
    /// Labels present in both, in left order.
    Inner,
    /// All left labels, in left order.
    Left,
    /// All right labels, in right order.
    Right,
    /// Sorted union of both label sets. Used by arithmetic.
    #[default]
    Outer,
}

pub fn align(left: &Index, right: &Index, mode: AlignMode) -> AlignmentPlan {
    match mode {
        AlignMode::Inner => align_inner(left, right),
        AlignMode::Left => align_left(left, right),
        AlignMode::Right => {
            let plan = align_left(right, left);
            AlignmentPlan {
                union_index: plan.union_index,
                left_positions: plan.right_positions,
                right_positions: plan.left_positions,
            }
        }
        AlignMode::Outer => align_union_sorted(left, right),
    }
}

pub fn align_inner(left: &Index, right: &Index) -> AlignmentPlan {
    let union_index = left.intersection(right);
    AlignmentPlan {
        left_positions: left.get_indexer(&union_index),
        right_positions: right.get_indexer(&union_index),
        union_index,
    }
}

pub fn align_left(left: &Index, right: &Index) -> AlignmentPlan {
    AlignmentPlan {
        left_positions: (0..left.len()).map(Some).collect(),
        right_positions: right.get_indexer(left),
        union_index: left.clone(),
    }
}

/// Outer alignment onto the sorted union of both label sets.
///
/// Output order never depends on the operands' own orders.
pub fn align_union_sorted(left: &Index, right: &Index) -> AlignmentPlan {
    let union_index = left.union_sorted(right);
    AlignmentPlan {
        left_positions: left.get_indexer(&union_index),
        right_positions: right.get_indexer(&union_index),
        union_index,
    }
}

pub fn validate_alignment_plan(plan: &AlignmentPlan) -> Result<(), IndexError> {
    if plan.left_positions.len() != plan.right_positions.len()
        || plan.left_positions.len() != plan.union_index.len()
    {
        return Err(IndexError::InvalidAlignmentVectors);
    }

    Ok(())
}

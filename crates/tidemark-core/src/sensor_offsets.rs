use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::sensor_value::SensorValue;

#[derive(Debug, Error)]
pub enum SensorOffsetsError {
    #[error("sensor group '{0}' is not defined")]
    UnknownGroup(String),
    #[error("sensor group '{0}' is defined more than once")]
    DuplicateGroup(String),
    #[error("sensor group '{group}' names parent '{parent}', which is not defined")]
    UnknownParent { group: String, parent: String },
    #[error("sensor group '{group}' has no parent but '{root}' is already the root group")]
    MultipleRoots { group: String, root: String },
    #[error("column {column_id} is in both sensor group '{first}' and '{second}'")]
    ColumnInTwoGroups {
        column_id: i64,
        first: String,
        second: String,
    },
    #[error("sensor group '{group}' has parent {found:?} in the offsets document but {expected:?} in the instrument")]
    ParentMismatch {
        group: String,
        expected: Option<String>,
        found: Option<String>,
    },
    #[error("no path between sensor groups '{from}' and '{to}'")]
    NoPath { from: String, to: String },
    #[error("{0} is not a pair of adjacent sensor groups")]
    NotAPair(SensorGroupPair),
    #[error("{pair} already has an offset at {time}")]
    DuplicateOffset {
        pair: SensorGroupPair,
        time: DateTime<Utc>,
    },
    #[error("{pair} has no offset at {time}")]
    OffsetNotFound {
        pair: SensorGroupPair,
        time: DateTime<Utc>,
    },
    #[error("offset of {offset_millis} ms on {pair} moves {time} out of the representable range")]
    OutOfRange {
        pair: SensorGroupPair,
        time: DateTime<Utc>,
        offset_millis: i64,
    },
    #[error("sensor offsets document could not be read: {0}")]
    Document(#[from] serde_json::Error),
}

/// Sensors that share one logger clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorGroup {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub columns: BTreeSet<i64>,
}

/// Two adjacent groups: `base` is the parent, `target` the child.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SensorGroupPair {
    pub base: String,
    pub target: String,
}

impl SensorGroupPair {
    pub fn new(base: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for SensorGroupPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor group pair {} -> {}", self.base, self.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Parent frame to child frame.
    Down,
    /// Child frame to parent frame.
    Up,
}

#[derive(Debug, Clone)]
struct Hop {
    pair: SensorGroupPair,
    direction: Direction,
}

/// Tree of sensor groups. The first group added is the root; every other group
/// names exactly one parent.
#[derive(Debug, Clone, Default)]
pub struct SensorGroups {
    groups: Vec<SensorGroup>,
}

impl SensorGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the tree from definitions in any order, as long as every parent is
    /// itself defined.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = SensorGroup>,
    ) -> Result<Self, SensorOffsetsError> {
        let mut pending: Vec<SensorGroup> = definitions.into_iter().collect();
        let mut groups = Self::new();

        while !pending.is_empty() {
            let ready = pending.iter().position(|group| match &group.parent {
                None => true,
                Some(parent) => groups.contains(parent),
            });

            match ready {
                Some(index) => {
                    let group = pending.remove(index);
                    groups.add_group(group)?;
                }
                None => {
                    let group = pending.remove(0);
                    let parent = group.parent.clone().unwrap_or_default();
                    return Err(if pending.iter().any(|other| other.name == parent) {
                        SensorOffsetsError::NoPath {
                            from: group.name,
                            to: parent,
                        }
                    } else {
                        SensorOffsetsError::UnknownParent {
                            group: group.name,
                            parent,
                        }
                    });
                }
            }
        }

        Ok(groups)
    }

    pub fn add_group(&mut self, group: SensorGroup) -> Result<(), SensorOffsetsError> {
        if self.contains(&group.name) {
            return Err(SensorOffsetsError::DuplicateGroup(group.name));
        }

        match &group.parent {
            None => {
                if let Some(root) = self.root() {
                    return Err(SensorOffsetsError::MultipleRoots {
                        group: group.name,
                        root: root.name.clone(),
                    });
                }
            }
            Some(parent) => {
                if !self.contains(parent) {
                    return Err(SensorOffsetsError::UnknownParent {
                        group: group.name.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        for column_id in &group.columns {
            if let Some(existing) = self.group_for_column(*column_id) {
                return Err(SensorOffsetsError::ColumnInTwoGroups {
                    column_id: *column_id,
                    first: existing.name.clone(),
                    second: group.name.clone(),
                });
            }
        }

        self.groups.push(group);
        Ok(())
    }

    pub fn root(&self) -> Option<&SensorGroup> {
        self.groups.first()
    }

    pub fn get(&self, name: &str) -> Option<&SensorGroup> {
        self.groups.iter().find(|group| group.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn group_for_column(&self, column_id: i64) -> Option<&SensorGroup> {
        self.groups
            .iter()
            .find(|group| group.columns.contains(&column_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every parent/child link in the tree, in definition order.
    pub fn pairs(&self) -> Vec<SensorGroupPair> {
        self.groups
            .iter()
            .filter_map(|group| {
                group
                    .parent
                    .as_ref()
                    .map(|parent| SensorGroupPair::new(parent.clone(), group.name.clone()))
            })
            .collect()
    }

    pub fn is_pair(&self, pair: &SensorGroupPair) -> bool {
        self.get(&pair.target)
            .and_then(|group| group.parent.as_deref())
            .is_some_and(|parent| parent == pair.base)
    }

    /// `name` followed by each of its ancestors up to the root.
    fn lineage<'a>(&'a self, name: &str) -> Result<Vec<&'a SensorGroup>, SensorOffsetsError> {
        let mut lineage = Vec::new();
        let mut current = self
            .get(name)
            .ok_or_else(|| SensorOffsetsError::UnknownGroup(name.to_string()))?;
        loop {
            lineage.push(current);
            match &current.parent {
                Some(parent) => {
                    current = self
                        .get(parent)
                        .ok_or_else(|| SensorOffsetsError::UnknownGroup(parent.clone()))?;
                }
                None => return Ok(lineage),
            }
        }
    }

    fn path(&self, from: &str, to: &str) -> Result<Vec<Hop>, SensorOffsetsError> {
        let up = self.lineage(from)?;
        let down = self.lineage(to)?;

        let common = up
            .iter()
            .position(|group| down.iter().any(|other| other.name == group.name))
            .ok_or_else(|| SensorOffsetsError::NoPath {
                from: from.to_string(),
                to: to.to_string(),
            })?;
        let ancestor = &up[common].name;
        let down_len = down
            .iter()
            .position(|group| &group.name == ancestor)
            .unwrap_or(down.len());

        let link = |group: &SensorGroup| {
            SensorGroupPair::new(group.parent.clone().unwrap_or_default(), group.name.clone())
        };

        let mut hops = Vec::with_capacity(common + down_len);
        for group in &up[..common] {
            hops.push(Hop {
                pair: link(group),
                direction: Direction::Up,
            });
        }
        for group in down[..down_len].iter().rev() {
            hops.push(Hop {
                pair: link(group),
                direction: Direction::Down,
            });
        }
        Ok(hops)
    }
}

/// One clock-offset breakpoint. `offset_millis` is how far the target group's
/// clock runs ahead of the base group's clock at `time` (base frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorOffset {
    pub time: DateTime<Utc>,
    pub offset_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairOffsets {
    pub base: String,
    pub target: String,
    #[serde(default)]
    pub offsets: Vec<SensorOffset>,
}

/// Serialised form used by the instrument configuration tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetsDocument {
    pub groups: Vec<SensorGroup>,
    #[serde(default)]
    pub offsets: Vec<PairOffsets>,
}

/// Clock corrections between sensor groups.
#[derive(Debug, Clone, Default)]
pub struct SensorOffsets {
    groups: SensorGroups,
    offsets: BTreeMap<SensorGroupPair, BTreeMap<DateTime<Utc>, i64>>,
}

impl SensorOffsets {
    pub fn new(groups: SensorGroups) -> Self {
        Self {
            groups,
            offsets: BTreeMap::new(),
        }
    }

    pub fn groups(&self) -> &SensorGroups {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.values().all(BTreeMap::is_empty)
    }

    pub fn add_offset(
        &mut self,
        pair: &SensorGroupPair,
        time: DateTime<Utc>,
        offset_millis: i64,
    ) -> Result<(), SensorOffsetsError> {
        self.check_pair(pair)?;
        let breakpoints = self.offsets.entry(pair.clone()).or_default();
        if breakpoints.contains_key(&time) {
            return Err(SensorOffsetsError::DuplicateOffset {
                pair: pair.clone(),
                time,
            });
        }
        breakpoints.insert(time, offset_millis);
        Ok(())
    }

    pub fn remove_offset(
        &mut self,
        pair: &SensorGroupPair,
        time: DateTime<Utc>,
    ) -> Result<SensorOffset, SensorOffsetsError> {
        self.check_pair(pair)?;
        self.offsets
            .get_mut(pair)
            .and_then(|breakpoints| breakpoints.remove(&time))
            .map(|offset_millis| SensorOffset {
                time,
                offset_millis,
            })
            .ok_or_else(|| SensorOffsetsError::OffsetNotFound {
                pair: pair.clone(),
                time,
            })
    }

    /// Breakpoints for `pair` in time order.
    pub fn offsets(&self, pair: &SensorGroupPair) -> Vec<SensorOffset> {
        self.offsets
            .get(pair)
            .map(|breakpoints| {
                breakpoints
                    .iter()
                    .map(|(time, offset_millis)| SensorOffset {
                        time: *time,
                        offset_millis: *offset_millis,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Expresses `time`, read on `from`'s clock, on `to`'s clock, chaining hop by
    /// hop through the group tree.
    pub fn get_offset_time(
        &self,
        time: DateTime<Utc>,
        from: &str,
        to: &str,
    ) -> Result<DateTime<Utc>, SensorOffsetsError> {
        let mut current = time;
        for hop in self.groups.path(from, to)? {
            current = self.shift(&hop.pair, current, hop.direction)?;
        }
        Ok(current)
    }

    /// Expresses `time`, read on `group`'s clock, on the root group's clock.
    pub fn offset_to_first_group(
        &self,
        time: DateTime<Utc>,
        group: &str,
    ) -> Result<DateTime<Utc>, SensorOffsetsError> {
        let root = self
            .groups
            .root()
            .ok_or_else(|| SensorOffsetsError::UnknownGroup(group.to_string()))?;
        self.get_offset_time(time, group, &root.name)
    }

    /// Re-times values from the pair's target group into its base group's frame.
    /// Values whose user flag is not good are dropped.
    pub fn apply_offsets(
        &self,
        pair: &SensorGroupPair,
        values: &[SensorValue],
    ) -> Result<Vec<SensorValue>, SensorOffsetsError> {
        self.check_pair(pair)?;

        let mut retimed = values
            .iter()
            .filter(|value| value.user_qc_flag().is_good())
            .map(|value| {
                let time = self.shift(pair, value.time(), Direction::Up)?;
                Ok(value.retimed(time))
            })
            .collect::<Result<Vec<SensorValue>, SensorOffsetsError>>()?;

        let dropped = values.len() - retimed.len();
        if dropped > 0 {
            debug!(%pair, dropped, "skipped values without a good flag while applying offsets");
        }

        retimed.sort_by_key(SensorValue::time);
        Ok(retimed)
    }

    pub fn to_document(&self) -> OffsetsDocument {
        OffsetsDocument {
            groups: self.groups.iter().cloned().collect(),
            offsets: self
                .offsets
                .iter()
                .filter(|(_, breakpoints)| !breakpoints.is_empty())
                .map(|(pair, _)| PairOffsets {
                    base: pair.base.clone(),
                    target: pair.target.clone(),
                    offsets: self.offsets(pair),
                })
                .collect(),
        }
    }

    pub fn from_document(document: OffsetsDocument) -> Result<Self, SensorOffsetsError> {
        let groups = SensorGroups::from_definitions(document.groups)?;
        let mut offsets = Self::new(groups);
        for entry in document.offsets {
            let pair = SensorGroupPair::new(entry.base, entry.target);
            for offset in entry.offsets {
                offsets.add_offset(&pair, offset.time, offset.offset_millis)?;
            }
        }
        Ok(offsets)
    }

    pub fn to_json(&self) -> Result<String, SensorOffsetsError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn from_json(json: &str) -> Result<Self, SensorOffsetsError> {
        let document: OffsetsDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    /// Offset for `pair` at `time`: held at the nearest breakpoint outside the
    /// recorded span, linearly interpolated between breakpoints, zero if none.
    fn offset_at(&self, pair: &SensorGroupPair, time: DateTime<Utc>) -> i64 {
        let Some(breakpoints) = self.offsets.get(pair) else {
            return 0;
        };

        let before = breakpoints.range(..=time).next_back();
        let after = breakpoints.range(time..).next();

        match (before, after) {
            (None, None) => 0,
            (Some((_, offset)), None) | (None, Some((_, offset))) => *offset,
            (Some((start, first)), Some((end, second))) => {
                if start == end {
                    return *first;
                }
                let span = (*end - *start).num_milliseconds() as f64;
                let elapsed = (time - *start).num_milliseconds() as f64;
                let delta = *second as f64 - *first as f64;
                (*first as f64 + delta * elapsed / span).round() as i64
            }
        }
    }

    /// Moves `time` across one link of the tree.
    fn shift(
        &self,
        pair: &SensorGroupPair,
        time: DateTime<Utc>,
        direction: Direction,
    ) -> Result<DateTime<Utc>, SensorOffsetsError> {
        let offset_millis = self.offset_at(pair, time);
        Duration::try_milliseconds(offset_millis)
            .and_then(|offset| match direction {
                Direction::Down => time.checked_add_signed(offset),
                Direction::Up => time.checked_sub_signed(offset),
            })
            .ok_or_else(|| SensorOffsetsError::OutOfRange {
                pair: pair.clone(),
                time,
                offset_millis,
            })
    }

    fn check_pair(&self, pair: &SensorGroupPair) -> Result<(), SensorOffsetsError> {
        for name in [&pair.base, &pair.target] {
            if !self.groups.contains(name) {
                return Err(SensorOffsetsError::UnknownGroup(name.clone()));
            }
        }
        if self.groups.is_pair(pair) {
            Ok(())
        } else {
            Err(SensorOffsetsError::NotAPair(pair.clone()))
        }
    }
}

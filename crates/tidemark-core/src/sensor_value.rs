use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flags::{combine, Flag, QcOutcome};

const FLUSHING_MESSAGE: &str = "Flushing";

/// Flag raised by a single automatic QC routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineFlag {
    pub routine: String,
    pub flag: Flag,
    pub message: String,
}

impl RoutineFlag {
    pub fn new(routine: impl Into<String>, flag: Flag, message: impl Into<String>) -> Self {
        Self {
            routine: routine.into(),
            flag,
            message: message.into(),
        }
    }
}

/// Automatic QC results for one value, at most one entry per routine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AutoQcResult {
    flags: Vec<RoutineFlag>,
}

impl AutoQcResult {
    /// Records a routine result, replacing any earlier result from the same routine.
    pub fn add(&mut self, flag: RoutineFlag) {
        match self
            .flags
            .iter_mut()
            .find(|existing| existing.routine == flag.routine)
        {
            Some(existing) => *existing = flag,
            None => self.flags.push(flag),
        }
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutineFlag> {
        self.flags.iter()
    }

    /// Worst routine flag and its messages; GOOD when nothing was raised.
    pub fn overall(&self) -> QcOutcome {
        if self.flags.is_empty() {
            return QcOutcome::good();
        }
        combine(
            self.flags
                .iter()
                .map(|flag| (flag.flag, flag.message.as_str())),
        )
    }
}

/// What set a value's current user flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcSource {
    /// Derived from the automatic QC results.
    #[default]
    Auto,
    /// A human decision. Processing never replaces it.
    User,
    /// Marked while the instrument was flushing; re-derived on every run.
    Flushing,
    /// Taken from the position fix; re-derived on every run.
    Position,
}

impl QcSource {
    pub fn is_derived(&self) -> bool {
        matches!(self, QcSource::Flushing | QcSource::Position)
    }
}

/// One timestamped raw reading from one file column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorValue {
    #[serde(default)]
    id: Option<i64>,
    dataset_id: i64,
    column_id: i64,
    time: DateTime<Utc>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    auto_qc: AutoQcResult,
    #[serde(default)]
    user_qc_flag: Flag,
    #[serde(default)]
    user_qc_message: String,
    #[serde(default)]
    qc_source: QcSource,
    #[serde(skip)]
    dirty: bool,
}

impl SensorValue {
    pub fn new(
        dataset_id: i64,
        column_id: i64,
        time: DateTime<Utc>,
        value: Option<&str>,
    ) -> Self {
        Self {
            id: None,
            dataset_id,
            column_id,
            time,
            value: value.map(str::to_string),
            auto_qc: AutoQcResult::default(),
            user_qc_flag: Flag::AssumedGood,
            user_qc_message: String::new(),
            qc_source: QcSource::Auto,
            dirty: true,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self.dirty = false;
        self
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub fn dataset_id(&self) -> i64 {
        self.dataset_id
    }

    pub fn column_id(&self) -> i64 {
        self.column_id
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Numeric reading, if the raw text parses to a finite number.
    pub fn double_value(&self) -> Option<f64> {
        self.value
            .as_deref()
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
    }

    pub fn auto_qc(&self) -> &AutoQcResult {
        &self.auto_qc
    }

    pub fn user_qc_flag(&self) -> Flag {
        self.user_qc_flag
    }

    pub fn user_qc_message(&self) -> &str {
        &self.user_qc_message
    }

    pub fn qc_source(&self) -> QcSource {
        self.qc_source
    }

    pub fn has_user_override(&self) -> bool {
        self.qc_source == QcSource::User
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn add_auto_qc(&mut self, flag: RoutineFlag) {
        self.auto_qc.add(flag);
        self.sync_user_qc();
        self.dirty = true;
    }

    pub fn clear_auto_qc(&mut self) {
        if self.auto_qc.is_empty() {
            return;
        }
        self.auto_qc.clear();
        self.sync_user_qc();
        self.dirty = true;
    }

    /// Human QC decision; from here on auto QC no longer drives the user flag.
    pub fn set_user_qc(&mut self, flag: Flag, message: impl Into<String>) {
        self.set_qc(QcSource::User, flag, message.into());
    }

    /// Marks the value as recorded while flushing. Human decisions are kept.
    /// Returns true if the value was newly marked.
    pub fn set_flushing(&mut self) -> bool {
        if self.has_user_override() || self.user_qc_flag == Flag::Flushing {
            return false;
        }
        self.set_qc(QcSource::Flushing, Flag::Flushing, FLUSHING_MESSAGE.to_string());
        true
    }

    /// Applies a position outcome unless a human has already judged the value.
    /// Returns true if the value's QC changed.
    pub fn apply_position_qc(&mut self, position: &QcOutcome) -> bool {
        if self.has_user_override() {
            return false;
        }
        let current = self.qc();
        let updated = current.with_position_override(position);
        if updated == current {
            return false;
        }
        self.set_qc(QcSource::Position, updated.flag, updated.message);
        true
    }

    /// Drops flushing and position flags left by an earlier run, returning the
    /// user flag to its auto-QC value. Returns true if anything was cleared.
    pub fn clear_derived_qc(&mut self) -> bool {
        if !self.qc_source.is_derived() {
            return false;
        }
        self.qc_source = QcSource::Auto;
        self.sync_user_qc();
        self.dirty = true;
        true
    }

    /// The flag and message that downstream consumers should see.
    pub fn qc(&self) -> QcOutcome {
        if self.user_qc_flag == Flag::NeedsFlag {
            self.auto_qc.overall()
        } else {
            QcOutcome::new(self.user_qc_flag, self.user_qc_message.clone())
        }
    }

    /// Numeric and not excluded from synthesis.
    pub fn is_usable(&self) -> bool {
        self.double_value().is_some() && self.qc().flag != Flag::Flushing
    }

    /// Copy of this value placed at another time, used when re-timing values
    /// into a different clock frame.
    pub fn retimed(&self, time: DateTime<Utc>) -> SensorValue {
        SensorValue {
            time,
            ..self.clone()
        }
    }

    fn set_qc(&mut self, source: QcSource, flag: Flag, message: String) {
        self.qc_source = source;
        self.user_qc_flag = flag;
        self.user_qc_message = message;
        self.dirty = true;
    }

    fn sync_user_qc(&mut self) {
        if self.qc_source != QcSource::Auto {
            return;
        }
        let overall = self.auto_qc.overall();
        self.user_qc_flag = if overall.flag.is_good() {
            Flag::AssumedGood
        } else {
            overall.flag
        };
        self.user_qc_message = overall.message;
    }
}

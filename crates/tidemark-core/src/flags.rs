use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix carried by any message that came from positional QC.
pub const POSITION_MESSAGE_PREFIX: &str = "Position QC: ";

const MESSAGE_SEPARATOR: &str = "; ";

/// QC flag attached to sensor values and measurement values.
///
/// Numeric codes follow the WOCE convention used by the downstream export
/// tooling, with negative codes for the system-assigned states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    NoQc,
    Good,
    #[default]
    AssumedGood,
    Questionable,
    Bad,
    Flushing,
    NeedsFlag,
}

impl Flag {
    pub fn code(&self) -> i32 {
        match self {
            Flag::NoQc => 0,
            Flag::Good => 2,
            Flag::AssumedGood => -2,
            Flag::Questionable => 3,
            Flag::Bad => 4,
            Flag::Flushing => -100,
            Flag::NeedsFlag => -10,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Flag::NoQc),
            2 => Some(Flag::Good),
            -2 => Some(Flag::AssumedGood),
            3 => Some(Flag::Questionable),
            4 => Some(Flag::Bad),
            -100 => Some(Flag::Flushing),
            -10 => Some(Flag::NeedsFlag),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::NoQc => "NO_QC",
            Flag::Good => "GOOD",
            Flag::AssumedGood => "ASSUMED_GOOD",
            Flag::Questionable => "QUESTIONABLE",
            Flag::Bad => "BAD",
            Flag::Flushing => "FLUSHING",
            Flag::NeedsFlag => "NEEDS_FLAG",
        }
    }

    /// Rank used for "worst flag wins". GOOD and ASSUMED_GOOD rank equally;
    /// FLUSHING ranks with BAD.
    pub fn severity(&self) -> u8 {
        match self {
            Flag::NoQc | Flag::NeedsFlag => 0,
            Flag::Good | Flag::AssumedGood => 1,
            Flag::Questionable => 2,
            Flag::Bad | Flag::Flushing => 3,
        }
    }

    pub fn is_good(&self) -> bool {
        matches!(self, Flag::Good | Flag::AssumedGood)
    }

    pub fn more_significant_than(&self, other: Flag) -> bool {
        self.severity() > other.severity()
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved flag together with the message explaining it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QcOutcome {
    pub flag: Flag,
    pub message: String,
}

impl QcOutcome {
    pub fn new(flag: Flag, message: impl Into<String>) -> Self {
        Self {
            flag,
            message: message.into(),
        }
    }

    pub fn good() -> Self {
        Self::new(Flag::Good, "")
    }

    /// Positional override: a more severe position outcome replaces this one
    /// entirely, otherwise this outcome is kept as-is.
    pub fn with_position_override(&self, position: &QcOutcome) -> QcOutcome {
        if !position.flag.more_significant_than(self.flag) {
            return self.clone();
        }

        let message = if position.message.starts_with(POSITION_MESSAGE_PREFIX) {
            position.message.clone()
        } else {
            format!("{POSITION_MESSAGE_PREFIX}{}", position.message)
        };

        QcOutcome {
            flag: position.flag,
            message,
        }
    }
}

/// Worst flag wins. Only messages attached to inputs at the winning severity are
/// kept (deduplicated, first-seen order); weaker causes are discarded.
///
/// An empty input resolves to the default outcome (ASSUMED_GOOD, no message).
pub fn combine<'a, I>(inputs: I) -> QcOutcome
where
    I: IntoIterator<Item = (Flag, &'a str)>,
{
    let mut winner: Option<Flag> = None;
    let mut messages: Vec<&'a str> = Vec::new();

    for (flag, message) in inputs {
        match winner {
            Some(current) if current.severity() > flag.severity() => continue,
            Some(current) if current.severity() == flag.severity() => {}
            _ => {
                winner = Some(flag);
                messages.clear();
            }
        }

        for part in message.split(MESSAGE_SEPARATOR) {
            let part = part.trim();
            if !part.is_empty() && !messages.contains(&part) {
                messages.push(part);
            }
        }
    }

    match winner {
        Some(flag) => QcOutcome {
            flag,
            message: messages.join(MESSAGE_SEPARATOR),
        },
        None => QcOutcome::default(),
    }
}

/// Convenience over [`combine`] for already-resolved outcomes.
pub fn combine_outcomes<'a, I>(outcomes: I) -> QcOutcome
where
    I: IntoIterator<Item = &'a QcOutcome>,
{
    combine(
        outcomes
            .into_iter()
            .map(|outcome| (outcome.flag, outcome.message.as_str())),
    )
}

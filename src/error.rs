//! Error taxonomy shared by every component of a run

use thiserror::Error;

/// Coarse classification of a [`SimError`]
///
/// A run that hits any of these aborts and reports the single error to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown static-data id, undeclared stat, malformed scenario
    Configuration,
    /// Runtime state does not allow the operation
    State,
    /// A structural rule of the engine was broken
    Invariant,
    /// A behavior or formula was used outside its contract
    Contract,
    /// Filesystem and codec failures
    Io,
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown {table} row {key}")]
    UnknownRow { table: &'static str, key: String },

    #[error("unknown stat `{0}`")]
    UnknownStat(String),

    #[error("skill {0} has not been learned")]
    SkillNotLearned(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cooldown {0} is already active")]
    AlreadyOnCooldown(u32),

    #[error("buff {id}:{level} is not active")]
    BuffNotActive { id: u32, level: u32 },

    #[error("mitigation record references missing source {0}")]
    MissingSource(String),

    #[error("buff {id}:{level} is stacked and cannot lose a single stack")]
    StackedDuplicate { id: u32, level: u32 },

    #[error("delay {0} is not a non-negative whole number of ticks")]
    InvalidDelay(f64),

    #[error("stat `{0}` is derived and only accepts a formula")]
    DerivedWrite(String),

    #[error("stat `{0}` is not derived and cannot take a formula")]
    NotDerived(String),

    #[error("behavior `{script}` has no `{entry}` entry point")]
    MissingEntryPoint { script: String, entry: &'static str },

    #[error("no behavior registered as `{0}`")]
    UnregisteredScript(String),

    #[error("corrupt replay log: {0}")]
    CorruptLog(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Codec(#[from] bincode::Error),
}

impl SimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimError::UnknownRow { .. }
            | SimError::UnknownStat(_)
            | SimError::SkillNotLearned(_)
            | SimError::InvalidConfig(_) => ErrorKind::Configuration,
            SimError::AlreadyOnCooldown(_)
            | SimError::BuffNotActive { .. }
            | SimError::MissingSource(_) => ErrorKind::State,
            SimError::StackedDuplicate { .. } | SimError::InvalidDelay(_) => ErrorKind::Invariant,
            SimError::DerivedWrite(_)
            | SimError::NotDerived(_)
            | SimError::MissingEntryPoint { .. }
            | SimError::UnregisteredScript(_) => ErrorKind::Contract,
            SimError::CorruptLog(_)
            | SimError::Io(_)
            | SimError::Json(_)
            | SimError::Yaml(_)
            | SimError::Codec(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn unknown_row(table: &'static str, key: impl std::fmt::Display) -> Self {
        SimError::UnknownRow {
            table,
            key: key.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;

use std::fmt;

/// Failure reported by a rule set while evaluating one value.
///
/// This is a fault in the rule itself (bad configuration, unsupported input),
/// never "the value is invalid"; that is a `Verdict`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleError {
    pub message: String,
}

impl RuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule evaluation failed: {}", self.message)
    }
}

impl std::error::Error for RuleError {}

#[derive(Debug)]
pub enum EngineError {
    /// Rule evaluation failed.
    Rule(RuleError),
    /// Persisted error map could not be decoded.
    Decode(String),
    /// The bulk worker thread could not be started.
    WorkerSpawn(String),
    /// The bulk worker hung up before reporting completion.
    WorkerDisconnected { job: u64 },
    /// A bulk job was discarded because the grid changed underneath it.
    StaleJob { job: u64, generation: u64, current: u64 },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(e) => write!(f, "{e}"),
            Self::Decode(msg) => write!(f, "cannot decode error map: {msg}"),
            Self::WorkerSpawn(msg) => write!(f, "cannot start validation worker: {msg}"),
            Self::WorkerDisconnected { job } => {
                write!(f, "validation worker for job {job} disconnected")
            }
            Self::StaleJob { job, generation, current } => {
                write!(f, "job {job} computed against generation {generation}, grid is at {current}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RuleError> for EngineError {
    fn from(e: RuleError) -> Self {
        Self::Rule(e)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

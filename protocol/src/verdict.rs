use serde::Deserialize;
use serde::Serialize;

/// Exit code for allow / advisory-only activations, including every
/// fail-open path.
pub const EXIT_ALLOW: u8 = 0;

/// Exit code the host pipeline treats as a hard block for this tool call.
/// Emitted only by the circuit store while a circuit is OPEN and still
/// inside its timeout.
pub const EXIT_BLOCK: u8 = 2;

/// Final disposition of one activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Allow,
    Block {
        /// How long until the open circuit starts probing again.
        retry_in_ms: u64,
    },
}

impl Decision {
    pub fn is_block(&self) -> bool {
        matches!(self, Decision::Block { .. })
    }

    /// Process exit code consumed by the host pipeline.
    pub fn exit_code(&self) -> u8 {
        match self {
            Decision::Allow => EXIT_ALLOW,
            Decision::Block { .. } => EXIT_BLOCK,
        }
    }
}

/// What one store evaluation tells the host: a decision plus zero or more
/// human-readable advisory lines for stdout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    pub advisories: Vec<String>,
}

impl Verdict {
    /// Allow with nothing to say — the common case.
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn advisory(line: impl Into<String>) -> Self {
        Self {
            decision: Decision::Allow,
            advisories: vec![line.into()],
        }
    }

    pub fn block(retry_in_ms: u64) -> Self {
        Self {
            decision: Decision::Block { retry_in_ms },
            advisories: Vec::new(),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.advisories.push(line.into());
    }
}

//! Where persisted governor state lives for the current activation.
//!
//! Layout under the project root:
//!
//! ```text
//! <project>/.toolgate/
//!   config.toml                       optional overrides
//!   state/[<session_id>/]
//!     circuit-breaker-state.json      tool name → circuit record
//!     api-usage.json                  rate-window state
//!     checkpoints/<id>.json           one file per checkpoint
//!     checkpoints/latest.json         { "latest": "<id>" }
//! ```
//!
//! The project root and session id are read-only inputs from the host
//! runtime's environment; a session id namespaces state one level deeper so
//! parallel sessions do not share breaker history.

use std::path::Path;
use std::path::PathBuf;

/// Project root override, set by the host runtime.
pub const PROJECT_DIR_ENV: &str = "TOOLGATE_PROJECT_DIR";

/// Session namespace, set by the host runtime when it runs multiple
/// sessions against one project.
pub const SESSION_ID_ENV: &str = "TOOLGATE_SESSION_ID";

const TOOLGATE_SUBDIR: &str = ".toolgate";

pub const CIRCUIT_STATE_FILE: &str = "circuit-breaker-state.json";
pub const USAGE_FILE: &str = "api-usage.json";
pub const CHECKPOINTS_SUBDIR: &str = "checkpoints";

#[derive(Debug, Clone)]
pub struct StateDir {
    toolgate_dir: PathBuf,
    state_root: PathBuf,
}

impl StateDir {
    /// Resolve from an optional explicit project dir, then the environment,
    /// then the current directory.
    pub fn resolve(project_override: Option<&Path>) -> Self {
        let project = project_override
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(PROJECT_DIR_ENV).map(PathBuf::from))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let session = std::env::var(SESSION_ID_ENV).ok();
        Self::layout(&project, session.as_deref())
    }

    /// Pure layout rule, split out from the environment lookups.
    pub fn layout(project: &Path, session: Option<&str>) -> Self {
        let toolgate_dir = project.join(TOOLGATE_SUBDIR);
        let mut state_root = toolgate_dir.join("state");
        if let Some(session) = session
            && !session.is_empty()
        {
            state_root = state_root.join(session);
        }
        Self {
            toolgate_dir,
            state_root,
        }
    }

    /// Directory holding `config.toml`, shared across sessions.
    pub fn config_dir(&self) -> &Path {
        &self.toolgate_dir
    }

    pub fn root(&self) -> &Path {
        &self.state_root
    }

    pub fn circuit_file(&self) -> PathBuf {
        self.state_root.join(CIRCUIT_STATE_FILE)
    }

    pub fn usage_file(&self) -> PathBuf {
        self.state_root.join(USAGE_FILE)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.state_root.join(CHECKPOINTS_SUBDIR)
    }
}

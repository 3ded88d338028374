//! Upload session state machine
//!
//! `Init -> Transmitting -> Finalizing -> Complete`, with `Failed` reachable
//! from every non-terminal state. Terminal states accept no transitions.

use crate::error::{Error, ErrorKind};
use crate::types::UploadMode;
use std::fmt;

/// State of one upload session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No session open yet
    Init,

    /// Session open, payload being sent
    Transmitting { mode: UploadMode },

    /// All payload acknowledged, commit requested
    Finalizing,

    /// Committed; the session id is no longer valid for writes
    Complete { file_id: String },

    /// Abandoned; carries the reason
    Failed { kind: ErrorKind, message: String },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::Transmitting { .. } => "transmitting",
            SessionState::Finalizing => "finalizing",
            SessionState::Complete { .. } => "complete",
            SessionState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete { .. } | SessionState::Failed { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Transmitting { mode } => write!(f, "transmitting({})", mode),
            SessionState::Failed { kind, .. } => write!(f, "failed({:?})", kind),
            other => f.write_str(other.name()),
        }
    }
}

/// One upload attempt, from session open to commit or failure
#[derive(Debug)]
pub struct UploadSession {
    id: Option<String>,
    filename: String,
    state: SessionState,
    history: Vec<SessionState>,
}

impl UploadSession {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            id: None,
            filename: filename.into(),
            state: SessionState::Init,
            history: vec![SessionState::Init],
        }
    }

    /// Remote session id, once opened
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Every state visited, starting with `Init`
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn mode(&self) -> Option<UploadMode> {
        self.history.iter().find_map(|s| match s {
            SessionState::Transmitting { mode } => Some(*mode),
            _ => None,
        })
    }

    /// `Init -> Transmitting` once the remote store issued an id
    pub fn opened(&mut self, id: String, mode: UploadMode) -> Result<(), Error> {
        self.expect(|s| matches!(s, SessionState::Init), "open")?;
        self.id = Some(id);
        self.transition(SessionState::Transmitting { mode });
        Ok(())
    }

    /// `Transmitting -> Finalizing` after every unit was acknowledged
    pub fn finalizing(&mut self) -> Result<(), Error> {
        self.expect(|s| matches!(s, SessionState::Transmitting { .. }), "finalize")?;
        self.transition(SessionState::Finalizing);
        Ok(())
    }

    /// `Finalizing -> Complete`
    pub fn completed(&mut self, file_id: String) -> Result<(), Error> {
        self.expect(|s| matches!(s, SessionState::Finalizing), "complete")?;
        self.transition(SessionState::Complete { file_id });
        Ok(())
    }

    /// Any non-terminal state `-> Failed`; a terminal session is left untouched
    pub fn failed(&mut self, error: &Error) {
        if self.state.is_terminal() {
            return;
        }
        self.transition(SessionState::Failed {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn expect(&self, allowed: impl Fn(&SessionState) -> bool, action: &str) -> Result<(), Error> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(Error::protocol(format!(
                "cannot {} session in state {}",
                action, self.state
            )))
        }
    }

    fn transition(&mut self, to: SessionState) {
        let session_id = self.id.as_deref().unwrap_or("-");
        match &to {
            SessionState::Failed { message, .. } => tracing::warn!(
                session_id,
                from = %self.state,
                to = %to,
                reason = %message,
                "Session state changed"
            ),
            _ => tracing::info!(
                session_id,
                from = %self.state,
                to = %to,
                "Session state changed"
            ),
        }

        self.history.push(to.clone());
        self.state = to;
    }
}

//! Errors raised while compiling a grammar

/// All errors that can abort a build. There is no partial output: a build either
/// produces complete tables or one of these.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    /// The grammar text could not be tokenized or parsed.
    #[error("{message} ({file} {line}:{column})")]
    Syntax {
        message: String,
        file: String,
        line: usize,
        column: usize,
    },

    /// A semantic error in the grammar (unknown names, arity mismatches, bad props, ...).
    #[error("{0}")]
    Grammar(String),

    /// Unresolved shift/reduce or reduce/reduce conflicts, one message per conflict.
    #[error("{}", .0.join("\n\n"))]
    Conflicts(Vec<String>),

    /// Overlapping tokens that are used in the same parse state.
    #[error("{}", .0.join("\n\n"))]
    TokenConflicts(Vec<String>),

    /// A fixed-width limit of the table format was exceeded.
    #[error("{0}")]
    Capacity(String),
}

pub type Result<T> = std::result::Result<T, GenError>;

/// Collects conflicts found during a pass so that they can be reported together.
#[derive(Debug, Default)]
pub struct ConflictLog {
    entries: Vec<LoggedConflict>,
}

#[derive(Debug)]
struct LoggedConflict {
    message: String,
    // Names of the rules involved, used to avoid reporting the same clash repeatedly
    rules: Vec<String>,
}

impl ConflictLog {
    pub fn new() -> Self {
        Default::default()
    }

    /// Whether a conflict mentioning any of `rules` was already logged.
    pub fn involves_any(&self, rules: &[String]) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.rules.iter().any(|r| rules.contains(r)))
    }

    pub fn push(&mut self, message: String, rules: Vec<String>) {
        self.entries.push(LoggedConflict { message, rules });
    }

    pub fn into_automaton_result(self) -> Result<()> {
        if self.entries.is_empty() {
            Ok(())
        } else {
            Err(GenError::Conflicts(
                self.entries.into_iter().map(|e| e.message).collect(),
            ))
        }
    }

    pub fn into_token_result(self) -> Result<()> {
        if self.entries.is_empty() {
            Ok(())
        } else {
            Err(GenError::TokenConflicts(
                self.entries.into_iter().map(|e| e.message).collect(),
            ))
        }
    }
}

#[test]
fn conflict_log_joins_messages() {
    let mut log = ConflictLog::new();
    log.push("first".to_owned(), vec!["A".to_owned()]);
    log.push("second".to_owned(), vec!["B".to_owned()]);
    assert!(log.involves_any(&["B".to_owned()]));
    assert!(!log.involves_any(&["C".to_owned()]));
    let err = log.into_automaton_result().unwrap_err();
    assert_eq!(err.to_string(), "first\n\nsecond");
}

#[test]
fn empty_log_is_ok() {
    assert!(ConflictLog::new().into_token_result().is_ok());
}

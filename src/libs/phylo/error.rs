use thiserror::Error;

/// Failure to turn Newick text into a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Bad syntax; `line` and `column` are 1-based
    #[error("syntax error at line {line}, column {column}: {message} near \"{snippet}\"")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
        snippet: String,
    },
    /// Text parsed, but does not describe a usable tree
    #[error("{0}")]
    Structure(String),
}

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum CompilerError {
    #[error("Lexical error on line {line}, column {column}: {reason}")]
    LexicalError {
        line: usize,
        column: usize,
        reason: String,
    },

    #[error("Syntax error on line {line}, column {column}: {reason}")]
    SyntaxError {
        line: usize,
        column: usize,
        reason: String,
    },

    #[error("Semantic error on line {line}: {reason}")]
    SemanticError { line: usize, reason: String },

    #[error("Semantic error: {reason}")]
    SemanticErrorNoLine { reason: String },

    #[error("Internal error: {reason}")]
    InternalError { reason: String },
}

impl CompilerError {
    pub fn internal(reason: impl Into<String>) -> Self {
        CompilerError::InternalError {
            reason: reason.into(),
        }
    }
}

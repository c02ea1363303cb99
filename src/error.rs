use thiserror::Error;

use crate::frontend::cursor::Pos;
use crate::frontend::token::TokenKind;

/// Every way a compile can fail. Errors are fatal: the first one aborts the
/// whole compile, and each carries the source position it was raised at.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("InvalidInput at {0}")]
    InvalidInput(Pos),
    #[error("ExpectedToken({expected}, got {got}) at {pos}")]
    ExpectedToken {
        expected: TokenKind,
        got: TokenKind,
        pos: Pos,
    },
    #[error("NotDeclared at {0}")]
    NotDeclared(Pos),
    #[error("DuplicateDeclaration at {0}")]
    DuplicateDeclaration(Pos),
    #[error("AssignToConstant at {0}")]
    AssignToConstant(Pos),
    #[error("InvalidAssignment at {0}")]
    InvalidAssignment(Pos),
    #[error("TypeError at {0}")]
    TypeError(Pos),
    #[error("NotValidReturn at {0}")]
    NotValidReturn(Pos),
    #[error("ParamError at {0}")]
    ParamError(Pos),
    #[error("NotWhile at {0}")]
    NotWhile(Pos),
    #[error("NoMain at {0}")]
    NoMain(Pos),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_visible_format() {
        let err = CompileError::AssignToConstant(Pos::new(3, 14));
        assert_eq!(err.to_string(), "AssignToConstant at (3,14)");

        let err = CompileError::ExpectedToken {
            expected: TokenKind::Semicolon,
            got: TokenKind::RBrace,
            pos: Pos::new(1, 2),
        };
        assert_eq!(err.to_string(), "ExpectedToken(;, got }) at (1,2)");
    }
}

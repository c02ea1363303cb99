pub mod cursor;
pub mod lexer;
pub mod token;
pub mod token_dumper;

pub use cursor::Pos;
pub use lexer::{Lexer, TokenBuffer};
pub use token::{Token, TokenKind, TokenValue};

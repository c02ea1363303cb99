//! Cinder is a single-pass compiler for a small C-like language. Characters
//! go through the lexer and one token of lookahead straight into a fused
//! parser/type-checker/emitter; there is no AST. The result is a list of
//! globals and per-function instruction streams, serialized as a big-endian
//! image for a companion stack VM.

pub mod bytecode;
pub mod error;
pub mod frontend;

pub use bytecode::compile::compile;
pub use bytecode::image::assemble;
pub use bytecode::{FunctionDef, GlobalDef, Op, Program, Ty};
pub use error::CompileError;

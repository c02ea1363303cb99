use crate::frontend::token::{Token, TokenKind, TokenValue};

/// Render a token stream for the `--tokens` debugging mode, one token per
/// line with its start position.
pub fn dump_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        let pos = format!("{}:{}", token.start.line, token.start.col);
        match &token.value {
            TokenValue::None => {
                out.push_str(&format!("{:>8}  {}\n", pos, token.kind));
            }
            TokenValue::Int(v) => {
                if token.kind == TokenKind::DoubleLiteral {
                    out.push_str(&format!(
                        "{:>8}  {} {} (bits 0x{:016x})\n",
                        pos,
                        token.kind,
                        f64::from_bits(*v),
                        v
                    ));
                } else {
                    out.push_str(&format!("{:>8}  {} {}\n", pos, token.kind, v));
                }
            }
            TokenValue::Str(s) => {
                out.push_str(&format!("{:>8}  {} {:?}\n", pos, token.kind, s));
            }
        }
    }
    out
}

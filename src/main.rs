use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use cinder::bytecode::disasm::disassemble;
use cinder::frontend::lexer::Lexer;
use cinder::frontend::token::TokenKind;
use cinder::frontend::token_dumper::dump_tokens;

/// Compiler for the Cinder language.
#[derive(Parser)]
#[command(name = "cinder", version)]
struct Cli {
    /// Source file to compile
    input: PathBuf,

    /// Output image path
    output: PathBuf,

    /// Dump the token stream and exit
    #[arg(long)]
    tokens: bool,

    /// Print a disassembly of the compiled program
    #[arg(long)]
    disasm: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read '{}'", cli.input.display()))?;

    if cli.tokens {
        let mut lexer = Lexer::new(&source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if eof {
                break;
            }
        }
        print!("{}", dump_tokens(&tokens));
        return Ok(());
    }

    let program = cinder::compile(&source)?;
    if cli.disasm {
        print!("{}", disassemble(&program));
    }

    let image = cinder::assemble(&program);
    fs::write(&cli.output, image)
        .with_context(|| format!("failed to write '{}'", cli.output.display()))?;
    Ok(())
}

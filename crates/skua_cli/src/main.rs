use std::path::PathBuf;
use std::process;

use clap::Parser;
use colored::Colorize;

use skua_driver::{compile_file, CompileError, CompileOptions};
use skua_frontend::lex::tokenize;
use skua_frontend::parse_source;

#[derive(Parser, Debug)]
#[command(name = "skua", about = "skua — compiler targeting JVM assembly (.jasm)")]
struct Cli {
    /// Input source file to compile.
    input: PathBuf,

    /// Directory receiving the generated .jasm files.
    #[arg(short, long, default_value = "out")]
    out_dir: PathBuf,

    /// Stop after lexing and print the token stream.
    #[arg(long)]
    emit_tokens: bool,

    /// Stop after parsing and print the tree (debug form).
    #[arg(long)]
    emit_ast: bool,
}

fn main() {
    let cli = Cli::parse();

    if !cli.input.exists() {
        eprintln!("{} file not found: {}", "error:".red().bold(), cli.input.display());
        process::exit(1);
    }

    if cli.emit_tokens || cli.emit_ast {
        run_stop_stage(&cli);
        return;
    }

    let options = CompileOptions {
        output_dir: cli.out_dir.clone(),
    };
    match compile_file(&cli.input, &options) {
        Ok(()) => {
            eprintln!("compiled to {}", cli.out_dir.display());
        }
        Err(error) => {
            print_error(&error);
            process::exit(1);
        }
    }
}

/// `--emit-tokens` / `--emit-ast`: run the front end only, like the classic
/// lexer/parser debugging stops.
fn run_stop_stage(cli: &Cli) {
    let source = match std::fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{} cannot read {}: {e}", "error:".red().bold(), cli.input.display());
            process::exit(1);
        }
    };

    if cli.emit_tokens {
        let (lexemes, errors) = tokenize(&source);
        for lexeme in &lexemes {
            println!(
                "{:?} '{}' at {}:{}",
                lexeme.token, lexeme.text, lexeme.span.line, lexeme.span.column
            );
        }
        if !errors.is_empty() {
            for error in &errors {
                eprintln!(
                    "{} unrecognized input '{}' at {}:{}",
                    "lexical error:".red().bold(),
                    error.text,
                    error.span.line,
                    error.span.column
                );
            }
            process::exit(1);
        }
        return;
    }

    let result = parse_source(&source);
    println!("{:#?}", result.program);
    if !result.is_ok() {
        for (span, message) in &result.lex_errors {
            eprintln!("{} {message} at {}:{}", "lexical error:".red().bold(), span.line, span.column);
        }
        for error in &result.errors {
            eprintln!(
                "{} {} at {}:{}",
                "syntax error:".red().bold(),
                error.message,
                error.span.line,
                error.span.column
            );
        }
        process::exit(1);
    }
}

fn print_error(error: &CompileError) {
    match error {
        CompileError::Parse(errors) | CompileError::Semantic(errors) => {
            for line in errors {
                eprintln!("{} {line}", "error:".red().bold());
            }
            eprintln!("compilation failed with {} error(s)", errors.len());
        }
        other => eprintln!("{} {other}", "error:".red().bold()),
    }
}

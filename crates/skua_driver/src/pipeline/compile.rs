//! Pipeline orchestration.
//!
//! Parse, analyze, generate, write — in that order, sharing one error
//! reporter. Lexical or syntax errors stop the pipeline (there is no tree to
//! analyze); semantic diagnostics do not: code generation still runs so
//! late-stage problems surface, but any accumulated diagnostic makes the
//! overall result an error. Only output-directory failures are fatal on
//! their own.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use skua_analysis::{analyze, ErrorKind, ErrorReporter};
use skua_codegen::{emit, generate};
use skua_frontend::parse_source;

/// Compilation options.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Directory receiving one `.jasm` file per generated class. Cleared and
    /// recreated on every run.
    pub output_dir: PathBuf,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("out"),
        }
    }
}

/// Errors that can come out of a compilation.
#[derive(Debug)]
pub enum CompileError {
    /// Reading the source or writing the output failed.
    Io(io::Error),
    /// Lexical or syntax errors; the tree never existed.
    Parse(Vec<String>),
    /// Semantic diagnostics, sorted by position.
    Semantic(Vec<String>),
    /// Code generation failed outright.
    Codegen(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Io(e) => write!(f, "I/O error: {e}"),
            CompileError::Parse(errors) => {
                for error in errors {
                    writeln!(f, "{error}")?;
                }
                Ok(())
            }
            CompileError::Semantic(errors) => {
                for error in errors {
                    writeln!(f, "{error}")?;
                }
                Ok(())
            }
            CompileError::Codegen(e) => write!(f, "codegen error: {e}"),
        }
    }
}

impl From<io::Error> for CompileError {
    fn from(e: io::Error) -> Self {
        CompileError::Io(e)
    }
}

/// Compile a source file to `.jasm` classes.
pub fn compile_file(path: &Path, options: &CompileOptions) -> Result<(), CompileError> {
    let source = std::fs::read_to_string(path)?;
    compile_source(&source, options)
}

/// Compile source text to `.jasm` classes.
pub fn compile_source(source: &str, options: &CompileOptions) -> Result<(), CompileError> {
    let mut reporter = ErrorReporter::new();

    let parsed = parse_source(source);
    for (span, message) in &parsed.lex_errors {
        reporter.report(ErrorKind::LexicalError, span.line, span.column, message.clone());
    }
    for error in &parsed.errors {
        reporter.report(
            ErrorKind::SyntaxError,
            error.span.line,
            error.span.column,
            error.message.clone(),
        );
    }
    if reporter.has_errors() {
        return Err(CompileError::Parse(display_all(&reporter)));
    }

    let mut analysis = analyze(&parsed.program, &mut reporter);

    // Diagnostics are not fatal here; generate anyway so late-stage issues
    // are visible, then report everything at once.
    let classes = generate(&parsed.program, &mut analysis);
    emit::write_classes(&classes, &analysis.table, &options.output_dir)?;

    if reporter.has_errors() {
        return Err(CompileError::Semantic(display_all(&reporter)));
    }
    Ok(())
}

fn display_all(reporter: &ErrorReporter) -> Vec<String> {
    reporter.sorted().iter().map(|d| d.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &tempfile::TempDir) -> CompileOptions {
        CompileOptions {
            output_dir: dir.path().join("out"),
        }
    }

    #[test]
    fn hello_world_end_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opts = options(&dir);
        compile_source("fn main() { println(\"Hello\"); }", &opts).expect("compiles");

        let main = std::fs::read_to_string(opts.output_dir.join("Main.jasm")).expect("Main.jasm");
        assert!(main.contains("public static main([java/lang/String)V{"));
        assert!(main.contains("ldc \"Hello\""));
        assert!(main.contains("invokevirtual java/io/PrintStream.println(java/lang/String)V"));
    }

    #[test]
    fn structs_get_their_own_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opts = options(&dir);
        compile_source(
            "struct Point { x: int; y: int; }\n\
             fn main() { var p: Point* = new Point(1, 2); println(p->x); }",
            &opts,
        )
        .expect("compiles");

        let point = std::fs::read_to_string(opts.output_dir.join("Point.jasm")).expect("Point.jasm");
        assert!(point.contains("public x I"));
        assert!(point.contains("public <init>(I, I)V{"));
    }

    #[test]
    fn syntax_errors_stop_the_pipeline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opts = options(&dir);
        let err = compile_source("fn main( { }", &opts).unwrap_err();
        match err {
            CompileError::Parse(errors) => assert!(!errors.is_empty()),
            other => panic!("expected parse error, got {other:?}"),
        }
        assert!(!opts.output_dir.exists(), "no output on parse failure");
    }

    #[test]
    fn semantic_errors_are_sorted_and_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opts = options(&dir);
        let err = compile_source(
            "fn main() {\n  var b: int = \"two\";\n  var a: int = missing;\n}",
            &opts,
        )
        .unwrap_err();
        match err {
            CompileError::Semantic(errors) => {
                assert!(errors.len() >= 2);
                // Sorted by line, so line 2 precedes line 3.
                assert!(errors[0].starts_with("Line 2:"));
            }
            other => panic!("expected semantic errors, got {other:?}"),
        }
    }

    #[test]
    fn output_still_written_on_semantic_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opts = options(&dir);
        let err = compile_source("fn main() { var x: int = \"nope\"; }", &opts).unwrap_err();
        assert!(matches!(err, CompileError::Semantic(_)));
        assert!(opts.output_dir.join("Main.jasm").exists());
    }

    #[test]
    fn reruns_replace_previous_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opts = options(&dir);
        compile_source("struct P { x: int; } fn main() { }", &opts).expect("first compile");
        assert!(opts.output_dir.join("P.jasm").exists());

        compile_source("fn main() { }", &opts).expect("second compile");
        assert!(!opts.output_dir.join("P.jasm").exists(), "stale class removed");
        assert!(opts.output_dir.join("Main.jasm").exists());
    }

    #[test]
    fn missing_input_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opts = options(&dir);
        let err = compile_file(Path::new("/nonexistent/input.sk"), &opts).unwrap_err();
        assert!(matches!(err, CompileError::Io(_)));
    }
}

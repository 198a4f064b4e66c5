pub mod pipeline;

pub use pipeline::compile::{compile_file, compile_source, CompileError, CompileOptions};

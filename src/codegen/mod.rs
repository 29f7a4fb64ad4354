use thiserror::Error;

pub mod codegen;

pub use codegen::CodeGenerator;

#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("IR builder error: {0}")]
    Builder(#[from] inkwell::builder::BuilderError),

    /// "Should be unreachable" breakage inside the generator. A bug in
    /// this compiler, never in the program being compiled.
    #[error("internal consistency failure: {0}")]
    Internal(String),

    /// The finished module didn't pass LLVM's verifier. Also our bug;
    /// the unit is abandoned.
    #[error("generated module failed LLVM verification:\n{0}")]
    InvalidModule(String),
}

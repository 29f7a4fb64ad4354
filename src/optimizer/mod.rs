//! The middle end is not ours. The finished module is handed to LLVM's
//! standard pipeline and transformed in place; observable behavior of
//! the compiled program must not change, only its shape.

use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::TargetMachine;
use thiserror::Error;

/// The stock `O2` pipeline. No custom passes on top.
const PASS_PIPELINE: &str = "default<O2>";

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("LLVM pass pipeline `{pipeline}` failed: {message}")]
    PassPipeline { pipeline: String, message: String },
}

pub fn optimize_module(
    module: &Module,
    target_machine: &TargetMachine,
) -> Result<(), OptimizeError> {
    module
        .run_passes(PASS_PIPELINE, target_machine, PassBuilderOptions::create())
        .map_err(|message| OptimizeError::PassPipeline {
            pipeline: PASS_PIPELINE.to_string(),
            message: message.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use inkwell::context::Context;

    use crate::codegen::CodeGenerator;
    use crate::lexer::Lexer;
    use crate::objcode::ObjCodeWriter;
    use crate::parser::Parser;

    use super::optimize_module;

    #[test]
    fn optimized_module_still_verifies() {
        let writer = ObjCodeWriter::host().unwrap();
        let context = Context::create();

        let mut lexer = Lexer::new("++[>+<-]>.");
        let program = Parser::new(&mut lexer).parse_program().unwrap();
        let mut codegen = CodeGenerator::new(
            &context,
            &writer.data_layout(),
            Path::new("test.bf"),
            false,
        )
        .unwrap();
        codegen.emit_program(&program).unwrap();
        let module = codegen.finalize().unwrap();

        optimize_module(&module, writer.target_machine()).unwrap();
        module.verify().unwrap();
    }
}

use std::path::{Path, PathBuf};

use inkwell::module::Module;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetData, TargetMachine,
    TargetTriple,
};
use inkwell::OptimizationLevel;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObjCodeError {
    #[error("no target registered for `{triple}`: {message}")]
    TargetLookup { triple: String, message: String },

    #[error("could not create a target machine for `{triple}`")]
    TargetMachine { triple: String },

    #[error("could not write `{}`: {message}", .path.display())]
    WriteFailed { path: PathBuf, message: String },
}

/// Native emission for finalized modules, wrapping one target machine.
/// Also the place the code generator gets its data layout from, so the
/// IR and the machine always agree on pointer width.
pub struct ObjCodeWriter {
    target_machine: TargetMachine,
}

impl ObjCodeWriter {
    /// Writer for the machine this compiler is running on.
    pub fn host() -> Result<ObjCodeWriter, ObjCodeError> {
        Self::for_triple(&TargetMachine::get_default_triple())
    }

    pub fn for_name(triple: &str) -> Result<ObjCodeWriter, ObjCodeError> {
        Self::for_triple(&TargetTriple::create(triple))
    }

    pub fn for_triple(triple: &TargetTriple) -> Result<ObjCodeWriter, ObjCodeError> {
        Target::initialize_all(&InitializationConfig::default());

        let triple_name = triple.as_str().to_string_lossy().into_owned();

        let target = Target::from_triple(triple).map_err(|message| ObjCodeError::TargetLookup {
            triple: triple_name.clone(),
            message: message.to_string(),
        })?;

        let target_machine = target
            .create_target_machine(
                triple,
                "generic",
                "",
                OptimizationLevel::Default,
                RelocMode::Default,
                CodeModel::Default,
            )
            .ok_or(ObjCodeError::TargetMachine {
                triple: triple_name,
            })?;

        Ok(ObjCodeWriter { target_machine })
    }

    /// The layout the code generator should emit against.
    pub fn data_layout(&self) -> TargetData {
        self.target_machine.get_target_data()
    }

    pub fn target_machine(&self) -> &TargetMachine {
        &self.target_machine
    }

    /// Emit the module as an object file or assembly. The module gets
    /// stamped with this machine's triple and layout first so the
    /// backend and the IR can't disagree.
    pub fn write_module_to_file(
        &self,
        path: &Path,
        module: &Module,
        file_type: FileType,
    ) -> Result<(), ObjCodeError> {
        module.set_triple(&self.target_machine.get_triple());
        module.set_data_layout(&self.data_layout().get_data_layout());

        self.target_machine
            .write_to_file(module, file_type, path)
            .map_err(|message| ObjCodeError::WriteFailed {
                path: path.to_path_buf(),
                message: message.to_string(),
            })
    }
}

use std::path::Path;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::debug_info::{
    AsDIScope, DIFlags, DIFlagsConstants, DISubprogram, DWARFEmissionKind, DWARFSourceLanguage,
    DebugInfoBuilder,
};
use inkwell::module::{FlagBehavior, Linkage, Module};
use inkwell::targets::TargetData;
use inkwell::types::{IntType, PointerType};
use inkwell::values::{FunctionValue, IntValue, PointerValue};
use inkwell::{AddressSpace, IntPredicate};

use crate::lexer::SourceLocation;
use crate::parser::{AstKind, AstNode};

use super::CodegenError;

// DW_ATE_signed, for the debug type of `main`'s return value
const DWARF_ENCODING_SIGNED: u32 = 0x05;

/// One-pass structured emitter from the AST into an LLVM module.
///
/// The builder is the single insertion cursor the whole lowering runs
/// through; there is no backtracking. One generator compiles exactly
/// one program, so separate units never share state.
pub struct CodeGenerator<'ctx> {
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,

    byte_type: IntType<'ctx>,
    int_type: IntType<'ctx>,
    byte_ptr_type: PointerType<'ctx>,
    // pointer-sized integer from the target's data layout, so pointer
    // arithmetic comes out at the right width
    ptr_int_type: IntType<'ctx>,

    byte_zero: IntValue<'ctx>,
    byte_one: IntValue<'ctx>,
    ptr_int_one: IntValue<'ctx>,

    putchar_fn: FunctionValue<'ctx>,
    getchar_fn: FunctionValue<'ctx>,
    main_fn: FunctionValue<'ctx>,

    /// Stack slot holding the tape address the program is pointing at.
    position: PointerValue<'ctx>,

    debug_info: Option<DebugInfo<'ctx>>,
}

struct DebugInfo<'ctx> {
    builder: DebugInfoBuilder<'ctx>,
    subprogram: DISubprogram<'ctx>,
}

impl<'ctx> CodeGenerator<'ctx> {
    /// Cells on the tape. The language fixes this at 30000.
    pub const TAPE_SIZE: u32 = 30_000;

    /// Set up the module skeleton: the two external I/O declarations,
    /// the `main` entry function, the zero-initialized tape, and the
    /// position slot pointing at the tape's base.
    pub fn new(
        context: &'ctx Context,
        target_data: &TargetData,
        source_path: &Path,
        emit_debug_info: bool,
    ) -> Result<CodeGenerator<'ctx>, CodegenError> {
        let module_name = source_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("program");

        let module = context.create_module(module_name);
        module.set_data_layout(&target_data.get_data_layout());
        let builder = context.create_builder();

        let byte_type = context.i8_type();
        let int_type = context.i32_type();
        let byte_ptr_type = byte_type.ptr_type(AddressSpace::default());
        let ptr_int_type = target_data.ptr_sized_int_type_in_context(context, None);

        // the runtime surface of a compiled program: putchar/getchar
        let putchar_fn = module.add_function(
            "putchar",
            int_type.fn_type(&[int_type.into()], false),
            Some(Linkage::External),
        );
        let getchar_fn = module.add_function(
            "getchar",
            int_type.fn_type(&[], false),
            Some(Linkage::External),
        );

        let main_fn = module.add_function("main", int_type.fn_type(&[], false), None);

        let debug_info = if emit_debug_info {
            Some(DebugInfo::new(context, &module, main_fn, source_path)?)
        } else {
            None
        };

        let entry = context.append_basic_block(main_fn, "entry");
        builder.position_at_end(entry);

        let tape_type = byte_type.array_type(Self::TAPE_SIZE);
        let tape = module.add_global(tape_type, None, "tape");
        tape.set_linkage(Linkage::Internal);
        tape.set_initializer(&tape_type.const_zero());

        let position = builder.build_alloca(byte_ptr_type, "position")?;
        let tape_base =
            builder.build_pointer_cast(tape.as_pointer_value(), byte_ptr_type, "tape_base")?;
        builder.build_store(position, tape_base)?;

        Ok(CodeGenerator {
            context,
            module,
            builder,
            byte_type,
            int_type,
            byte_ptr_type,
            ptr_int_type,
            byte_zero: byte_type.const_zero(),
            byte_one: byte_type.const_int(1, false),
            ptr_int_one: ptr_int_type.const_int(1, false),
            putchar_fn,
            getchar_fn,
            main_fn,
            position,
            debug_info,
        })
    }

    /// Lower every top-level node in order into `main`.
    pub fn emit_program(&mut self, program: &[AstNode]) -> Result<(), CodegenError> {
        for node in program {
            self.emit_node(node)?;
        }

        Ok(())
    }

    fn emit_node(&mut self, node: &AstNode) -> Result<(), CodegenError> {
        self.stamp_debug_location(node.location);

        match &node.kind {
            AstKind::MoveLeft => self.emit_move(false),
            AstKind::MoveRight => self.emit_move(true),
            AstKind::Increment => self.emit_data_change(true),
            AstKind::Decrement => self.emit_data_change(false),
            AstKind::Write => self.emit_write(),
            AstKind::Read => self.emit_read(),
            AstKind::Loop(body) => self.emit_loop(body),
        }
    }

    fn emit_move(&mut self, forward: bool) -> Result<(), CodegenError> {
        let old_position = self.load_position()?;
        let old_int =
            self.builder
                .build_ptr_to_int(old_position, self.ptr_int_type, "position_int")?;

        let new_int = if forward {
            self.builder
                .build_int_add(old_int, self.ptr_int_one, "position_right")?
        } else {
            self.builder
                .build_int_sub(old_int, self.ptr_int_one, "position_left")?
        };

        let new_position =
            self.builder
                .build_int_to_ptr(new_int, self.byte_ptr_type, "position_next")?;
        self.builder.build_store(self.position, new_position)?;

        Ok(())
    }

    fn emit_data_change(&mut self, increment: bool) -> Result<(), CodegenError> {
        let position = self.load_position()?;
        let old_value = self
            .builder
            .build_load(position, "cell")?
            .into_int_value();

        // i8 add/sub wraps, which is the cell's modulo-256 arithmetic
        let new_value = if increment {
            self.builder
                .build_int_add(old_value, self.byte_one, "cell_incr")?
        } else {
            self.builder
                .build_int_sub(old_value, self.byte_one, "cell_decr")?
        };

        self.builder.build_store(position, new_value)?;

        Ok(())
    }

    fn emit_write(&mut self) -> Result<(), CodegenError> {
        let position = self.load_position()?;
        let value = self
            .builder
            .build_load(position, "cell")?
            .into_int_value();
        let widened = self
            .builder
            .build_int_z_extend(value, self.int_type, "cell_int")?;
        self.builder
            .build_call(self.putchar_fn, &[widened.into()], "write")?;

        Ok(())
    }

    fn emit_read(&mut self) -> Result<(), CodegenError> {
        let read = self.builder.build_call(self.getchar_fn, &[], "read")?;
        let value = read
            .try_as_basic_value()
            .left()
            .ok_or_else(|| CodegenError::Internal("getchar call produced no value".into()))?
            .into_int_value();

        let truncated = self
            .builder
            .build_int_truncate(value, self.byte_type, "read_byte")?;
        let position = self.load_position()?;
        self.builder.build_store(position, truncated)?;

        Ok(())
    }

    /// The header/body/exit three-block structured loop: the header
    /// tests the current cell and leaves on zero, the body lowers the
    /// children and takes the single back edge to the header.
    fn emit_loop(&mut self, body: &[AstNode]) -> Result<(), CodegenError> {
        let header = self.context.append_basic_block(self.main_fn, "loop_header");
        let body_block = self.context.append_basic_block(self.main_fn, "loop_body");
        let exit = self.context.append_basic_block(self.main_fn, "loop_exit");

        self.builder.build_unconditional_branch(header)?;

        self.builder.position_at_end(header);
        let position = self.load_position()?;
        let cell = self
            .builder
            .build_load(position, "cell")?
            .into_int_value();
        let is_zero =
            self.builder
                .build_int_compare(IntPredicate::EQ, cell, self.byte_zero, "loop_done")?;
        self.builder
            .build_conditional_branch(is_zero, exit, body_block)?;

        self.builder.position_at_end(body_block);
        for node in body {
            self.emit_node(node)?;
        }
        self.builder.build_unconditional_branch(header)?;

        // nested loops appended their blocks behind `exit`; slot it
        // back in after the block emission finished on
        let last = self.builder.get_insert_block().ok_or_else(|| {
            CodegenError::Internal("builder lost its insertion point".into())
        })?;
        exit.move_after(last)
            .map_err(|_| CodegenError::Internal("loop exit block has no parent".into()))?;

        self.builder.position_at_end(exit);

        Ok(())
    }

    fn load_position(&self) -> Result<PointerValue<'ctx>, CodegenError> {
        Ok(self
            .builder
            .build_load(self.position, "position")?
            .into_pointer_value())
    }

    fn stamp_debug_location(&self, location: SourceLocation) {
        if let Some(debug_info) = &self.debug_info {
            let debug_location = debug_info.builder.create_debug_location(
                self.context,
                location.line(),
                location.column(),
                debug_info.subprogram.as_debug_info_scope(),
                None,
            );
            self.builder.set_current_debug_location(debug_location);
        }
    }

    /// Close out `main` with a success return, then run the verifier.
    /// A verifier failure means this generator emitted broken IR; the
    /// unit is dead at that point.
    pub fn finalize(self) -> Result<Module<'ctx>, CodegenError> {
        self.builder
            .build_return(Some(&self.int_type.const_zero()))?;

        if let Some(debug_info) = &self.debug_info {
            debug_info.builder.finalize();
        }

        self.module
            .verify()
            .map_err(|message| CodegenError::InvalidModule(message.to_string()))?;

        Ok(self.module)
    }
}

impl<'ctx> DebugInfo<'ctx> {
    fn new(
        context: &'ctx Context,
        module: &Module<'ctx>,
        main_fn: FunctionValue<'ctx>,
        source_path: &Path,
    ) -> Result<DebugInfo<'ctx>, CodegenError> {
        let file_name = source_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("<unknown>");
        let directory = source_path
            .parent()
            .and_then(|parent| parent.to_str())
            .unwrap_or(".");

        module.add_basic_value_flag(
            "Debug Info Version",
            FlagBehavior::Warning,
            context.i32_type().const_int(3, false),
        );
        module.add_basic_value_flag(
            "Dwarf Version",
            FlagBehavior::Warning,
            context.i32_type().const_int(4, false),
        );

        let (builder, compile_unit) = module.create_debug_info_builder(
            true,
            DWARFSourceLanguage::C,
            file_name,
            directory,
            "brainfc",
            false,
            "",
            0,
            "",
            DWARFEmissionKind::Full,
            0,
            false,
            false,
            "",
            "",
        );

        let int_debug_type = builder
            .create_basic_type("int", 32, DWARF_ENCODING_SIGNED, DIFlags::PUBLIC)
            .map_err(|message| CodegenError::Internal(message.to_string()))?;
        let main_debug_type = builder.create_subroutine_type(
            compile_unit.get_file(),
            Some(int_debug_type.as_type()),
            &[],
            DIFlags::PUBLIC,
        );

        let subprogram = builder.create_function(
            compile_unit.as_debug_info_scope(),
            "main",
            None,
            compile_unit.get_file(),
            1,
            main_debug_type,
            true,
            true,
            1,
            DIFlags::PUBLIC,
            false,
        );
        main_fn.set_subprogram(subprogram);

        Ok(DebugInfo {
            builder,
            subprogram,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::objcode::ObjCodeWriter;
    use crate::parser::{Parser, Program};

    const HELLO_WORLD: &str = ">++++++++[<+++++++++>-]<.>++++[<+++++++>-]<+.+++++++..+++.\
                               >>++++++[<+++++++>-]<++.------------.>++++++[<+++++++++>-]\
                               <+.<.+++.------.--------.>>>++++[<++++++++>-]<+.";

    fn parse(source: &str) -> Program {
        let mut lexer = Lexer::new(source);
        Parser::new(&mut lexer).parse_program().unwrap()
    }

    fn lower_in<'ctx>(
        context: &'ctx Context,
        writer: &ObjCodeWriter,
        source: &str,
        emit_debug_info: bool,
    ) -> Module<'ctx> {
        let program = parse(source);
        let mut codegen = CodeGenerator::new(
            context,
            &writer.data_layout(),
            Path::new("test.bf"),
            emit_debug_info,
        )
        .unwrap();
        codegen.emit_program(&program).unwrap();
        codegen.finalize().unwrap()
    }

    #[test]
    fn hello_world_lowers_to_a_valid_module() {
        let writer = ObjCodeWriter::host().unwrap();
        let context = Context::create();
        let module = lower_in(&context, &writer, HELLO_WORLD, false);

        // finalize already ran the verifier; spot-check the runtime surface
        assert!(module.get_function("putchar").is_some());
        assert!(module.get_function("getchar").is_some());
        assert!(module.get_function("main").is_some());
    }

    #[test]
    fn a_loop_adds_exactly_three_blocks() {
        let writer = ObjCodeWriter::host().unwrap();
        let context = Context::create();

        let flat = lower_in(&context, &writer, "+-", false);
        assert_eq!(
            1,
            flat.get_function("main").unwrap().count_basic_blocks()
        );

        let one_loop = lower_in(&context, &writer, "[-]", false);
        assert_eq!(
            4,
            one_loop.get_function("main").unwrap().count_basic_blocks()
        );

        let nested = lower_in(&context, &writer, "[[-]]", false);
        assert_eq!(
            7,
            nested.get_function("main").unwrap().count_basic_blocks()
        );
    }

    #[test]
    fn lowering_twice_gives_identical_ir() {
        let writer = ObjCodeWriter::host().unwrap();
        let context = Context::create();

        let first = lower_in(&context, &writer, HELLO_WORLD, false);
        let second = lower_in(&context, &writer, HELLO_WORLD, false);

        assert_eq!(
            first.print_to_string().to_string(),
            second.print_to_string().to_string()
        );
    }

    #[test]
    fn cell_arithmetic_is_byte_wide() {
        let writer = ObjCodeWriter::host().unwrap();
        let context = Context::create();
        let module = lower_in(&context, &writer, "-.", false);

        // decrementing the zero cell is a wrapping i8 sub, so the
        // program writes byte 255
        let ir = module.print_to_string().to_string();
        assert!(ir.contains("sub i8"), "no byte-wide sub in:\n{}", ir);
        assert!(ir.contains("zext i8"), "write doesn't widen the byte:\n{}", ir);
    }

    #[test]
    fn debug_info_attaches_source_locations() {
        let writer = ObjCodeWriter::host().unwrap();
        let context = Context::create();
        let module = lower_in(&context, &writer, "+\n[-]", true);

        let ir = module.print_to_string().to_string();
        assert!(ir.contains("DILocation"), "no debug locations in:\n{}", ir);
        assert!(ir.contains("DICompileUnit"), "no compile unit in:\n{}", ir);
    }
}

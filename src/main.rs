use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use colored::Colorize;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::FileType;
use thiserror::Error;

use brainfc::codegen::{CodeGenerator, CodegenError};
use brainfc::lexer::{Lexer, TokenKind};
use brainfc::objcode::{ObjCodeError, ObjCodeWriter};
use brainfc::optimizer::{self, OptimizeError};
use brainfc::parser::{self, ParseError};

/// Brainf**k batch compiler: source files in, native objects out
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The files to compile, one independent unit each
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Extra artifacts to dump alongside the object file
    #[arg(short, long, value_enum)]
    emit: Vec<Emit>,

    /// Triple to compile for, defaults to the host
    #[arg(short, long)]
    triple: Option<String>,

    /// Attach source locations to the generated IR
    #[arg(short = 'g', long)]
    debug_info: bool,

    /// Skip the backend optimization pipeline
    #[arg(long)]
    no_optimize: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Emit {
    /// Print the token stream
    Tokens,
    /// Print the ast
    Ast,
    /// Write textual IR, before and after optimization
    Ir,
    /// Write target assembly next to the object file
    Asm,
}

#[derive(Error, Debug)]
enum CompileError {
    #[error("could not read source: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error(transparent)]
    ObjCode(#[from] ObjCodeError),

    #[error("could not write `{}`: {message}", .path.display())]
    IrDump { path: PathBuf, message: String },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let writer = match &args.triple {
        Some(triple) => ObjCodeWriter::for_name(triple),
        None => ObjCodeWriter::host(),
    };
    let writer = match writer {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            return ExitCode::FAILURE;
        }
    };

    // units are independent: one failing is reported and skipped, the
    // rest still compile
    let mut failed = 0usize;
    for file in &args.files {
        println!("Compiling {}", file.display());

        if let Err(e) = compile_unit(&args, &writer, file) {
            eprintln!("{} {}: {}", "Error:".red(), file.display(), e);
            failed += 1;
        }
    }

    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn compile_unit(args: &Args, writer: &ObjCodeWriter, file: &Path) -> Result<(), CompileError> {
    let source = fs::read_to_string(file)?;

    if args.emit.contains(&Emit::Tokens) {
        print_tokens(&source);
    }

    println!("{}", "Starting parsing".blue());
    let now = Instant::now();
    let mut lexer = Lexer::new(&source);
    let program = parser::Parser::new(&mut lexer).parse_program()?;
    println!("{} {:.2?}", "Finished parsing in".green(), now.elapsed());

    if args.emit.contains(&Emit::Ast) {
        println!("{:#?}", program);
    }

    println!("{}", "Starting codegen".blue());
    let now = Instant::now();
    let context = Context::create();
    let mut codegen = CodeGenerator::new(&context, &writer.data_layout(), file, args.debug_info)?;
    codegen.emit_program(&program)?;
    let module = codegen.finalize()?;
    println!("{} {:.2?}", "Finished codegen in".green(), now.elapsed());

    let stem = file.with_extension("");

    if !args.no_optimize {
        if args.emit.contains(&Emit::Ir) {
            print_ir(&module, &suffixed(&stem, "_unoptimized.ll"))?;
        }

        println!("{}", "Starting optimization".blue());
        let now = Instant::now();
        optimizer::optimize_module(&module, writer.target_machine())?;
        println!("{} {:.2?}", "Finished optimization in".green(), now.elapsed());
    }

    if args.emit.contains(&Emit::Ir) {
        print_ir(&module, &stem.with_extension("ll"))?;
    }

    writer.write_module_to_file(&stem.with_extension("o"), &module, FileType::Object)?;

    if args.emit.contains(&Emit::Asm) {
        writer.write_module_to_file(&stem.with_extension("s"), &module, FileType::Assembly)?;
    }

    Ok(())
}

fn print_tokens(source: &str) {
    let mut lexer = Lexer::new(source);

    while lexer.current_token() != TokenKind::Eof {
        if let Some(symbol) = lexer.current_token().symbol() {
            print!("{}", symbol);
        }
        lexer.advance();
    }
    println!();
}

fn print_ir(module: &Module, path: &Path) -> Result<(), CompileError> {
    module
        .print_to_file(path)
        .map_err(|message| CompileError::IrDump {
            path: path.to_path_buf(),
            message: message.to_string(),
        })
}

fn suffixed(stem: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(stem.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

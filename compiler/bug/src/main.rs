//! The `bug` command: compile a BUG source file to EVM bytecode.

mod logger;

use std::{fs, path::PathBuf, process::ExitCode, str::FromStr};

use bug_codegen::EvmImage;
use bug_ir::write::ModuleWriter;
use bug_pipeline::{CompilerSettings, Driver, EmitKind, OptimisationLevel};
use bug_reporting::ReportWriter;
use bug_source::Source;
use clap::Parser;

/// CompilerOptions is a structural representation of the arguments the
/// compiler can take when running.
#[derive(Parser)]
#[command(
    name = "bug",
    version,
    author = "BUG Language Authors",
    about = "Compile BUG programs to EVM bytecode"
)]
struct CompilerOptions {
    /// Input file to compile.
    filename: PathBuf,

    /// Optimisation level, 0..3.
    #[arg(short = 'O', long = "opt-level", default_value = "1",
          value_parser = OptimisationLevel::from_str)]
    opt_level: OptimisationLevel,

    /// Pretty-print the parsed AST and continue.
    #[arg(long)]
    dump_ast: bool,

    /// Pretty-print the SSA IR and continue.
    #[arg(long)]
    dump_ir: bool,

    /// Which image to print: runtime, create or both.
    #[arg(long, default_value = "runtime", value_parser = EmitKind::from_str)]
    emit: EmitKind,

    /// Print the annotated instruction listing instead of raw hex.
    #[arg(long)]
    listing: bool,

    /// Run the compiler in debug mode.
    #[arg(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let options = CompilerOptions::parse();
    logger::init(options.debug);

    let contents = match fs::read_to_string(&options.filename) {
        Ok(contents) => contents,
        Err(error) => {
            eprintln!("error: cannot read `{}`: {error}", options.filename.display());
            return ExitCode::FAILURE;
        }
    };

    let name = options
        .filename
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| options.filename.display().to_string());
    let source = Source::new(name, contents);

    let settings = CompilerSettings {
        optimisation_level: options.opt_level,
        dump_ast: options.dump_ast,
        dump_ir: options.dump_ir,
        emit: options.emit,
    };

    let outcome = Driver::new(settings).compile(source.clone());

    for report in &outcome.reports {
        eprintln!("{}", ReportWriter::new(report, &source));
    }

    if options.dump_ast {
        if let Some(program) = &outcome.context.program {
            println!("{program:#?}");
        }
    }
    if options.dump_ir {
        if let Some(module) = &outcome.context.module {
            println!("{}", ModuleWriter(module));
        }
    }

    if !outcome.succeeded() {
        return ExitCode::FAILURE;
    }

    if let Some(image) = outcome.image() {
        print_image(image, options.emit, options.listing);
    }

    ExitCode::SUCCESS
}

fn print_image(image: &EvmImage, emit: EmitKind, listing: bool) {
    let runtime = matches!(emit, EmitKind::Runtime | EmitKind::Both);
    let create = matches!(emit, EmitKind::Create | EmitKind::Both);

    if runtime {
        if listing {
            print_listing("runtime", &image.runtime_listing);
        } else {
            println!("{}", alloy_primitives::hex::encode(&image.runtime));
        }
    }

    if create {
        match &image.create {
            Some(bytes) => {
                if listing {
                    print_listing("create", &image.create_listing);
                } else {
                    println!("{}", alloy_primitives::hex::encode(bytes));
                }
            }
            None => eprintln!("warn: the module has no constructor image"),
        }
    }
}

fn print_listing(label: &str, listing: &[bug_codegen::asm::AnnotatedInstruction]) {
    println!("; {label}");
    for entry in listing {
        match &entry.immediate {
            Some(immediate) => println!(
                "{:>6} {} 0x{}",
                entry.pc,
                entry.op,
                alloy_primitives::hex::encode(immediate)
            ),
            None => println!("{:>6} {}", entry.pc, entry.op),
        }
    }
}

//! ciltoc - ahead-of-time CIL to C translator
//!
//! # Usage
//!
//! ```bash
//! # Translate every module of a program into <module>.h / <module>.c
//! ciltoc translate program.json --out build/
//!
//! # Translate one module with a custom configuration
//! ciltoc translate program.json --module Hello --config ciltoc.toml
//!
//! # Show blocks, instructions and temporaries of matching methods
//! ciltoc dump program.json --method Program::Main
//!
//! # Print the C name of a metadata entity
//! ciltoc mangle program.json method 12
//!
//! # List translator error codes
//! ciltoc codes
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::path::{Path, PathBuf};
use std::process;
use translator::error_codes::error_registry;
use translator::metadata::{FieldId, MethodId, TypeId};
use translator::{
    dump, logging, translate_module, translate_program, ModuleOutput, Program, TranslationSession,
    TranslatorConfig,
};

#[derive(Parser)]
#[command(name = "ciltoc")]
#[command(version = "0.1.0")]
#[command(about = "Ahead-of-time translator from CIL programs to portable C", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a program document into C headers and bodies
    Translate {
        /// Path to the program JSON document
        file: PathBuf,

        /// Translate only the module with this name
        #[arg(short, long)]
        module: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Translator configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print method bodies with their stack-slot bindings
    Dump {
        /// Path to the program JSON document
        file: PathBuf,

        /// Only methods whose name contains this text
        #[arg(long)]
        method: Option<String>,
    },

    /// Print the mangled C name of a type, method or field
    Mangle {
        /// Path to the program JSON document
        file: PathBuf,

        #[arg(value_enum)]
        kind: EntityKind,

        /// Index of the entity in the document
        id: u32,
    },

    /// List the translator error codes
    Codes,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EntityKind {
    Type,
    Method,
    Field,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Translate {
            file,
            module,
            out,
            config,
            verbose,
        } => translate(file, module, out, config, verbose),
        Commands::Dump { file, method } => dump_methods(file, method),
        Commands::Mangle { file, kind, id } => mangle(file, kind, id),
        Commands::Codes => {
            list_codes();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_program(file: &Path) -> Result<Program, String> {
    Program::load(file).map_err(|e| e.to_string())
}

fn translate(
    file: PathBuf,
    module: Option<String>,
    out: PathBuf,
    config: Option<PathBuf>,
    verbose: bool,
) -> Result<(), String> {
    logging::init(verbose);

    let config = match config {
        Some(path) => TranslatorConfig::load(&path).map_err(|e| e.to_string())?,
        None => TranslatorConfig::default(),
    };
    let program = load_program(&file)?;
    info!("loaded {} ({} modules, {} types)", file.display(), program.modules.len(), program.types.len());

    let outputs: Vec<ModuleOutput> = match module {
        Some(name) => {
            config.validate().map_err(|e| e.to_string())?;
            let id = program.module_by_name(&name).map_err(|e| e.to_string())?;
            let mut session = TranslationSession::new(&program, config);
            vec![translate_module(&mut session, id).map_err(|e| e.to_string())?]
        }
        None => translate_program(&program, config).map_err(|e| e.to_string())?,
    };

    for output in &outputs {
        for path in output.write_to(&out).map_err(|e| e.to_string())? {
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

fn dump_methods(file: PathBuf, method: Option<String>) -> Result<(), String> {
    logging::init(false);
    let program = load_program(&file)?;
    let text = dump::dump_program(&program, method.as_deref()).map_err(|e| e.to_string())?;
    print!("{}", text);
    Ok(())
}

fn mangle(file: PathBuf, kind: EntityKind, id: u32) -> Result<(), String> {
    let program = load_program(&file)?;
    let (count, what) = match kind {
        EntityKind::Type => (program.types.len(), "type"),
        EntityKind::Method => (program.methods.len(), "method"),
        EntityKind::Field => (program.fields.len(), "field"),
    };
    if id as usize >= count {
        return Err(format!("{} id {} out of range (document has {})", what, id, count));
    }
    let mut session = TranslationSession::new(&program, TranslatorConfig::default());
    let name = match kind {
        EntityKind::Type => session.type_name(TypeId(id)),
        EntityKind::Method => session.method_name(MethodId(id)),
        EntityKind::Field => session.field_name(FieldId(id)),
    };
    println!("{}", name);
    Ok(())
}

fn list_codes() {
    for code in error_registry().all() {
        println!("{}", code);
        if let Some(help) = code.help {
            println!("    help: {}", help);
        }
    }
}

pub mod error;
pub mod error_codes;
pub mod logging;
pub mod config;

pub mod metadata;
pub mod mangler;
pub mod session;
pub mod ctypes;
pub mod source_writer;
pub mod stack_slots;
pub mod emit;
pub mod layout;
pub mod assembler;
pub mod dump;

pub use assembler::{translate_module, translate_program, ModuleOutput};
pub use config::TranslatorConfig;
pub use error::{TranslateError, TranslateResult};
pub use metadata::Program;
pub use session::TranslationSession;

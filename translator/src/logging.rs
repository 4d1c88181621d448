//! Logging setup for the translator and the `ciltoc` binary
//!
//! Records go through the `log` facade and are printed by `env_logger` as
//! `[LEVEL] module - message`, where `module` is the translator module that
//! emitted the record (`emit::calls`, `layout::type_loader`, ...).
//!
//! Levels:
//!
//! - `info!` - one line per module phase (plan, header, body)
//! - `debug!` - per type and per method progress
//! - `trace!` - per instruction emission and stack-slot binding
//!
//! `RUST_LOG` always wins over the built-in default, so a single stage can
//! be traced without flooding the rest:
//!
//! ```bash
//! RUST_LOG=translator::stack_slots=trace ciltoc dump program.json --method Main
//! ```

use env_logger::fmt::Formatter;
use env_logger::{Builder, Env};
use log::Record;
use std::io::{self, Write};
use std::sync::Once;

static INIT: Once = Once::new();

/// Install the process logger once. Without `RUST_LOG` the filter is
/// `info` when `verbose` and `warn` otherwise.
pub fn init(verbose: bool) {
    INIT.call_once(|| {
        let default = if verbose { "info" } else { "warn" };
        Builder::from_env(Env::default().default_filter_or(default))
            .format(write_record)
            .init();
    });
}

/// Logger for unit and integration tests; output is captured per test and
/// repeated calls are harmless
pub fn init_test() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn"))
        .format(write_record)
        .is_test(true)
        .try_init();
}

fn write_record(buf: &mut Formatter, record: &Record) -> io::Result<()> {
    writeln!(buf, "[{:5}] {} - {}", record.level(), short_target(record.target()), record.args())
}

/// Module path without the crate prefix
fn short_target(target: &str) -> &str {
    match target.strip_prefix("translator::") {
        Some(rest) => rest,
        None => target,
    }
}

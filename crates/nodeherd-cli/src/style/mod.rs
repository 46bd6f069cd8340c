//! Terminal styling for runner output: semantic colors, message helpers and
//! tables.

use std::sync::OnceLock;

pub mod colors;
pub mod output;
pub mod table;

pub use output::*;
pub use table::*;

static PLAIN: OnceLock<bool> = OnceLock::new();

/// Fixes the color mode for the rest of the process. Later calls are ignored.
pub fn set_no_color(plain: bool) {
    let _ = PLAIN.set(plain);
}

/// Plain output when `--no-color` or `NO_COLOR` was given.
pub fn no_color() -> bool {
    PLAIN.get().copied().unwrap_or(false)
}

//! One-line runner messages, each led by a status mark.

use super::colors::SemanticStyle;

fn out(mark: &str, msg: &str) {
    println!("{mark} {msg}");
}

pub fn print_success(msg: &str) {
    out(&"✓".success(), msg);
}

/// Errors go to stderr so scripted callers can separate them.
pub fn print_error(msg: &str) {
    eprintln!("{} {msg}", "✗".error());
}

pub fn print_warn(msg: &str) {
    out(&"⚠".warning(), msg);
}

pub fn print_hint(msg: &str) {
    out(&"→".muted(), &msg.muted());
}

/// Indented `key: value` line.
pub fn print_labeled(key: &str, value: &str) {
    println!("  {}: {value}", key.muted());
}

/// Blank line, then the name of the run phase that starts now.
pub fn print_phase(name: &str) {
    println!();
    out(&"▸".code(), &name.header());
}

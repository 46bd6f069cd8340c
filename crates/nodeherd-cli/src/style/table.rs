//! Node and scenario tables.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

/// A status word and whether it reads as healthy.
pub struct StatusCell<'a> {
    pub text: &'a str,
    pub healthy: bool,
}

fn colored(cell: Cell, color: Color) -> Cell {
    if super::no_color() { cell } else { cell.fg(color) }
}

/// Rounded table whose header row is bold cyan.
pub fn styled_table(columns: &[&str]) -> Table {
    let header = columns.iter().map(|name| {
        let cell = colored(Cell::new(name), Color::Cyan);
        if super::no_color() {
            cell
        } else {
            cell.add_attribute(Attribute::Bold)
        }
    });

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Green when healthy, yellow otherwise.
pub fn status_cell(status: &StatusCell<'_>) -> Cell {
    let color = if status.healthy {
        Color::Green
    } else {
        Color::Yellow
    };
    colored(Cell::new(status.text), color)
}

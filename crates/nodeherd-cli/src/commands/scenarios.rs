//! Lists the scenario registry.

use comfy_table::Cell;

use crate::scenarios::ScenarioRegistry;
use crate::style;

pub fn run() {
    let registry = ScenarioRegistry::builtin();

    let mut table = style::styled_table(&["Scenario", "Min dnodes", "Description"]);
    for scenario in registry.all() {
        table.add_row(vec![
            Cell::new(scenario.name()),
            Cell::new(scenario.requirements().min_dnodes.max(1)),
            Cell::new(scenario.description()),
        ]);
    }

    println!("{table}");
    style::print_hint("run one with: nodeherd run -f <scenario>");
}

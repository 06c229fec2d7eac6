#![allow(dead_code)]

use strata_schema::{Dialect, Table};

/// Renders `table`, panicking with the error on failure.
pub fn render(table: &Table) -> String {
    table
        .render()
        .unwrap_or_else(|e| panic!("Failed to render {}: {e}", table.name()))
}

/// Renders `table` for every dialect, in `Dialect::ALL` order.
pub fn render_all(build: impl Fn(Dialect) -> Table) -> Vec<String> {
    Dialect::ALL
        .iter()
        .map(|dialect| render(&build(*dialect)))
        .collect()
}

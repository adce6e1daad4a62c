mod category_table;

use tabled::settings::Style;
use tabled::Table;

use crate::report::category_table::CategoryRow;
use crate::stats::RunStats;

/// Print a summary table of the aggregated request categories for a run.
///
/// Useful while developing drivers and on operator consoles; observers receive the structured
/// [RunStats] instead.
pub fn print_summary(stats: &RunStats) {
    println!("\nSummary of request categories");

    let mut rows = vec![CategoryRow::total(&stats.total)];
    rows.extend(
        stats
            .by_category
            .iter()
            .map(|(category, entry)| CategoryRow::new(category, entry)),
    );

    let mut table = Table::new(rows);
    table.with(Style::modern());

    println!("{table}");
}

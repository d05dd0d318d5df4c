use crate::types::{GroupRows, RunSummary};

const NODE_WIDTH: usize = 20;
const ADDRESS_WIDTH: usize = 50;
const BALANCE_WIDTH: usize = 18;

/// Render one group's fetch results as a console table.
pub fn group_table(group: &GroupRows) -> String {
    let width = NODE_WIDTH + ADDRESS_WIDTH + BALANCE_WIDTH + 2;
    let mut lines = vec![
        format!("Nodes: {}", group.owner),
        format!(
            "{:<NODE_WIDTH$} {:<ADDRESS_WIDTH$} {:>BALANCE_WIDTH$}",
            "NODE", "ADDRESS", "BALANCE"
        ),
        "=".repeat(width),
    ];
    for row in &group.rows {
        let label = if row.label.is_empty() { "-" } else { &row.label };
        lines.push(format!(
            "{label:<NODE_WIDTH$} {:<ADDRESS_WIDTH$} {:>BALANCE_WIDTH$}",
            row.address,
            row.outcome.to_string()
        ));
    }
    lines.join("\n")
}

/// Print one group's fetch results to stdout.
pub fn report_group(group: &GroupRows) {
    println!("{}\n", group_table(group));
}

/// Print rendered report messages to stdout (used when not publishing).
pub fn report_messages(messages: &[String]) {
    for msg in messages {
        println!("{msg}\n");
    }
}

/// Emit the run summary as pretty-printed JSON to stdout.
pub fn report_summary(summary: &RunSummary) {
    if let Ok(json) = serde_json::to_string_pretty(summary) {
        println!("{json}");
    }
}

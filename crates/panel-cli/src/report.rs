//! Terminal rendering of finished executions

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use panel_core::{Execution, NodeStatus};

/// One row per node invocation
pub fn node_table(execution: &Execution) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Node", "Status", "Duration (ms)", "Error"]);

    for record in &execution.node_records {
        let status = match record.status {
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Abandoned => "abandoned",
        };
        table.add_row(vec![
            record.node_id.clone(),
            status.to_string(),
            record
                .duration_ms()
                .map(|ms| ms.to_string())
                .unwrap_or_default(),
            record.error.clone().unwrap_or_default(),
        ]);
    }
    table
}

/// Status line printed above the table
pub fn summary(execution: &Execution) -> String {
    let mut line = format!(
        "Execution {} {} in {} ms",
        execution.id,
        execution.status,
        execution.duration_ms.unwrap_or_default()
    );
    if let Some(error) = &execution.error {
        line.push_str(&format!(": {error}"));
    }
    line
}

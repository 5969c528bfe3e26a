use crate::pipeline::outcome::RunReport;

/// Build a markdown summary of one run.
pub fn build_report(report: &RunReport) -> String {
    let mut lines = vec![
        "# pgshadow Run Report".to_string(),
        String::new(),
        format!("**Outcome:** {}", report.outcome),
        String::new(),
        "## Summary".to_string(),
        String::new(),
        "| Metric | Value |".to_string(),
        "|--------|-------|".to_string(),
        format!(
            "| Principal | {} |",
            report.principal.as_deref().unwrap_or("unknown")
        ),
        format!("| Detector | {} |", report.detector),
        format!("| Catalog functions | {} |", report.discovered),
        format!("| Excluded catalog rows | {} |", report.excluded),
        format!("| Candidates | {} |", report.candidates.len()),
        format!("| Collisions | {} |", report.collisions.len()),
        format!("| Exploitable | {} |", report.exploitable.len()),
        format!("| Deployed | {} |", report.deployed.len()),
        format!("| Left on target | {} |", report.ledger.entries().len()),
    ];

    if !report.candidates.is_empty() {
        lines.push(String::new());
        lines.push("## Candidates".to_string());
        lines.push(String::new());
        lines.push("| Override | Shadows | State |".to_string());
        lines.push("|----------|---------|-------|".to_string());
        for record in &report.candidates {
            lines.push(format!(
                "| `{}` | `{}` | {} |",
                record.key, record.original, record.state
            ));
        }
    }

    if !report.error_log.is_empty() {
        lines.push(String::new());
        lines.push("## Errors".to_string());
        lines.push(String::new());
        for entry in &report.error_log {
            lines.push(format!("- {entry}"));
        }
    }

    if !report.ledger.is_empty() {
        lines.push(String::new());
        lines.push("## Rollback".to_string());
        lines.push(String::new());
        lines.push("Run `drop_functions.sql` to undo every function listed below.".to_string());
        lines.push(String::new());
        for entry in report.ledger.entries() {
            let undo = if entry.inverse.starts_with("DROP") {
                "dropped"
            } else {
                "previous definition restored"
            };
            lines.push(format!("- `{}` ({:?}, {undo})", entry.key, entry.kind));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

//! Plain-text rendering of cycle reports and execution records

use wattson_core::orchestrator::report::UnitOutcome;
use wattson_core::{CycleReport, ExecutionRecord};

const RULE: &str =
    "─────────────────────────────────────────────────────────────────────────────────────────────";

pub fn print_report(number: u32, report: &CycleReport) {
    println!();
    println!(
        "CYCLE {} · {} · {} units{}",
        number,
        report.cycle_id,
        report.counts.units,
        if report.cancelled { " · CANCELLED" } else { "" }
    );
    println!("{RULE}");
    println!(
        "{:<18} {:>6} {:<9} {:<19} {:>5} {:<19} {:<20} {}",
        "UNIT", "SCORE", "TIER", "CAUSE", "CONF", "OUTCOME", "ACTION", "STATUS"
    );
    println!("{RULE}");
    for outcome in &report.outcomes {
        println!("{}", row(outcome));
    }
    println!("{RULE}");

    let c = &report.counts;
    println!(
        "candidates {} · executed {} · escalated {} · deferred {} · normal {} · errors {} · \
         monitoring {}",
        c.candidates, c.executed, c.escalated, c.deferred, c.normal, c.errors, c.monitoring
    );

    if !report.manual_intervention.is_empty() {
        println!();
        println!("⚠ MANUAL INTERVENTION REQUIRED");
        for flagged in &report.manual_intervention {
            println!(
                "   └─ {} {} (command {}): {}",
                flagged.unit_id,
                flagged.action,
                flagged.command_id.as_deref().unwrap_or("-"),
                flagged.reason.as_deref().unwrap_or("rollback failed")
            );
        }
    }
}

fn row(outcome: &UnitOutcome) -> String {
    let dash = || "-".to_string();
    let score = outcome
        .candidate
        .as_ref()
        .map(|c| format!("{:.2}", c.score))
        .unwrap_or_else(dash);
    let tier = outcome
        .candidate
        .as_ref()
        .map(|c| c.tier.to_string())
        .unwrap_or_else(dash);
    let cause = outcome
        .diagnosis
        .as_ref()
        .and_then(|d| d.top_cause())
        .map(|c| c.cause.clone())
        .unwrap_or_else(dash);
    let confidence = outcome
        .diagnosis
        .as_ref()
        .map(|d| format!("{:.2}", d.confidence))
        .unwrap_or_else(dash);
    let decision = outcome
        .decision
        .as_ref()
        .map(|d| d.outcome.to_string())
        .unwrap_or_else(|| "normal".to_string());
    let action = outcome
        .decision
        .as_ref()
        .and_then(|d| d.plan.as_ref())
        .map(|p| p.action.clone())
        .unwrap_or_else(dash);
    let status = match (&outcome.error, &outcome.execution) {
        (Some(error), _) => format!("{}: {}", error.kind, error.message),
        (None, Some(execution)) => execution.status.to_string(),
        (None, None) => String::new(),
    };

    format!(
        "{:<18} {:>6} {:<9} {:<19} {:>5} {:<19} {:<20} {}",
        outcome.unit_id.as_str(),
        score,
        tier,
        cause,
        confidence,
        decision,
        action,
        status
    )
}

pub fn print_records(records: &[ExecutionRecord]) {
    if records.is_empty() {
        return;
    }
    println!();
    println!("EXECUTIONS");
    println!("{RULE}");
    println!(
        "{:<18} {:<20} {:<13} {:>9} {:>9} {}",
        "UNIT", "ACTION", "STATUS", "SIMULATED", "OBSERVED", "NOTE"
    );
    println!("{RULE}");
    for record in records {
        let observed = record
            .observed_delta
            .map(|d| format!("{:+.1}%", d * 100.0))
            .unwrap_or_else(|| "-".to_string());
        let note = record
            .transitions
            .last()
            .and_then(|t| t.note.clone())
            .unwrap_or_default();
        println!(
            "{:<18} {:<20} {:<13} {:>9} {:>9} {}",
            record.unit_id.as_str(),
            record.action,
            record.status.to_string(),
            format!("{:+.1}%", record.simulated_delta * 100.0),
            observed,
            note
        );
    }
    println!("{RULE}");
}

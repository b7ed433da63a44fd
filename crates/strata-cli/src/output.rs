use strata_domain::{Event, Fact, OperationType, Plan, PlanUnit, Run};

/// Render a plan's per-unit changes as human-readable text.
pub fn render_changes(units: &[PlanUnit]) -> String {
    if units.is_empty() {
        return "No changes.".to_string();
    }
    let mut out = String::new();
    for unit in units {
        let symbol = match unit.operation {
            OperationType::Create => '+',
            OperationType::Update => '~',
            OperationType::Delete => '-',
            OperationType::Recreate => '±',
            OperationType::Read | OperationType::Noop => ' ',
        };
        out.push_str(&format!(
            "{symbol} {} ({})\n",
            unit.resource_id, unit.operation
        ));
        for change in &unit.changes {
            out.push_str(&format!("    {}: {} -> {}\n", change.path, change.before, change.after));
        }
    }
    out
}

/// Render a plan's summary counters as human-readable text.
pub fn render_plan_summary(plan: &Plan) -> String {
    let s = &plan.summary;
    format!(
        "plan {}: {} unit(s) — create={} update={} delete={} recreate={} read={} noop={}",
        plan.id, plan.units.len(), s.create, s.update, s.delete, s.recreate, s.read, s.noop
    )
}

/// Render a run's status and counters as human-readable text.
pub fn render_run(run: &Run) -> String {
    let c = &run.counters;
    format!(
        "run {} [{:?}] total={} succeeded={} failed={} skipped={} pending={} running={}",
        run.id, run.status, c.total, c.succeeded, c.failed, c.skipped, c.pending, c.running
    )
}

/// Render an event timeline as human-readable text.
pub fn render_events(events: &[Event]) -> String {
    if events.is_empty() {
        return "No events.".to_string();
    }
    let mut out = String::new();
    for event in events {
        out.push_str(&format!(
            "{} [{:?}] {:?} {}\n",
            event.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            event.severity,
            event.r#type,
            event.message
        ));
    }
    out
}

/// Render a fact list as human-readable text.
pub fn render_facts(facts: &[Fact]) -> String {
    if facts.is_empty() {
        return "No facts.".to_string();
    }
    let mut out = String::new();
    for fact in facts {
        out.push_str(&format!(
            "{}.{} ({}) = {}\n",
            fact.namespace, fact.key, fact.target_id, fact.value
        ));
    }
    out
}

/// Render the DAG levels of a plan as plain text, one line per unit.
pub fn render_graph_text(plan: &Plan) -> String {
    let mut out = String::new();
    for level in 0..plan.graph.depth {
        out.push_str(&format!("level {level}:\n"));
        for unit in plan.units.iter() {
            let Some(node) = plan.graph.nodes.get(&unit.id) else { continue };
            if node.level != level {
                continue;
            }
            out.push_str(&format!("  {} ({})\n", unit.resource_id, unit.operation));
        }
    }
    out
}

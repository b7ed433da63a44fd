use std::collections::BTreeMap;

use strata_domain::{DependencyType, ExecutionGraph, OperationType, PlanUnit};

/// Renders an [`ExecutionGraph`] as Graphviz DOT: one cluster per level,
/// nodes coloured by operation, edges styled by dependency type.
pub fn render_dot(units: &[PlanUnit], graph: &ExecutionGraph) -> String {
    let mut by_level: BTreeMap<u32, Vec<&PlanUnit>> = BTreeMap::new();
    for unit in units {
        let level = unit.execution_order.unwrap_or(0);
        by_level.entry(level).or_default().push(unit);
    }

    let mut out = String::from("digraph strata {\n  rankdir=LR;\n  node [shape=box];\n\n");

    for (level, level_units) in &by_level {
        out.push_str(&format!(
            "  subgraph cluster_level_{level} {{\n    label=\"level {level}\";\n"
        ));
        for unit in level_units {
            out.push_str(&format!(
                "    \"{}\" [label=\"{}\", style=filled, fillcolor={}];\n",
                sanitize(unit.id.as_str()),
                unit.id.as_str(),
                operation_color(unit.operation)
            ));
        }
        out.push_str("  }\n\n");
    }

    for edge in &graph.edges {
        out.push_str(&format!(
            "  \"{}\" -> \"{}\" [style={}];\n",
            sanitize(edge.from.as_str()),
            sanitize(edge.to.as_str()),
            edge_style(edge.kind)
        ));
    }

    out.push('}');
    out
}

fn operation_color(op: OperationType) -> &'static str {
    match op {
        OperationType::Create => "green",
        OperationType::Update => "blue",
        OperationType::Delete | OperationType::Recreate => "red",
        OperationType::Noop | OperationType::Read => "grey",
    }
}

fn edge_style(kind: DependencyType) -> &'static str {
    match kind {
        DependencyType::Require => "solid",
        DependencyType::Notify => "dashed",
        DependencyType::Order => "dotted",
    }
}

fn sanitize(s: &str) -> String {
    s.replace('-', "_").replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::build_graph;
    use strata_domain::{Dependency, PlanUnitId, ResourceId};

    #[test]
    fn renders_clusters_and_edges() {
        let mut units = vec![
            {
                let mut u = PlanUnit::new(ResourceId::new("a"), OperationType::Create);
                u.id = PlanUnitId::new("a");
                u
            },
            {
                let mut u = PlanUnit::new(ResourceId::new("b"), OperationType::Delete);
                u.id = PlanUnitId::new("b");
                u.dependencies.push(Dependency {
                    upstream: PlanUnitId::new("a"),
                    kind: DependencyType::Require,
                });
                u
            },
        ];
        let graph = build_graph(&mut units).unwrap();
        let dot = render_dot(&units, &graph);
        assert!(dot.contains("digraph strata"));
        assert!(dot.contains("cluster_level_0"));
        assert!(dot.contains("cluster_level_1"));
        assert!(dot.contains("fillcolor=green"));
        assert!(dot.contains("fillcolor=red"));
        assert!(dot.contains("style=solid"));
    }
}

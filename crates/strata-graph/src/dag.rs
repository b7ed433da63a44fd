use std::collections::HashMap;

use petgraph::algo::{is_cyclic_directed, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use strata_domain::{ExecutionGraph, GraphEdge, GraphNode, PlanUnit, PlanUnitId};

use crate::error::GraphError;

/// Builds the [`ExecutionGraph`] for a set of plan units and assigns each
/// unit's `execution_order` (its level).
///
/// Forward references are impossible here by construction — the planner
/// only wires a dependency edge to a unit id it has already minted — but a
/// caller handing in an already-assembled unit list could still supply a
/// dangling or cyclic one, so every check below is enforced, not assumed.
pub fn build_graph(units: &mut [PlanUnit]) -> Result<ExecutionGraph, GraphError> {
    let total = units.len();

    // 1. Index units by id, rejecting duplicates.
    let mut index: HashMap<PlanUnitId, usize> = HashMap::with_capacity(total);
    for (i, unit) in units.iter().enumerate() {
        if index.insert(unit.id.clone(), i).is_some() {
            return Err(GraphError::DuplicateUnitId(unit.id.to_string()));
        }
    }

    let mut graph: DiGraph<PlanUnitId, ()> = DiGraph::with_capacity(total, total);
    let mut node_of: HashMap<PlanUnitId, NodeIndex> = HashMap::with_capacity(total);
    for unit in units.iter() {
        node_of.insert(unit.id.clone(), graph.add_node(unit.id.clone()));
    }

    // Adjacency: target -> units that depend on target (dependents), and reverse
    // (dependencies) for the emitted GraphNode.
    let mut dependents: HashMap<PlanUnitId, Vec<PlanUnitId>> =
        units.iter().map(|u| (u.id.clone(), Vec::new())).collect();
    let mut dependencies: HashMap<PlanUnitId, Vec<PlanUnitId>> =
        units.iter().map(|u| (u.id.clone(), Vec::new())).collect();
    let mut edges = Vec::new();

    for unit in units.iter() {
        for dep in &unit.dependencies {
            if !index.contains_key(&dep.upstream) {
                return Err(GraphError::DanglingEdge {
                    from: dep.upstream.to_string(),
                    to: unit.id.to_string(),
                });
            }
            dependents.get_mut(&dep.upstream).unwrap().push(unit.id.clone());
            dependencies.get_mut(&unit.id).unwrap().push(dep.upstream.clone());
            graph.add_edge(node_of[&dep.upstream], node_of[&unit.id], ());
            edges.push(GraphEdge {
                from: dep.upstream.clone(),
                to: unit.id.clone(),
                kind: dep.kind,
            });
        }
    }

    if is_cyclic_directed(&graph) {
        return Err(cycle_error(&graph));
    }

    // 2. Topological order from petgraph, then levels derived from it: a
    // node's level is one past the highest level among its own dependencies,
    // which a single forward pass over the topo order can compute since every
    // dependency of a node precedes it there.
    let topo = toposort(&graph, None).map_err(|_| cycle_error(&graph))?;

    let roots: Vec<PlanUnitId> = units
        .iter()
        .filter(|u| dependencies[&u.id].is_empty())
        .map(|u| u.id.clone())
        .collect();
    if total > 0 && roots.is_empty() {
        return Err(GraphError::NoRoot);
    }

    let mut level_of: HashMap<PlanUnitId, u32> = HashMap::with_capacity(total);
    for node_idx in &topo {
        let id = &graph[*node_idx];
        let level = dependencies[id]
            .iter()
            .map(|upstream| level_of[upstream] + 1)
            .max()
            .unwrap_or(0);
        level_of.insert(id.clone(), level);
    }

    let depth = if total == 0 {
        0
    } else {
        level_of.values().max().copied().unwrap_or(0) + 1
    };

    // 3. Emit nodes and assign execution_order on the input units.
    let mut nodes = HashMap::with_capacity(total);
    for unit in units.iter_mut() {
        let lvl = level_of[&unit.id];
        unit.execution_order = Some(lvl);
        nodes.insert(
            unit.id.clone(),
            GraphNode {
                level: lvl,
                dependencies: dependencies.remove(&unit.id).unwrap_or_default(),
                dependents: dependents.remove(&unit.id).unwrap_or_default(),
            },
        );
    }

    Ok(ExecutionGraph {
        nodes,
        edges,
        roots,
        depth,
    })
}

/// Reconstructs a reportable cycle from the first non-trivial strongly
/// connected component in Tarjan's pass — a single-node component with a
/// self-loop counts too.
fn cycle_error(graph: &DiGraph<PlanUnitId, ()>) -> GraphError {
    for scc in tarjan_scc(graph) {
        let is_cycle = scc.len() > 1
            || scc.first().is_some_and(|&n| graph.contains_edge(n, n));
        if is_cycle {
            let mut path: Vec<String> = scc.iter().map(|&n| graph[n].to_string()).collect();
            if let Some(first) = path.first().cloned() {
                path.push(first);
            }
            return GraphError::CycleDetected { path };
        }
    }
    GraphError::CycleDetected { path: vec![] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_domain::{Dependency, DependencyType, OperationType, ResourceId};

    fn unit(id: &str, deps: &[(&str, DependencyType)]) -> PlanUnit {
        let mut u = PlanUnit::new(ResourceId::new(id), OperationType::Create);
        u.id = PlanUnitId::new(id);
        u.dependencies = deps
            .iter()
            .map(|(up, kind)| Dependency {
                upstream: PlanUnitId::new(*up),
                kind: *kind,
            })
            .collect();
        u
    }

    #[test]
    fn linear_chain_levels_in_order() {
        let mut units = vec![
            unit("a", &[]),
            unit("b", &[("a", DependencyType::Require)]),
            unit("c", &[("b", DependencyType::Require)]),
        ];
        let graph = build_graph(&mut units).unwrap();
        assert_eq!(graph.depth, 3);
        assert_eq!(units[0].execution_order, Some(0));
        assert_eq!(units[1].execution_order, Some(1));
        assert_eq!(units[2].execution_order, Some(2));
        assert_eq!(graph.roots, vec![PlanUnitId::new("a")]);
    }

    #[test]
    fn independent_units_share_level_zero() {
        let mut units = vec![unit("a", &[]), unit("b", &[])];
        let graph = build_graph(&mut units).unwrap();
        assert_eq!(graph.depth, 1);
        assert_eq!(units[0].execution_order, Some(0));
        assert_eq!(units[1].execution_order, Some(0));
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut units = vec![unit("a", &[]), unit("a", &[])];
        let err = build_graph(&mut units).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateUnitId(_)));
    }

    #[test]
    fn dangling_edge_rejected() {
        let mut units = vec![unit("a", &[("missing", DependencyType::Require)])];
        let err = build_graph(&mut units).unwrap_err();
        assert!(matches!(err, GraphError::DanglingEdge { .. }));
    }

    #[test]
    fn two_node_cycle_rejected() {
        let mut units = vec![
            unit("a", &[("b", DependencyType::Require)]),
            unit("b", &[("a", DependencyType::Require)]),
        ];
        let err = build_graph(&mut units).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn self_loop_rejected() {
        let mut units = vec![unit("a", &[("a", DependencyType::Require)])];
        let err = build_graph(&mut units).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn empty_unit_set_is_valid() {
        let mut units: Vec<PlanUnit> = vec![];
        let graph = build_graph(&mut units).unwrap();
        assert_eq!(graph.depth, 0);
        assert!(graph.nodes.is_empty());
    }

    #[test]
    fn diamond_dependency_levels_correctly() {
        let mut units = vec![
            unit("a", &[]),
            unit("b", &[("a", DependencyType::Require)]),
            unit("c", &[("a", DependencyType::Require)]),
            unit(
                "d",
                &[
                    ("b", DependencyType::Require),
                    ("c", DependencyType::Require),
                ],
            ),
        ];
        let graph = build_graph(&mut units).unwrap();
        assert_eq!(units[0].execution_order, Some(0));
        assert_eq!(units[1].execution_order, Some(1));
        assert_eq!(units[2].execution_order, Some(1));
        assert_eq!(units[3].execution_order, Some(2));
        assert_eq!(graph.depth, 3);
    }
}

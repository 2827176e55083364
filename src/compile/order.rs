//! Emission Ordering
//!
//! Depth-first over entity names in sorted order, emitting dependencies
//! before dependents. Only inheritance and non-nullable to-one edges have
//! to be satisfied; a cycle through them is fatal. Other cycles are broken
//! at the first optional edge that would otherwise violate a required one.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::diagnostics::{DiagnosticCode, Diagnostics};
use crate::entity::Entity;
use crate::error::{CompileError, Result};

pub(super) fn emission_order(entities: Vec<Entity>, diagnostics: &mut Diagnostics) -> Result<Vec<Entity>> {
    check_required_cycles(&entities)?;

    let by_name: BTreeMap<String, Entity> = entities
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect();

    let mut walk = Walk {
        by_name: &by_name,
        done: HashSet::new(),
        active: HashSet::new(),
        order: Vec::with_capacity(by_name.len()),
        diagnostics,
    };
    for name in by_name.keys() {
        walk.visit(name);
    }
    let order = walk.order;

    let mut by_name = by_name;
    Ok(order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect())
}

/// Strongly connected components over required edges
fn check_required_cycles(entities: &[Entity]) -> Result<()> {
    let mut graph = DiGraph::<&str, ()>::with_capacity(entities.len(), entities.len() * 2);
    let node_indices: HashMap<&str, _> = entities
        .iter()
        .map(|e| (e.name.as_str(), graph.add_node(e.name.as_str())))
        .collect();

    for entity in entities {
        let from_idx = node_indices[entity.name.as_str()];
        for dep in entity.required_dependencies() {
            if let Some(&to_idx) = node_indices.get(dep) {
                graph.add_edge(from_idx, to_idx, ());
            }
        }
    }

    let cycle = kosaraju_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1)
        .map(|scc| {
            let mut names: Vec<&str> = scc
                .into_iter()
                .filter_map(|idx| graph.node_weight(idx).copied())
                .collect();
            names.sort();
            names
        })
        .min();

    match cycle {
        Some(names) => Err(CompileError::DependencyCycle {
            entities: names.join(", "),
        }),
        None => Ok(()),
    }
}

struct Walk<'e, 'd> {
    by_name: &'e BTreeMap<String, Entity>,
    done: HashSet<&'e str>,
    active: HashSet<&'e str>,
    order: Vec<String>,
    diagnostics: &'d mut Diagnostics,
}

impl<'e, 'd> Walk<'e, 'd> {
    fn visit(&mut self, name: &'e str) {
        if self.done.contains(name) || !self.active.insert(name) {
            return;
        }
        let by_name = self.by_name;
        if let Some(entity) = by_name.get(name) {
            let required = entity.required_dependencies();
            for dep in &entity.dependencies {
                if dep == name {
                    continue;
                }
                match by_name.get_key_value(dep.as_str()) {
                    Some((key, target)) => {
                        // an optional edge into something that needs an active
                        // entity is the back edge to break
                        if required.contains(dep.as_str()) || !self.requires_active(target) {
                            self.visit(key);
                        }
                    }
                    None => self.diagnostics.warning(
                        name,
                        DiagnosticCode::UnresolvedDependency,
                        format!("{} depends on {}, which was never built", name, dep),
                    ),
                }
            }
        }
        self.active.remove(name);
        self.done.insert(name);
        self.order.push(name.to_string());
    }

    /// Does the required closure of `entity` reach an entity on the stack?
    fn requires_active(&self, entity: &'e Entity) -> bool {
        let by_name = self.by_name;
        let mut stack = vec![entity];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            for dep in current.required_dependencies() {
                if self.active.contains(dep) {
                    return true;
                }
                if seen.insert(dep) {
                    stack.extend(by_name.get(dep));
                }
            }
        }
        false
    }
}

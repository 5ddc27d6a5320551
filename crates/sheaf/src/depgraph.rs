//! Dependency resolver
//!
//! Computes the complete transitive closure of required classes for one
//! variant set, split into load-time and run-time dependency kinds, and
//! orders the result topologically with respect to load edges. Dependency
//! facts come from an external collaborator through [`DependencyProvider`].

use std::collections::VecDeque;

use anyhow::{Result, anyhow, bail};
use indexmap::IndexSet;
use log::{debug, trace};
use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{library::LibraryIndex, variants::VariantSet};

/// Direct dependencies of one class under one variant set.
///
/// Load edges must be satisfied before the depending class executes; run
/// edges are required for correct runtime behavior but do not constrain
/// ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassDeps {
    pub load: Vec<String>,
    pub run: Vec<String>,
}

/// External collaborator reporting direct dependency edges of a class under
/// a given variant set.
pub trait DependencyProvider {
    fn deps_of(&self, class_id: &str, variants: &VariantSet) -> Result<ClassDeps>;
}

/// Inputs for one closure computation, all already expanded to concrete
/// class ids.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub smart_include: &'a [String],
    pub explicit_include: &'a [String],
    pub smart_exclude: &'a [String],
    pub explicit_exclude: &'a [String],
}

/// Dependency resolver for one library index and provider.
pub struct Resolver<'a> {
    index: &'a LibraryIndex,
    provider: &'a dyn DependencyProvider,
}

impl std::fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("classes", &self.index.len())
            .finish()
    }
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a LibraryIndex, provider: &'a dyn DependencyProvider) -> Self {
        Self { index, provider }
    }

    /// Compute the dependency-closed, load-ordered class list for one
    /// variant set.
    ///
    /// Smart excludes are sticky: an excluded class is dropped and never
    /// traversed, so anything reachable only through it stays out. Explicit
    /// excludes always win, including over explicit includes.
    pub fn class_list(&self, request: ResolveRequest<'_>, variants: &VariantSet) -> Result<Vec<String>> {
        let closure = self.closure(request, variants)?;
        self.sort_by_load_edges(&closure, variants)
    }

    /// The unordered closure for the given request.
    pub fn closure(
        &self,
        request: ResolveRequest<'_>,
        variants: &VariantSet,
    ) -> Result<IndexSet<String>> {
        let smart_exclude: FxHashSet<&str> =
            request.smart_exclude.iter().map(String::as_str).collect();
        let explicit_exclude: FxHashSet<&str> =
            request.explicit_exclude.iter().map(String::as_str).collect();

        let mut closure = IndexSet::new();
        let mut queue = VecDeque::new();

        // Smart seeds are subject to both exclude lists; explicit seeds are
        // forced past the smart list but still lose to an explicit exclude.
        for id in request.smart_include {
            if !smart_exclude.contains(id.as_str()) && !explicit_exclude.contains(id.as_str()) {
                queue.push_back(id.clone());
            }
        }
        for id in request.explicit_include {
            if !explicit_exclude.contains(id.as_str()) {
                queue.push_back(id.clone());
            }
        }

        while let Some(id) = queue.pop_front() {
            if !closure.insert(id.clone()) {
                continue;
            }
            if !self.index.contains(&id) {
                bail!("unknown class referenced during resolution: {id}");
            }

            let deps = self.provider.deps_of(&id, variants)?;
            trace!(
                "Class {id}: {} load deps, {} run deps",
                deps.load.len(),
                deps.run.len()
            );

            for target in deps.load.iter().chain(deps.run.iter()) {
                if closure.contains(target.as_str()) {
                    continue;
                }
                if smart_exclude.contains(target.as_str())
                    || explicit_exclude.contains(target.as_str())
                {
                    trace!("Dropping excluded dependency {target} of {id}");
                    continue;
                }
                queue.push_back(target.clone());
            }
        }

        debug!("Closure contains {} classes", closure.len());
        Ok(closure)
    }

    /// Order a closure so every load dependency precedes its dependents.
    ///
    /// A cyclic load-dependency graph is a configuration defect and is
    /// reported with one offending cycle path.
    fn sort_by_load_edges(
        &self,
        closure: &IndexSet<String>,
        variants: &VariantSet,
    ) -> Result<Vec<String>> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: FxHashMap<&str, NodeIndex> = FxHashMap::default();

        for id in closure {
            let node = graph.add_node(id.as_str());
            nodes.insert(id.as_str(), node);
        }

        for id in closure {
            let deps = self.provider.deps_of(id, variants)?;
            for target in &deps.load {
                let (Some(&from), Some(&to)) =
                    (nodes.get(target.as_str()), nodes.get(id.as_str()))
                else {
                    // Excluded targets carry no ordering constraint.
                    continue;
                };
                // Edge from dependency to dependent so toposort yields
                // dependencies first.
                if !graph.contains_edge(from, to) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(|n| graph[n].to_owned()).collect()),
            Err(_) => Err(anyhow!(
                "cyclic load dependency: {}",
                describe_cycle(&graph)
            )),
        }
    }
}

/// Extract one cycle path for diagnostics, via iterative three-color DFS.
fn describe_cycle(graph: &DiGraph<&str, ()>) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color = vec![Color::White; graph.node_count()];
    let mut path: Vec<NodeIndex> = Vec::new();

    for start in graph.node_indices() {
        if color[start.index()] != Color::White {
            continue;
        }
        // (node, entered) pairs; entered marks post-order pops.
        let mut stack = vec![(start, false)];
        while let Some((node, entered)) = stack.pop() {
            if entered {
                color[node.index()] = Color::Black;
                path.pop();
                continue;
            }
            if color[node.index()] != Color::White {
                continue;
            }
            color[node.index()] = Color::Gray;
            path.push(node);
            stack.push((node, true));

            for next in graph.neighbors(node) {
                match color[next.index()] {
                    Color::White => stack.push((next, false)),
                    Color::Gray => {
                        let from = path
                            .iter()
                            .position(|&n| n == next)
                            .unwrap_or(0);
                        let mut names: Vec<&str> =
                            path[from..].iter().map(|&n| graph[n]).collect();
                        names.push(graph[next]);
                        return names.join(" -> ");
                    }
                    Color::Black => {}
                }
            }
        }
    }

    "<cycle not reconstructed>".to_owned()
}

//! Recipe dependency graph: cycle detection and deterministic ordering.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::recipe::{RecipeDef, RecipeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
  Unvisited,
  Visiting,
  Done,
}

/// Edges point from a dependency to its dependent.
pub struct RecipeGraph {
  graph: DiGraph<RecipeId, ()>,
  nodes: HashMap<RecipeId, NodeIndex>,
}

impl RecipeGraph {
  /// Build the graph over `selected` (keyed by recipe name). Dependencies
  /// on names missing from `selected` are ignored.
  pub fn from_selection(selected: &BTreeMap<String, RecipeDef>) -> Self {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for recipe in selected.values() {
      let idx = graph.add_node(recipe.id.clone());
      nodes.insert(recipe.id.clone(), idx);
    }

    for recipe in selected.values() {
      let dependent = nodes[&recipe.id];
      let mut seen = BTreeSet::new();
      for req in &recipe.depends {
        if let Some(dep) = selected.get(&req.name)
          && seen.insert(dep.id.clone())
        {
          graph.add_edge(nodes[&dep.id], dependent, ());
        }
      }
    }

    Self { graph, nodes }
  }

  /// Direct dependencies of `id`, sorted.
  pub fn dependencies(&self, id: &RecipeId) -> Vec<RecipeId> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };
    let mut deps: Vec<RecipeId> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|n| self.graph[n].clone())
      .collect();
    deps.sort();
    deps
  }

  /// Find a dependency cycle with a visiting/visited depth-first walk.
  ///
  /// Returns the cycle as a path that starts and ends on the same recipe,
  /// following "depends on" edges.
  pub fn find_cycle(&self) -> Option<Vec<RecipeId>> {
    let mut color: HashMap<NodeIndex, Color> = self.graph.node_indices().map(|n| (n, Color::Unvisited)).collect();

    let mut roots: Vec<NodeIndex> = self.graph.node_indices().collect();
    roots.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

    for root in roots {
      if color[&root] != Color::Unvisited {
        continue;
      }
      let mut stack: Vec<NodeIndex> = Vec::new();
      if let Some(cycle) = self.visit(root, &mut color, &mut stack) {
        return Some(cycle);
      }
    }
    None
  }

  fn visit(
    &self,
    node: NodeIndex,
    color: &mut HashMap<NodeIndex, Color>,
    stack: &mut Vec<NodeIndex>,
  ) -> Option<Vec<RecipeId>> {
    color.insert(node, Color::Visiting);
    stack.push(node);

    // Walk "depends on" edges, i.e. incoming edges of this graph.
    let mut deps: Vec<NodeIndex> = self.graph.neighbors_directed(node, Direction::Incoming).collect();
    deps.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

    for dep in deps {
      match color[&dep] {
        Color::Visiting => {
          let start = stack.iter().position(|n| *n == dep).unwrap_or(0);
          let mut path: Vec<RecipeId> = stack[start..].iter().map(|n| self.graph[*n].clone()).collect();
          path.push(self.graph[dep].clone());
          return Some(path);
        }
        Color::Unvisited => {
          if let Some(cycle) = self.visit(dep, color, stack) {
            return Some(cycle);
          }
        }
        Color::Done => {}
      }
    }

    stack.pop();
    color.insert(node, Color::Done);
    None
  }

  /// Kahn's algorithm with a sorted ready set, so ties break by `name@version`.
  ///
  /// Only meaningful on an acyclic graph; nodes on a cycle are left out.
  pub fn topological_order(&self) -> Vec<RecipeId> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
      .collect();

    let mut ready: BTreeSet<(RecipeId, NodeIndex)> = in_degree
      .iter()
      .filter(|(_, deg)| **deg == 0)
      .map(|(n, _)| (self.graph[*n].clone(), *n))
      .collect();

    let mut order = Vec::with_capacity(self.graph.node_count());
    while let Some((id, node)) = ready.pop_first() {
      order.push(id);
      for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
        if let Some(deg) = in_degree.get_mut(&dependent) {
          *deg -= 1;
          if *deg == 0 {
            ready.insert((self.graph[dependent].clone(), dependent));
          }
        }
      }
    }
    order
  }
}

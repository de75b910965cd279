use std::collections::VecDeque;
use std::marker::PhantomData;

use fixedbitset::FixedBitSet;

use crate::adjacency_list::AdjacencyList;
use crate::adjacency_list::SerializedAdjacencyList;
use crate::types::Edge;
use crate::types::EdgeType;
use crate::types::EdgeTypeQuery;
use crate::types::NodeId;

/// Controls a traversal from inside a visitor.
#[derive(Debug, Default)]
pub struct TraversalActions {
  skip_children: bool,
  stop: bool,
}

impl TraversalActions {
  /// Do not descend into the children of the node being entered.
  pub fn skip_children(&mut self) {
    self.skip_children = true;
  }

  /// Ends the traversal once the current hook returns.
  pub fn stop(&mut self) {
    self.stop = true;
  }
}

/// Hooks invoked by [`Graph::traverse_with`].
///
/// `enter` receives the context produced by the closest ancestor that returned one and may return
/// a new context for its own children. Contexts never flow between siblings.
pub trait GraphVisitor<N, C> {
  fn enter(
    &mut self,
    node_id: NodeId,
    node: &N,
    context: Option<&C>,
    actions: &mut TraversalActions,
  ) -> Option<C>;

  fn exit(&mut self, _node_id: NodeId, _node: &N, _actions: &mut TraversalActions) {}
}

struct VisitFn<F>(F);

impl<N, F> GraphVisitor<N, ()> for VisitFn<F>
where
  F: FnMut(NodeId, &N, &mut TraversalActions),
{
  fn enter(
    &mut self,
    node_id: NodeId,
    node: &N,
    _context: Option<&()>,
    actions: &mut TraversalActions,
  ) -> Option<()> {
    (self.0)(node_id, node, actions);
    None
  }
}

#[derive(Default)]
struct ExitOrder(Vec<NodeId>);

impl<N> GraphVisitor<N, ()> for ExitOrder {
  fn enter(&mut self, _: NodeId, _: &N, _: Option<&()>, _: &mut TraversalActions) -> Option<()> {
    None
  }

  fn exit(&mut self, node_id: NodeId, _node: &N, _actions: &mut TraversalActions) {
    self.0.push(node_id);
  }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Direction {
  Outgoing,
  Incoming,
}

enum Step<C> {
  Enter(NodeId, Option<C>),
  Exit(NodeId),
}

/// A directed graph of `N` payloads over an [`AdjacencyList`].
///
/// Node ids are never reused. Removing a node leaves a hole so ids held elsewhere (bitsets,
/// lookup maps) stay meaningful.
#[derive(Clone, Debug)]
pub struct Graph<N, E = u32> {
  nodes: Vec<Option<N>>,
  adjacency_list: AdjacencyList,
  root_node_id: Option<NodeId>,
  _edge_type: PhantomData<E>,
}

impl<N, E: EdgeType> Default for Graph<N, E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<N, E: EdgeType> Graph<N, E> {
  pub fn new() -> Self {
    Self {
      nodes: Vec::new(),
      adjacency_list: AdjacencyList::new(),
      root_node_id: None,
      _edge_type: PhantomData,
    }
  }

  pub fn add_node(&mut self, node: N) -> NodeId {
    let node_id = self.adjacency_list.add_node();
    debug_assert_eq!(node_id.index(), self.nodes.len());
    self.nodes.push(Some(node));
    node_id
  }

  pub fn has_node(&self, node_id: NodeId) -> bool {
    self
      .nodes
      .get(node_id.index())
      .is_some_and(|node| node.is_some())
  }

  fn assert_has_node(&self, node_id: NodeId) {
    assert!(self.has_node(node_id), "Does not have node {node_id}");
  }

  pub fn get_node(&self, node_id: NodeId) -> Option<&N> {
    self.nodes.get(node_id.index()).and_then(Option::as_ref)
  }

  pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut N> {
    self.nodes.get_mut(node_id.index()).and_then(Option::as_mut)
  }

  pub fn update_node(&mut self, node_id: NodeId, node: N) {
    self.assert_has_node(node_id);
    self.nodes[node_id.index()] = Some(node);
  }

  /// Number of live nodes.
  pub fn node_count(&self) -> usize {
    self.nodes.iter().filter(|node| node.is_some()).count()
  }

  /// One past the largest id ever issued; the size needed for a bitset over node ids.
  pub fn node_id_bound(&self) -> usize {
    self.nodes.len()
  }

  pub fn edge_count(&self) -> usize {
    self.adjacency_list.edge_count()
  }

  /// Live nodes in id order.
  pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> + '_ {
    self
      .nodes
      .iter()
      .enumerate()
      .filter_map(|(index, node)| node.as_ref().map(|node| (NodeId::new(index as u32), node)))
  }

  pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
    self.nodes().map(|(node_id, _)| node_id)
  }

  pub fn root_node_id(&self) -> Option<NodeId> {
    self.root_node_id
  }

  pub fn set_root_node_id(&mut self, node_id: NodeId) {
    self.assert_has_node(node_id);
    self.root_node_id = Some(node_id);
  }

  pub fn add_edge(&mut self, from: NodeId, to: NodeId, edge_type: E) -> bool {
    assert!(self.has_node(from), "\"from\" node '{from}' not found");
    assert!(self.has_node(to), "\"to\" node '{to}' not found");
    self.adjacency_list.add_edge(from, to, edge_type)
  }

  pub fn has_edge(&self, from: NodeId, to: NodeId, query: EdgeTypeQuery<'_, E>) -> bool {
    assert!(self.has_node(from), "\"from\" node '{from}' not found");
    assert!(self.has_node(to), "\"to\" node '{to}' not found");
    self.adjacency_list.has_edge(from, to, query)
  }

  pub fn get_node_ids_connected_from(
    &self,
    node_id: NodeId,
    query: EdgeTypeQuery<'_, E>,
  ) -> Vec<NodeId> {
    self.assert_has_node(node_id);
    self.adjacency_list.get_nodes_connected_from(node_id, query)
  }

  pub fn get_node_ids_connected_to(
    &self,
    node_id: NodeId,
    query: EdgeTypeQuery<'_, E>,
  ) -> Vec<NodeId> {
    self.assert_has_node(node_id);
    self.adjacency_list.get_nodes_connected_to(node_id, query)
  }

  pub fn get_all_edges(&self) -> impl Iterator<Item = Edge<E>> + '_ {
    self.adjacency_list.get_all_edges().map(|edge| Edge {
      from: edge.from,
      to: edge.to,
      edge_type: E::from_raw(edge.edge_type),
    })
  }

  /// True when nothing connects the node back to the root, or when there is no root and the
  /// node has no incoming edges at all.
  pub fn is_orphaned_node(&self, node_id: NodeId) -> bool {
    if !self.has_node(node_id) {
      return false;
    }

    let Some(root_node_id) = self.root_node_id else {
      return self
        .adjacency_list
        .get_nodes_connected_to(node_id, EdgeTypeQuery::<E>::All)
        .is_empty();
    };

    if node_id == root_node_id {
      return false;
    }

    let mut visited = FixedBitSet::with_capacity(self.nodes.len());
    let mut stack = vec![node_id];
    visited.insert(node_id.index());
    while let Some(current) = stack.pop() {
      for parent in self
        .adjacency_list
        .get_nodes_connected_to(current, EdgeTypeQuery::<E>::All)
      {
        if parent == root_node_id {
          return false;
        }
        if !visited.put(parent.index()) {
          stack.push(parent);
        }
      }
    }

    true
  }

  /// Removes a node and every descendant left orphaned by it.
  ///
  /// Returns the ids of all removed nodes, starting with `node_id`.
  pub fn remove_node(&mut self, node_id: NodeId) -> Vec<NodeId> {
    self.assert_has_node(node_id);

    let mut removed = Vec::new();
    let mut pending = vec![node_id];

    while let Some(current) = pending.pop() {
      if !self.has_node(current) {
        continue;
      }

      for edge in self.adjacency_list.get_inbound_edges(current) {
        self
          .adjacency_list
          .remove_edge(edge.from, current, edge.edge_type);
      }

      let outbound = self.adjacency_list.get_outbound_edges(current);
      for edge in &outbound {
        self
          .adjacency_list
          .remove_edge(current, edge.to, edge.edge_type);
      }

      self.nodes[current.index()] = None;
      if self.root_node_id == Some(current) {
        self.root_node_id = None;
      }
      removed.push(current);

      for edge in outbound {
        if self.is_orphaned_node(edge.to) {
          pending.push(edge.to);
        }
      }
    }

    removed
  }

  /// Removes an edge that must exist, optionally removing `to` if that leaves it orphaned.
  ///
  /// Returns the ids of any nodes removed as a result.
  pub fn remove_edge(
    &mut self,
    from: NodeId,
    to: NodeId,
    edge_type: E,
    remove_orphans: bool,
  ) -> Vec<NodeId> {
    assert!(
      self.adjacency_list.has_edge(from, to, EdgeTypeQuery::Type(edge_type)),
      "Edge from {from} to {to} not found!"
    );

    self.adjacency_list.remove_edge(from, to, edge_type);

    if remove_orphans && self.is_orphaned_node(to) {
      self.remove_node(to)
    } else {
      Vec::new()
    }
  }

  /// Makes `to_node_ids` the exact set of `edge_type` children of `from`.
  ///
  /// Missing edges are added first, then stale ones removed with orphan pruning. When
  /// `replace_filter` is given, only existing children it accepts are candidates for removal.
  pub fn replace_node_ids_connected_to(
    &mut self,
    from: NodeId,
    to_node_ids: &[NodeId],
    replace_filter: Option<&dyn Fn(NodeId) -> bool>,
    edge_type: E,
  ) -> Vec<NodeId> {
    self.assert_has_node(from);

    let mut children_to_remove: Vec<NodeId> = self
      .adjacency_list
      .get_nodes_connected_from(from, EdgeTypeQuery::Type(edge_type))
      .into_iter()
      .filter(|child| replace_filter.map_or(true, |filter| filter(*child)))
      .collect();

    for to in to_node_ids {
      children_to_remove.retain(|child| child != to);
      if !self.has_edge(from, *to, EdgeTypeQuery::Type(edge_type)) {
        self.add_edge(from, *to, edge_type);
      }
    }

    let mut removed = Vec::new();
    for child in children_to_remove {
      // An earlier removal may already have pruned it.
      if self.has_node(child) && self.has_edge(from, child, EdgeTypeQuery::Type(edge_type)) {
        removed.extend(self.remove_edge(from, child, edge_type, true));
      }
    }
    removed
  }

  fn neighbours(
    &self,
    node_id: NodeId,
    query: EdgeTypeQuery<'_, E>,
    direction: Direction,
  ) -> Vec<NodeId> {
    match direction {
      Direction::Outgoing => self.adjacency_list.get_nodes_connected_from(node_id, query),
      Direction::Incoming => self.adjacency_list.get_nodes_connected_to(node_id, query),
    }
  }

  /// Depth-first walk over every start node, sharing one visited set.
  ///
  /// Children are visited in edge insertion order; a node's `exit` runs after all of its
  /// children have exited and is skipped when its children were skipped.
  fn dfs<C: Clone, V: GraphVisitor<N, C>>(
    &self,
    start_node_ids: &[NodeId],
    query: EdgeTypeQuery<'_, E>,
    direction: Direction,
    visitor: &mut V,
  ) {
    let mut visited = FixedBitSet::with_capacity(self.nodes.len());
    let mut actions = TraversalActions::default();

    for start in start_node_ids {
      self.assert_has_node(*start);
      if visited.contains(start.index()) {
        continue;
      }

      let mut stack = vec![Step::Enter(*start, None::<C>)];
      while let Some(step) = stack.pop() {
        match step {
          Step::Enter(node_id, context) => {
            if visited.put(node_id.index()) {
              continue;
            }
            let Some(node) = self.get_node(node_id) else {
              continue;
            };

            let next_context = visitor.enter(node_id, node, context.as_ref(), &mut actions);
            if actions.stop {
              return;
            }
            if actions.skip_children {
              actions.skip_children = false;
              continue;
            }

            let context = next_context.or(context);
            stack.push(Step::Exit(node_id));
            for child in self.neighbours(node_id, query, direction).into_iter().rev() {
              if !visited.contains(child.index()) {
                stack.push(Step::Enter(child, context.clone()));
              }
            }
          }
          Step::Exit(node_id) => {
            if let Some(node) = self.get_node(node_id) {
              visitor.exit(node_id, node, &mut actions);
              if actions.stop {
                return;
              }
            }
          }
        }
      }
    }
  }

  /// Visits descendants of `start` (inclusive) along edges matching `query`.
  pub fn traverse<F>(&self, start: NodeId, query: EdgeTypeQuery<'_, E>, visit: F)
  where
    F: FnMut(NodeId, &N, &mut TraversalActions),
  {
    self.dfs(&[start], query, Direction::Outgoing, &mut VisitFn(visit));
  }

  pub fn traverse_with<C: Clone, V: GraphVisitor<N, C>>(
    &self,
    start: NodeId,
    query: EdgeTypeQuery<'_, E>,
    visitor: &mut V,
  ) {
    self.dfs(&[start], query, Direction::Outgoing, visitor);
  }

  /// Visits ancestors of `start` (inclusive) along incoming edges matching `query`.
  pub fn traverse_ancestors<F>(&self, start: NodeId, query: EdgeTypeQuery<'_, E>, visit: F)
  where
    F: FnMut(NodeId, &N, &mut TraversalActions),
  {
    self.dfs(&[start], query, Direction::Incoming, &mut VisitFn(visit));
  }

  /// Breadth-first walk from the root, returning the first node `visit` accepts.
  pub fn bfs<F>(&self, query: EdgeTypeQuery<'_, E>, mut visit: F) -> Option<NodeId>
  where
    F: FnMut(NodeId, &N) -> bool,
  {
    let root_node_id = self.root_node_id?;
    let mut visited = FixedBitSet::with_capacity(self.nodes.len());
    let mut queue = VecDeque::from([root_node_id]);
    visited.insert(root_node_id.index());

    while let Some(node_id) = queue.pop_front() {
      let Some(node) = self.get_node(node_id) else {
        continue;
      };
      if visit(node_id, node) {
        return Some(node_id);
      }
      for child in self.adjacency_list.get_nodes_connected_from(node_id, query) {
        if !visited.put(child.index()) {
          queue.push_back(child);
        }
      }
    }

    None
  }

  /// Nodes ordered so that every node precedes its descendants.
  ///
  /// Walks from the root when one is set, otherwise from every node in id order.
  pub fn topo_sort(&self, query: EdgeTypeQuery<'_, E>) -> Vec<NodeId> {
    let starts: Vec<NodeId> = match self.root_node_id {
      Some(root_node_id) => vec![root_node_id],
      None => self.node_ids().collect(),
    };

    let mut order = ExitOrder::default();
    self.dfs(&starts, query, Direction::Outgoing, &mut order);
    order.0.reverse();
    order.0
  }

  pub fn find_ancestor<F>(&self, node_id: NodeId, mut predicate: F) -> Option<NodeId>
  where
    F: FnMut(NodeId, &N) -> bool,
  {
    let mut found = None;
    self.traverse_ancestors(node_id, EdgeTypeQuery::All, |id, node, actions| {
      if predicate(id, node) {
        found = Some(id);
        actions.stop();
      }
    });
    found
  }

  /// Closest matching ancestors; the walk does not continue above a match.
  pub fn find_ancestors<F>(&self, node_id: NodeId, mut predicate: F) -> Vec<NodeId>
  where
    F: FnMut(NodeId, &N) -> bool,
  {
    let mut found = Vec::new();
    self.traverse_ancestors(node_id, EdgeTypeQuery::All, |id, node, actions| {
      if predicate(id, node) {
        found.push(id);
        actions.skip_children();
      }
    });
    found
  }

  pub fn find_descendant<F>(&self, node_id: NodeId, mut predicate: F) -> Option<NodeId>
  where
    F: FnMut(NodeId, &N) -> bool,
  {
    let mut found = None;
    self.traverse(node_id, EdgeTypeQuery::All, |id, node, actions| {
      if predicate(id, node) {
        found = Some(id);
        actions.stop();
      }
    });
    found
  }

  /// Closest matching descendants; the walk does not continue below a match.
  pub fn find_descendants<F>(&self, node_id: NodeId, mut predicate: F) -> Vec<NodeId>
  where
    F: FnMut(NodeId, &N) -> bool,
  {
    let mut found = Vec::new();
    self.traverse(node_id, EdgeTypeQuery::All, |id, node, actions| {
      if predicate(id, node) {
        found.push(id);
        actions.skip_children();
      }
    });
    found
  }

  /// Shares the edge storage; payloads stay with the caller.
  pub fn serialize_edges(&self) -> SerializedAdjacencyList {
    self.adjacency_list.serialize()
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn chain(graph: &mut Graph<&'static str>, names: &[&'static str]) -> Vec<NodeId> {
    let ids: Vec<NodeId> = names.iter().map(|name| graph.add_node(*name)).collect();
    for pair in ids.windows(2) {
      graph.add_edge(pair[0], pair[1], 1);
    }
    ids
  }

  #[test]
  fn nodes_can_be_updated_and_enumerated() {
    let mut graph = Graph::<&str>::new();
    let a = graph.add_node("a");
    let b = graph.add_node("b");
    graph.update_node(b, "bee");

    assert_eq!(graph.get_node(a), Some(&"a"));
    assert_eq!(graph.nodes().collect::<Vec<_>>(), vec![(a, &"a"), (b, &"bee")]);
  }

  #[test]
  #[should_panic(expected = "\"to\" node '7' not found")]
  fn add_edge_requires_both_nodes() {
    let mut graph = Graph::<&str>::new();
    let a = graph.add_node("a");
    graph.add_edge(a, NodeId::new(7), 1);
  }

  #[test]
  #[should_panic(expected = "\"from\" node '3' not found")]
  fn has_edge_requires_both_nodes() {
    let mut graph = Graph::<&str>::new();
    let ids = chain(&mut graph, &["a", "b", "c", "d"]);
    graph.remove_node(ids[3]);
    graph.has_edge(ids[3], ids[0], EdgeTypeQuery::All);
  }

  #[test]
  #[should_panic(expected = "Edge from 0 to 1 not found!")]
  fn remove_edge_requires_the_edge() {
    let mut graph = Graph::<&str>::new();
    let a = graph.add_node("a");
    let b = graph.add_node("b");
    graph.remove_edge(a, b, 1, true);
  }

  #[test]
  fn remove_node_prunes_only_unreachable_descendants() {
    let mut graph = Graph::<&str>::new();
    let root = graph.add_node("root");
    graph.set_root_node_id(root);
    let ids = chain(&mut graph, &["a", "b", "c"]);
    let shared = graph.add_node("shared");
    let other = graph.add_node("other");
    graph.add_edge(root, ids[0], 1);
    graph.add_edge(root, other, 1);
    graph.add_edge(ids[1], shared, 1);
    graph.add_edge(other, shared, 1);

    let removed = graph.remove_node(ids[0]);

    assert_eq!(removed, vec![ids[0], ids[1], ids[2]]);
    assert!(graph.has_node(shared));
    assert!(graph.has_node(other));
    assert_eq!(graph.node_count(), 3);
  }

  #[test]
  fn remove_node_handles_cycles() {
    let mut graph = Graph::<&str>::new();
    let root = graph.add_node("root");
    graph.set_root_node_id(root);
    let ids = chain(&mut graph, &["a", "b", "c"]);
    graph.add_edge(root, ids[0], 1);
    graph.add_edge(ids[2], ids[1], 1);

    let removed = graph.remove_node(ids[0]);

    assert_eq!(removed.len(), 3);
    assert_eq!(graph.node_ids().collect::<Vec<_>>(), vec![root]);
  }

  #[test]
  fn remove_edge_without_root_prunes_nodes_without_parents() {
    let mut graph = Graph::<&str>::new();
    let ids = chain(&mut graph, &["a", "b", "c"]);
    let d = graph.add_node("d");
    graph.add_edge(d, ids[2], 1);

    let removed = graph.remove_edge(ids[0], ids[1], 1, true);

    assert_eq!(removed, vec![ids[1]]);
    assert!(graph.has_node(ids[2]));
    assert!(graph.is_orphaned_node(ids[0]));
  }

  #[test]
  fn remove_edge_can_keep_orphans() {
    let mut graph = Graph::<&str>::new();
    let ids = chain(&mut graph, &["a", "b"]);

    assert_eq!(graph.remove_edge(ids[0], ids[1], 1, false), vec![]);
    assert!(graph.has_node(ids[1]));
  }

  #[test]
  fn replace_node_ids_connected_to_diffs_children() {
    let mut graph = Graph::<&str>::new();
    let root = graph.add_node("root");
    graph.set_root_node_id(root);
    let a = graph.add_node("a");
    let b = graph.add_node("b");
    let c = graph.add_node("c");
    let keep = graph.add_node("keep");
    graph.add_edge(root, a, 1);
    graph.add_edge(root, b, 1);
    graph.add_edge(root, keep, 1);

    let removed = graph.replace_node_ids_connected_to(root, &[b, c], Some(&|id| id != keep), 1);

    assert_eq!(removed, vec![a]);
    assert_eq!(
      graph.get_node_ids_connected_from(root, EdgeTypeQuery::All),
      vec![b, keep, c]
    );
  }

  #[test]
  fn traverse_visits_in_edge_order_and_honors_actions() {
    let mut graph = Graph::<&str>::new();
    let root = graph.add_node("root");
    let a = graph.add_node("a");
    let a1 = graph.add_node("a1");
    let b = graph.add_node("b");
    let b1 = graph.add_node("b1");
    let c = graph.add_node("c");
    graph.add_edge(root, a, 1);
    graph.add_edge(a, a1, 1);
    graph.add_edge(root, b, 1);
    graph.add_edge(b, b1, 1);
    graph.add_edge(root, c, 1);

    let mut seen = Vec::new();
    graph.traverse(root, EdgeTypeQuery::All, |_, name, actions| {
      seen.push(*name);
      if *name == "b" {
        actions.skip_children();
      }
      if *name == "c" {
        actions.stop();
      }
    });

    assert_eq!(seen, vec!["root", "a", "a1", "b", "c"]);
  }

  #[test]
  fn traverse_filters_edge_types() {
    let mut graph = Graph::<&str>::new();
    let root = graph.add_node("root");
    let sync = graph.add_node("sync");
    let lazy = graph.add_node("lazy");
    graph.add_edge(root, sync, 1);
    graph.add_edge(root, lazy, 2);

    let mut seen = Vec::new();
    graph.traverse(root, EdgeTypeQuery::Type(1), |_, name, _| seen.push(*name));

    assert_eq!(seen, vec!["root", "sync"]);
  }

  struct Depths {
    entered: Vec<(&'static str, usize)>,
    exited: Vec<&'static str>,
  }

  impl GraphVisitor<&'static str, usize> for Depths {
    fn enter(
      &mut self,
      _node_id: NodeId,
      node: &&'static str,
      context: Option<&usize>,
      _actions: &mut TraversalActions,
    ) -> Option<usize> {
      let depth = context.map_or(0, |depth| depth + 1);
      self.entered.push((*node, depth));
      Some(depth)
    }

    fn exit(&mut self, _node_id: NodeId, node: &&'static str, _actions: &mut TraversalActions) {
      self.exited.push(*node);
    }
  }

  #[test]
  fn context_flows_to_children_but_not_siblings() {
    let mut graph = Graph::<&'static str>::new();
    let root = graph.add_node("root");
    let a = graph.add_node("a");
    let a1 = graph.add_node("a1");
    let b = graph.add_node("b");
    graph.add_edge(root, a, 1);
    graph.add_edge(a, a1, 1);
    graph.add_edge(root, b, 1);

    let mut visitor = Depths {
      entered: Vec::new(),
      exited: Vec::new(),
    };
    graph.traverse_with(root, EdgeTypeQuery::All, &mut visitor);

    assert_eq!(
      visitor.entered,
      vec![("root", 0), ("a", 1), ("a1", 2), ("b", 1)]
    );
    assert_eq!(visitor.exited, vec!["a1", "a", "b", "root"]);
  }

  #[test]
  fn topo_sort_orders_parents_before_children() {
    let mut graph = Graph::<&str>::new();
    let root = graph.add_node("root");
    graph.set_root_node_id(root);
    let a = graph.add_node("a");
    let b = graph.add_node("b");
    let c = graph.add_node("c");
    graph.add_edge(root, a, 1);
    graph.add_edge(root, b, 1);
    graph.add_edge(a, c, 1);
    graph.add_edge(b, c, 1);
    graph.add_edge(b, a, 1);

    assert_eq!(graph.topo_sort(EdgeTypeQuery::All), vec![root, b, a, c]);
  }

  #[test]
  fn bfs_finds_nearest_match_from_root() {
    let mut graph = Graph::<&str>::new();
    let root = graph.add_node("root");
    graph.set_root_node_id(root);
    let ids = chain(&mut graph, &["x", "deep"]);
    let shallow = graph.add_node("shallow");
    graph.add_edge(root, ids[0], 1);
    graph.add_edge(root, shallow, 1);

    assert_eq!(
      graph.bfs(EdgeTypeQuery::All, |_, name| name.starts_with("shallow") || *name == "deep"),
      Some(shallow)
    );
  }

  #[test]
  fn ancestor_and_descendant_queries() {
    let mut graph = Graph::<&str>::new();
    let ids = chain(&mut graph, &["entry", "bundle", "a", "bundle2", "b"]);

    assert_eq!(
      graph.find_ancestor(ids[4], |_, name| name.starts_with("bundle")),
      Some(ids[3])
    );
    assert_eq!(
      graph.find_ancestors(ids[4], |_, name| name.starts_with("bundle")),
      vec![ids[3]]
    );
    assert_eq!(
      graph.find_descendant(ids[0], |_, name| *name == "a"),
      Some(ids[2])
    );
    assert_eq!(
      graph.find_descendants(ids[0], |_, name| name.starts_with("bundle")),
      vec![ids[1]]
    );
  }
}

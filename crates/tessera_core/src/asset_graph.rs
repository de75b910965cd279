use std::sync::Arc;

use tessera_graph::ContentGraph;
use tessera_graph::EdgeTypeQuery;
use tessera_graph::GraphVisitor;
use tessera_graph::NodeId;
use tessera_graph::TraversalActions;

use crate::as_variant_impl;
use crate::types::Asset;
use crate::types::Dependency;

const ROOT_CONTENT_KEY: &str = "@@root";

/// Edges of the asset graph carry no meaning beyond "depends on", so they share one type.
const DEPENDS_ON: u32 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum AssetGraphNode {
  Root,
  Asset(Arc<Asset>),
  Dependency(Arc<Dependency>),
}

as_variant_impl!(AssetGraphNode, as_asset, Asset, Arc<Asset>);
as_variant_impl!(AssetGraphNode, as_dependency, Dependency, Arc<Dependency>);

/// The graph of assets and the dependencies between them, as produced by transformation
///
/// Assets and dependencies alternate: the root points at entry dependencies, a dependency points
/// at the assets it resolved to and an asset points at the dependencies found in it. Nodes are
/// keyed by their ids, so adding an asset or dependency a second time replaces the first.
#[derive(Clone, Debug)]
pub struct AssetGraph {
  graph: ContentGraph<AssetGraphNode>,
  root_node_id: NodeId,
}

impl Default for AssetGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl AssetGraph {
  pub fn new() -> Self {
    let mut graph = ContentGraph::new();
    let root_node_id = graph.add_node_by_content_key(ROOT_CONTENT_KEY, AssetGraphNode::Root);
    graph.set_root_node_id(root_node_id);

    AssetGraph {
      graph,
      root_node_id,
    }
  }

  pub fn root_node(&self) -> NodeId {
    self.root_node_id
  }

  pub fn get_node(&self, node_id: NodeId) -> Option<&AssetGraphNode> {
    self.graph.get_node(node_id)
  }

  pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &AssetGraphNode)> + '_ {
    self.graph.nodes()
  }

  pub fn node_count(&self) -> usize {
    self.graph.node_count()
  }

  /// Looks up an asset or dependency node by its id.
  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<NodeId> {
    self.graph.get_node_id_by_content_key(content_key)
  }

  fn add_node(&mut self, content_key: &str, node: AssetGraphNode) -> NodeId {
    match self.graph.get_node_id_by_content_key(content_key) {
      Some(existing_node_id) => {
        self.graph.update_node(existing_node_id, node);
        existing_node_id
      }
      None => self.graph.add_node_by_content_key(content_key, node),
    }
  }

  pub fn add_asset(&mut self, asset: Arc<Asset>) -> NodeId {
    let content_key = asset.id.clone();
    self.add_node(&content_key, AssetGraphNode::Asset(asset))
  }

  pub fn get_asset_node(&self, node_id: NodeId) -> Option<&Arc<Asset>> {
    self.get_node(node_id)?.as_asset()
  }

  pub fn add_dependency(&mut self, dependency: Dependency) -> NodeId {
    let content_key = dependency.id.clone();
    self.add_node(
      &content_key,
      AssetGraphNode::Dependency(Arc::new(dependency)),
    )
  }

  pub fn get_dependency_node(&self, node_id: NodeId) -> Option<&Arc<Dependency>> {
    self.get_node(node_id)?.as_dependency()
  }

  pub fn get_dependency_nodes(&self) -> Vec<&Arc<Dependency>> {
    self
      .graph
      .nodes()
      .filter_map(|(_, node)| node.as_dependency())
      .collect()
  }

  /// Adds a dependency hanging directly off the root.
  pub fn add_entry_dependency(&mut self, dependency: Dependency) -> NodeId {
    let dependency_node_id = self.add_dependency(dependency);
    self.add_edge(self.root_node_id, dependency_node_id);
    dependency_node_id
  }

  pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
    self
      .graph
      .has_edge(from, to, EdgeTypeQuery::Type(DEPENDS_ON))
  }

  pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
    self.graph.add_edge(from, to, DEPENDS_ON);
  }

  pub fn get_node_ids_connected_from(&self, node_id: NodeId) -> Vec<NodeId> {
    self
      .graph
      .get_node_ids_connected_from(node_id, EdgeTypeQuery::All)
  }

  /// Dependencies found in an asset, in the order they were added.
  pub fn get_outgoing_dependencies(&self, asset_node_id: NodeId) -> Vec<NodeId> {
    self
      .graph
      .get_node_ids_connected_from(asset_node_id, EdgeTypeQuery::All)
      .into_iter()
      .filter(|node_id| self.get_dependency_node(*node_id).is_some())
      .collect()
  }

  /// Assets a dependency resolved to, usually exactly one.
  pub fn get_dependency_assets(&self, dependency_node_id: NodeId) -> Vec<NodeId> {
    self
      .graph
      .get_node_ids_connected_from(dependency_node_id, EdgeTypeQuery::All)
      .into_iter()
      .filter(|node_id| self.get_asset_node(*node_id).is_some())
      .collect()
  }

  pub fn resolve_dependency_asset(&self, dependency_node_id: NodeId) -> Option<NodeId> {
    self
      .get_dependency_assets(dependency_node_id)
      .into_iter()
      .next()
  }

  /// Dependencies that resolved to an asset.
  pub fn get_incoming_dependencies(&self, asset_node_id: NodeId) -> Vec<NodeId> {
    self
      .graph
      .get_node_ids_connected_to(asset_node_id, EdgeTypeQuery::All)
      .into_iter()
      .filter(|node_id| self.get_dependency_node(*node_id).is_some())
      .collect()
  }

  /// The asset a dependency was found in, which entry dependencies do not have.
  pub fn get_asset_with_dependency(&self, dependency_node_id: NodeId) -> Option<NodeId> {
    self
      .graph
      .get_node_ids_connected_to(dependency_node_id, EdgeTypeQuery::All)
      .into_iter()
      .find(|node_id| self.get_asset_node(*node_id).is_some())
  }

  /// Entry dependencies paired with the assets they resolved to.
  pub fn get_entries(&self) -> Vec<(NodeId, NodeId)> {
    let mut entries = Vec::new();

    for dependency_node_id in self
      .graph
      .get_node_ids_connected_from(self.root_node(), EdgeTypeQuery::All)
    {
      let is_entry = self
        .get_dependency_node(dependency_node_id)
        .is_some_and(|dependency| dependency.is_entry);

      if !is_entry {
        continue;
      }

      for asset_node_id in self.get_dependency_assets(dependency_node_id) {
        entries.push((dependency_node_id, asset_node_id));
      }
    }

    entries
  }

  /// Depth first walk from `start`, visiting every node once.
  pub fn traverse<F>(&self, start: NodeId, visit: F)
  where
    F: FnMut(NodeId, &AssetGraphNode, &mut TraversalActions),
  {
    self.graph.traverse(start, EdgeTypeQuery::All, visit);
  }

  pub fn traverse_with<C: Clone, V: GraphVisitor<AssetGraphNode, C>>(
    &self,
    start: NodeId,
    visitor: &mut V,
  ) {
    self
      .graph
      .traverse_with(start, EdgeTypeQuery::All, visitor);
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use pretty_assertions::assert_eq;

  use crate::types::DependencyBuilder;
  use crate::types::Priority;
  use crate::types::Target;

  use super::*;

  fn asset(path: &str) -> Arc<Asset> {
    Arc::new(Asset::new(Arc::default(), PathBuf::from(path), 10))
  }

  fn import(graph: &mut AssetGraph, from: NodeId, to: NodeId, priority: Priority) -> NodeId {
    let source = graph.get_asset_node(from).unwrap().clone();
    let target = graph.get_asset_node(to).unwrap().clone();
    let dependency = graph.add_dependency(
      DependencyBuilder::default()
        .source_asset_id(source.id.clone())
        .specifier(target.file_path.display().to_string())
        .priority(priority)
        .build(),
    );
    graph.add_edge(from, dependency);
    graph.add_edge(dependency, to);
    dependency
  }

  #[test]
  fn entries_resolve_through_their_dependencies() {
    let mut graph = AssetGraph::new();
    let entry_dep = graph.add_entry_dependency(Dependency::entry(
      String::from("index.js"),
      Target::default(),
    ));
    let index = graph.add_asset(asset("index.js"));
    graph.add_edge(entry_dep, index);

    assert_eq!(graph.get_entries(), vec![(entry_dep, index)]);
    assert_eq!(graph.get_incoming_dependencies(index), vec![entry_dep]);
    assert_eq!(graph.get_asset_with_dependency(entry_dep), None);
  }

  #[test]
  fn navigates_between_assets_and_dependencies() {
    let mut graph = AssetGraph::new();
    let a = graph.add_asset(asset("a.js"));
    let b = graph.add_asset(asset("b.js"));
    let c = graph.add_asset(asset("c.js"));
    let a_b = import(&mut graph, a, b, Priority::Sync);
    let a_c = import(&mut graph, a, c, Priority::Lazy);

    assert_eq!(graph.get_outgoing_dependencies(a), vec![a_b, a_c]);
    assert_eq!(graph.get_dependency_assets(a_c), vec![c]);
    assert_eq!(graph.resolve_dependency_asset(a_b), Some(b));
    assert_eq!(graph.get_asset_with_dependency(a_c), Some(a));
    assert_eq!(graph.get_dependency_nodes().len(), 2);
  }

  #[test]
  fn adding_an_asset_twice_replaces_it() {
    let mut graph = AssetGraph::new();
    let first = graph.add_asset(asset("a.js"));

    let mut updated = (*asset("a.js")).clone();
    updated.stats.size = 99;
    let second = graph.add_asset(Arc::new(updated));

    assert_eq!(first, second);
    assert_eq!(graph.get_asset_node(first).unwrap().stats.size, 99);
  }
}

pub mod types;

pub use types::NativeBundleGraphEdgeType;
pub use types::NativeBundleGraphNode;
pub use types::NodeId;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::ensure;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::debug;

use crate::asset_graph::AssetGraph;
use crate::asset_graph::AssetGraphNode;
use crate::hash::hash_string;
use crate::types::Asset;
use crate::types::Bundle;
use crate::types::Dependency;
use crate::types::Priority;
use crate::types::Target;

use super::bundle_graph::BundleGraph;
use super::bundle_graph::CreateBundleOptions;
use super::bundle_graph::MutableBundleGraph;

const ROOT_CONTENT_KEY: &str = "@@root";

/// PetGraph-backed bundle graph, seeded from an [`AssetGraph`]
///
/// Assets and dependencies keep their ids as content keys, bundles use their bundle id and bundle
/// groups use `bundle_group:<target name><entry asset id>`.
#[derive(Clone, Debug)]
pub struct NativeBundleGraph {
  pub graph: StableDiGraph<NodeId, NativeBundleGraphEdgeType>,
  nodes: Vec<NativeBundleGraphNode>,
  node_id_to_node_index: HashMap<NodeId, NodeIndex>,
  content_key_to_node_id: HashMap<String, NodeId>,
  root_node_id: NodeId,
}

impl Default for NativeBundleGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl NativeBundleGraph {
  pub fn new() -> Self {
    let mut graph = StableDiGraph::new();
    let mut node_id_to_node_index = HashMap::new();
    let nodes = vec![NativeBundleGraphNode::Root];
    let root_node_id = 0;
    node_id_to_node_index.insert(root_node_id, graph.add_node(root_node_id));

    let mut content_key_to_node_id = HashMap::new();
    content_key_to_node_id.insert(ROOT_CONTENT_KEY.to_string(), root_node_id);

    Self {
      graph,
      nodes,
      node_id_to_node_index,
      content_key_to_node_id,
      root_node_id,
    }
  }

  pub fn from_asset_graph(asset_graph: &AssetGraph) -> Self {
    let mut bundle_graph = NativeBundleGraph::new();
    let mut node_ids = HashMap::new();

    for (asset_graph_node_id, node) in asset_graph.nodes() {
      let node_id = match node {
        AssetGraphNode::Root => bundle_graph.root_node_id,
        AssetGraphNode::Asset(asset) => bundle_graph.add_asset(asset.clone()),
        AssetGraphNode::Dependency(dependency) => bundle_graph.add_dependency(dependency.clone()),
      };
      node_ids.insert(asset_graph_node_id, node_id);
    }

    // Copy edges as Null edges
    for (asset_graph_node_id, _) in asset_graph.nodes() {
      let from_id = node_ids[&asset_graph_node_id];
      for to in asset_graph.get_node_ids_connected_from(asset_graph_node_id) {
        if let Some(to_id) = node_ids.get(&to) {
          bundle_graph.add_edge(&from_id, to_id, NativeBundleGraphEdgeType::Null);
        }
      }
    }

    bundle_graph
  }

  pub fn nodes(&self) -> impl Iterator<Item = &NativeBundleGraphNode> {
    self.nodes.iter()
  }

  pub fn root_node(&self) -> NodeId {
    self.root_node_id
  }

  pub fn get_node(&self, idx: &NodeId) -> Option<&NativeBundleGraphNode> {
    self.nodes.get(*idx)
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<&NodeId> {
    self.content_key_to_node_id.get(content_key)
  }

  pub fn get_outgoing_neighbors(&self, node_id: &NodeId) -> Vec<NodeId> {
    self.neighbors(node_id, Direction::Outgoing, None)
  }

  fn neighbors(
    &self,
    node_id: &NodeId,
    direction: Direction,
    edge_type: Option<NativeBundleGraphEdgeType>,
  ) -> Vec<NodeId> {
    let Some(node_index) = self.node_id_to_node_index.get(node_id) else {
      return Vec::new();
    };

    let mut neighbors: Vec<NodeId> = self
      .graph
      .edges_directed(*node_index, direction)
      .filter(|edge| edge_type.map_or(true, |edge_type| *edge.weight() == edge_type))
      .filter_map(|edge| {
        let other = match direction {
          Direction::Outgoing => edge.target(),
          Direction::Incoming => edge.source(),
        };
        self.graph.node_weight(other).copied()
      })
      .collect();

    // petgraph yields the most recent edge first
    neighbors.reverse();
    let mut seen = HashSet::new();
    neighbors.retain(|node_id| seen.insert(*node_id));
    neighbors
  }

  fn add_node(&mut self, content_key: String, node: NativeBundleGraphNode) -> NodeId {
    if let Some(existing_node_id) = self.content_key_to_node_id.get(&content_key) {
      return *existing_node_id;
    }

    let node_id = self.nodes.len();
    self.nodes.push(node);
    self.content_key_to_node_id.insert(content_key, node_id);

    let node_index = self.graph.add_node(node_id);
    self.node_id_to_node_index.insert(node_id, node_index);
    node_id
  }

  pub fn add_asset(&mut self, asset: Arc<Asset>) -> NodeId {
    self.add_node(asset.id.clone(), NativeBundleGraphNode::Asset(asset))
  }

  pub fn add_dependency(&mut self, dependency: Arc<Dependency>) -> NodeId {
    self.add_node(
      dependency.id.clone(),
      NativeBundleGraphNode::Dependency(dependency),
    )
  }

  pub fn has_edge(
    &self,
    from_id: &NodeId,
    to_id: &NodeId,
    edge_type: NativeBundleGraphEdgeType,
  ) -> bool {
    let (Some(from), Some(to)) = (
      self.node_id_to_node_index.get(from_id),
      self.node_id_to_node_index.get(to_id),
    ) else {
      return false;
    };

    self
      .graph
      .edges_connecting(*from, *to)
      .any(|edge| *edge.weight() == edge_type)
  }

  /// Adds an edge unless the same edge already exists.
  pub fn add_edge(
    &mut self,
    from_id: &NodeId,
    to_id: &NodeId,
    edge_type: NativeBundleGraphEdgeType,
  ) {
    if self.has_edge(from_id, to_id, edge_type) {
      return;
    }

    self.graph.add_edge(
      self.node_id_to_node_index[from_id],
      self.node_id_to_node_index[to_id],
      edge_type,
    );
  }

  pub fn remove_edge(
    &mut self,
    from_id: &NodeId,
    to_id: &NodeId,
    edge_type: NativeBundleGraphEdgeType,
  ) {
    let (Some(from), Some(to)) = (
      self.node_id_to_node_index.get(from_id),
      self.node_id_to_node_index.get(to_id),
    ) else {
      return;
    };

    let edges: Vec<_> = self
      .graph
      .edges_connecting(*from, *to)
      .filter(|edge| *edge.weight() == edge_type)
      .map(|edge| edge.id())
      .collect();

    for edge in edges {
      self.graph.remove_edge(edge);
    }
  }

  pub fn add_bundle_group(&mut self, id: String, target: Target, entry_asset_id: String) -> NodeId {
    self.add_node(
      id,
      NativeBundleGraphNode::BundleGroup {
        target,
        entry_asset_id,
      },
    )
  }

  pub fn add_bundle(&mut self, bundle: Bundle) -> NodeId {
    self.add_node(bundle.id.clone(), NativeBundleGraphNode::Bundle(bundle))
  }

  pub fn get_bundle(&self, node_id: &NodeId) -> Option<&Bundle> {
    match self.nodes.get(*node_id)? {
      NativeBundleGraphNode::Bundle(bundle) => Some(bundle),
      _ => None,
    }
  }

  pub fn get_bundle_groups(&self) -> Vec<NodeId> {
    self
      .nodes
      .iter()
      .enumerate()
      .filter(|(_, node)| matches!(node, NativeBundleGraphNode::BundleGroup { .. }))
      .map(|(node_id, _)| node_id)
      .collect()
  }

  /// Bundles loaded together by a bundle group, in the order they were added.
  pub fn get_bundles_in_bundle_group(&self, bundle_group: &NodeId) -> Vec<&Bundle> {
    self
      .neighbors(bundle_group, Direction::Outgoing, Some(NativeBundleGraphEdgeType::Bundle))
      .iter()
      .filter_map(|node_id| self.get_bundle(node_id))
      .collect()
  }

  pub fn get_referenced_bundles(&self, bundle: &NodeId) -> Vec<&Bundle> {
    self
      .neighbors(bundle, Direction::Outgoing, Some(NativeBundleGraphEdgeType::References))
      .iter()
      .filter_map(|node_id| self.get_bundle(node_id))
      .collect()
  }

  pub fn is_dependency_internalized(&self, bundle: &NodeId, dependency_id: &str) -> bool {
    self
      .get_node_id_by_content_key(dependency_id)
      .is_some_and(|dependency| {
        self.has_edge(bundle, dependency, NativeBundleGraphEdgeType::InternalAsync)
      })
  }

  fn require_node_id(&self, content_key: &str) -> anyhow::Result<NodeId> {
    self
      .get_node_id_by_content_key(content_key)
      .copied()
      .ok_or_else(|| anyhow!("{content_key} not found in bundle graph"))
  }

  fn require_asset(&self, asset_id: &str) -> anyhow::Result<(NodeId, &Arc<Asset>)> {
    let node_id = self.require_node_id(asset_id)?;
    match self.nodes.get(node_id) {
      Some(NativeBundleGraphNode::Asset(asset)) => Ok((node_id, asset)),
      _ => Err(anyhow!("Node {asset_id} is not an asset")),
    }
  }

  fn require_dependency(&self, dependency_id: &str) -> anyhow::Result<(NodeId, &Arc<Dependency>)> {
    let node_id = self.require_node_id(dependency_id)?;
    match self.nodes.get(node_id) {
      Some(NativeBundleGraphNode::Dependency(dependency)) => Ok((node_id, dependency)),
      _ => Err(anyhow!("Node {dependency_id} is not a dependency")),
    }
  }

  fn require_bundle(&self, node_id: NodeId) -> anyhow::Result<&Bundle> {
    self
      .get_bundle(&node_id)
      .ok_or_else(|| anyhow!("Node {node_id} is not a bundle"))
  }
}

impl BundleGraph for NativeBundleGraph {
  fn get_bundles(&self) -> Vec<&Bundle> {
    self
      .nodes
      .iter()
      .filter_map(|n| match n {
        NativeBundleGraphNode::Bundle(b) => Some(b),
        _ => None,
      })
      .collect()
  }

  fn get_bundle_assets(&self, bundle: &Bundle) -> anyhow::Result<Vec<&Asset>> {
    let bundle_node_id = self.require_node_id(&bundle.id)?;

    let assets = self
      .neighbors(
        &bundle_node_id,
        Direction::Outgoing,
        Some(NativeBundleGraphEdgeType::Contains),
      )
      .into_iter()
      .filter_map(|node_id| match self.nodes.get(node_id)? {
        NativeBundleGraphNode::Asset(a) => Some(a.as_ref()),
        _ => None,
      })
      .collect();

    Ok(assets)
  }

  fn get_bundle_by_id(&self, id: &str) -> Option<&Bundle> {
    let node_id = self.get_node_id_by_content_key(id)?;
    self.get_bundle(node_id)
  }

  fn get_dependencies(&self, asset: &Asset) -> anyhow::Result<Vec<&Dependency>> {
    let (asset_node_id, _) = self.require_asset(&asset.id)?;

    // Asset to dependency edges keep the Null type they were copied with
    let dependencies = self
      .neighbors(
        &asset_node_id,
        Direction::Outgoing,
        Some(NativeBundleGraphEdgeType::Null),
      )
      .into_iter()
      .filter_map(|node_id| match self.nodes.get(node_id)? {
        NativeBundleGraphNode::Dependency(d) => Some(d.as_ref()),
        _ => None,
      })
      .collect();

    Ok(dependencies)
  }
}

impl MutableBundleGraph for NativeBundleGraph {
  fn create_bundle_group(
    &mut self,
    dependency: &Dependency,
    target: &Target,
    entry_asset_id: &str,
  ) -> anyhow::Result<NodeId> {
    let (dependency_node_id, _) = self.require_dependency(&dependency.id)?;
    let (asset_node_id, _) = self.require_asset(entry_asset_id)?;

    let bundle_group_node_id = self.add_bundle_group(
      format!("bundle_group:{}{}", target.name, entry_asset_id),
      target.clone(),
      entry_asset_id.to_string(),
    );

    debug!(
      dependency = %dependency.specifier,
      entry_asset_id, bundle_group_node_id, "Creating bundle group"
    );

    // The group now stands between the dependency and the asset it resolved to
    self.add_edge(
      &dependency_node_id,
      &bundle_group_node_id,
      NativeBundleGraphEdgeType::Null,
    );
    self.add_edge(
      &bundle_group_node_id,
      &asset_node_id,
      NativeBundleGraphEdgeType::Null,
    );
    self.add_edge(
      &dependency_node_id,
      &asset_node_id,
      NativeBundleGraphEdgeType::References,
    );
    self.remove_edge(
      &dependency_node_id,
      &asset_node_id,
      NativeBundleGraphEdgeType::Null,
    );

    if dependency.is_entry {
      let root_node_id = self.root_node_id;
      self.add_edge(
        &root_node_id,
        &bundle_group_node_id,
        NativeBundleGraphEdgeType::Bundle,
      );
    }

    Ok(bundle_group_node_id)
  }

  fn create_bundle(&mut self, options: CreateBundleOptions) -> anyhow::Result<NodeId> {
    let entry_asset = match &options.entry_asset_id {
      Some(asset_id) => Some(self.require_asset(asset_id)?.1.clone()),
      None => None,
    };

    let key = options
      .entry_asset_id
      .as_deref()
      .or(options.unique_key.as_deref())
      .ok_or_else(|| anyhow!("A bundle needs either an entry asset or a unique key"))?
      .to_string();

    let id = hash_string(&format!(
      "bundle:{key}{}",
      options.target.dist_dir.display()
    ));

    if let Some(existing) = self.get_node_id_by_content_key(&id) {
      return Ok(*existing);
    }

    let bundle_type = match (&options.bundle_type, &entry_asset) {
      (Some(bundle_type), _) => bundle_type.clone(),
      (None, Some(asset)) => asset.file_type.clone(),
      (None, None) => return Err(anyhow!("Bundle {key} has no entry asset and no type")),
    };

    let env = options
      .env
      .clone()
      .or_else(|| entry_asset.as_ref().map(|asset| asset.env.clone()))
      .unwrap_or_else(|| options.target.env.clone());

    let bundle = Bundle {
      id,
      bundle_behavior: options.bundle_behavior,
      bundle_type,
      entry_asset_ids: options.entry_asset_id.iter().cloned().collect(),
      env: (*env).clone(),
      is_splittable: entry_asset.as_ref().map(|asset| asset.is_bundle_splittable),
      main_entry_id: options.entry_asset_id.clone(),
      manual_shared_bundle: options.manual_shared_bundle,
      needs_stable_name: Some(options.needs_stable_name),
      target: options.target,
      unique_key: options.unique_key,
    };

    debug!(bundle_id = %bundle.id, %key, "Creating bundle");
    Ok(self.add_bundle(bundle))
  }

  fn add_bundle_to_bundle_group(
    &mut self,
    bundle: NodeId,
    bundle_group: NodeId,
  ) -> anyhow::Result<()> {
    self.require_bundle(bundle)?;
    ensure!(
      matches!(
        self.nodes.get(bundle_group),
        Some(NativeBundleGraphNode::BundleGroup { .. })
      ),
      "Node {bundle_group} is not a bundle group"
    );

    self.add_edge(&bundle_group, &bundle, NativeBundleGraphEdgeType::Null);
    self.add_edge(&bundle_group, &bundle, NativeBundleGraphEdgeType::Bundle);
    Ok(())
  }

  fn add_asset_to_bundle(&mut self, asset_id: &str, bundle: NodeId) -> anyhow::Result<()> {
    self.require_bundle(bundle)?;
    let (asset_node_id, _) = self.require_asset(asset_id)?;

    self.add_edge(&bundle, &asset_node_id, NativeBundleGraphEdgeType::Contains);

    let dependencies: Vec<NodeId> = self
      .neighbors(
        &asset_node_id,
        Direction::Outgoing,
        Some(NativeBundleGraphEdgeType::Null),
      )
      .into_iter()
      .filter(|node_id| {
        matches!(
          self.nodes.get(*node_id),
          Some(NativeBundleGraphNode::Dependency(_))
        )
      })
      .collect();

    for dependency in dependencies {
      self.add_edge(&bundle, &dependency, NativeBundleGraphEdgeType::Contains);
    }

    Ok(())
  }

  fn create_bundle_reference(&mut self, from: NodeId, to: NodeId) -> anyhow::Result<()> {
    self.require_bundle(from)?;
    self.require_bundle(to)?;
    self.add_edge(&from, &to, NativeBundleGraphEdgeType::References);
    Ok(())
  }

  fn create_asset_reference(
    &mut self,
    dependency_id: &str,
    asset_id: &str,
    bundle: NodeId,
  ) -> anyhow::Result<()> {
    self.require_bundle(bundle)?;
    let (dependency_node_id, _) = self.require_dependency(dependency_id)?;
    let (asset_node_id, _) = self.require_asset(asset_id)?;

    self.add_edge(
      &dependency_node_id,
      &asset_node_id,
      NativeBundleGraphEdgeType::References,
    );
    self.add_edge(
      &dependency_node_id,
      &bundle,
      NativeBundleGraphEdgeType::References,
    );
    Ok(())
  }

  fn internalize_async_dependency(
    &mut self,
    bundle: NodeId,
    dependency_id: &str,
  ) -> anyhow::Result<()> {
    self.require_bundle(bundle)?;
    let (dependency_node_id, dependency) = self.require_dependency(dependency_id)?;
    ensure!(
      dependency.priority != Priority::Sync,
      "Expected an async dependency, {} is sync",
      dependency.specifier
    );

    self.add_edge(
      &bundle,
      &dependency_node_id,
      NativeBundleGraphEdgeType::InternalAsync,
    );
    Ok(())
  }

  fn get_incoming_dependencies(&self, asset_id: &str) -> anyhow::Result<Vec<Arc<Dependency>>> {
    let (asset_node_id, _) = self.require_asset(asset_id)?;

    let dependencies = self
      .neighbors(&asset_node_id, Direction::Incoming, None)
      .into_iter()
      .filter(|node_id| {
        [
          NativeBundleGraphEdgeType::Null,
          NativeBundleGraphEdgeType::References,
        ]
        .iter()
        .any(|edge_type| self.has_edge(node_id, &asset_node_id, *edge_type))
      })
      .filter_map(|node_id| match self.nodes.get(node_id)? {
        NativeBundleGraphNode::Dependency(dependency) => Some(dependency.clone()),
        _ => None,
      })
      .collect();

    Ok(dependencies)
  }

  fn bundle_has_dependency(&self, bundle: NodeId, dependency_id: &str) -> bool {
    self
      .get_node_id_by_content_key(dependency_id)
      .is_some_and(|dependency| {
        self.has_edge(&bundle, dependency, NativeBundleGraphEdgeType::Contains)
      })
  }

  fn get_bundles_with_dependency(&self, dependency_id: &str) -> Vec<NodeId> {
    let Some(dependency) = self.get_node_id_by_content_key(dependency_id) else {
      return Vec::new();
    };

    self
      .neighbors(
        dependency,
        Direction::Incoming,
        Some(NativeBundleGraphEdgeType::Contains),
      )
      .into_iter()
      .filter(|node_id| self.get_bundle(node_id).is_some())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use pretty_assertions::assert_eq;

  use crate::types::DependencyBuilder;

  use super::*;

  struct Fixture {
    graph: NativeBundleGraph,
    entry_dependency: Dependency,
    lazy_dependency: Dependency,
    index: Arc<Asset>,
    page: Arc<Asset>,
  }

  fn fixture() -> Fixture {
    let mut asset_graph = AssetGraph::new();
    let target = Target {
      dist_dir: PathBuf::from("dist"),
      ..Target::default()
    };

    let index = Arc::new(Asset::new(Arc::default(), PathBuf::from("index.js"), 10));
    let page = Arc::new(Asset::new(Arc::default(), PathBuf::from("page.js"), 10));
    let entry_dependency = Dependency::entry(String::from("index.js"), target);
    let lazy_dependency = DependencyBuilder::default()
      .source_asset_id(index.id.clone())
      .specifier(String::from("./page"))
      .priority(Priority::Lazy)
      .build();

    let entry_dep = asset_graph.add_entry_dependency(entry_dependency.clone());
    let index_node = asset_graph.add_asset(index.clone());
    let lazy_dep = asset_graph.add_dependency(lazy_dependency.clone());
    let page_node = asset_graph.add_asset(page.clone());
    asset_graph.add_edge(entry_dep, index_node);
    asset_graph.add_edge(index_node, lazy_dep);
    asset_graph.add_edge(lazy_dep, page_node);

    Fixture {
      graph: NativeBundleGraph::from_asset_graph(&asset_graph),
      entry_dependency,
      lazy_dependency,
      index,
      page,
    }
  }

  #[test]
  fn copies_the_asset_graph() {
    let Fixture {
      graph,
      index,
      lazy_dependency,
      ..
    } = fixture();

    let dependencies = graph.get_dependencies(&index).unwrap();
    assert_eq!(dependencies, vec![&lazy_dependency]);
  }

  #[test]
  fn creates_bundles_in_bundle_groups() {
    let Fixture {
      mut graph,
      entry_dependency,
      index,
      ..
    } = fixture();
    let target = entry_dependency.target.as_deref().cloned().unwrap();

    let group = graph
      .create_bundle_group(&entry_dependency, &target, &index.id)
      .unwrap();
    let bundle = graph
      .create_bundle(CreateBundleOptions {
        entry_asset_id: Some(index.id.clone()),
        needs_stable_name: true,
        target,
        ..CreateBundleOptions::default()
      })
      .unwrap();
    graph.add_bundle_to_bundle_group(bundle, group).unwrap();
    graph.add_asset_to_bundle(&index.id, bundle).unwrap();

    let bundles = graph.get_bundles_in_bundle_group(&group);
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].main_entry_id, Some(index.id.clone()));

    let assets = graph.get_bundle_assets(bundles[0]).unwrap();
    assert_eq!(assets, vec![index.as_ref()]);
    assert!(graph.has_edge(
      &graph.root_node(),
      &group,
      NativeBundleGraphEdgeType::Bundle
    ));
  }

  #[test]
  fn creating_the_same_bundle_twice_returns_the_first() {
    let Fixture {
      mut graph, index, ..
    } = fixture();
    let options = CreateBundleOptions {
      entry_asset_id: Some(index.id.clone()),
      ..CreateBundleOptions::default()
    };

    let first = graph.create_bundle(options.clone()).unwrap();
    let second = graph.create_bundle(options).unwrap();

    assert_eq!(first, second);
    assert_eq!(graph.get_bundles().len(), 1);
  }

  #[test]
  fn bundles_without_entries_need_a_unique_key() {
    let Fixture { mut graph, .. } = fixture();

    let result = graph.create_bundle(CreateBundleOptions::default());

    assert!(result.is_err());
  }

  #[test]
  fn internalizes_async_dependencies() {
    let Fixture {
      mut graph,
      lazy_dependency,
      entry_dependency,
      index,
      page,
    } = fixture();
    let bundle = graph
      .create_bundle(CreateBundleOptions {
        entry_asset_id: Some(index.id.clone()),
        ..CreateBundleOptions::default()
      })
      .unwrap();
    graph.add_asset_to_bundle(&index.id, bundle).unwrap();

    assert!(graph.bundle_has_dependency(bundle, &lazy_dependency.id));
    assert_eq!(
      graph.get_bundles_with_dependency(&lazy_dependency.id),
      vec![bundle]
    );
    assert_eq!(
      graph.get_incoming_dependencies(&page.id).unwrap(),
      vec![Arc::new(lazy_dependency.clone())]
    );

    graph
      .internalize_async_dependency(bundle, &lazy_dependency.id)
      .unwrap();
    assert!(graph.is_dependency_internalized(&bundle, &lazy_dependency.id));

    let sync = graph.internalize_async_dependency(bundle, &entry_dependency.id);
    assert!(sync.is_err());
  }
}

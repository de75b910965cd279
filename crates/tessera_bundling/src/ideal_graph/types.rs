use std::sync::Arc;

use fixedbitset::FixedBitSet;
use indexmap::IndexMap;
use indexmap::IndexSet;
use tessera_core::diagnostic::Diagnostic;
use tessera_core::types::Asset;
use tessera_core::types::Dependency;
use tessera_core::types::Environment;
use tessera_core::types::FileType;
use tessera_core::types::MaybeBundleBehavior;
use tessera_core::types::Priority;
use tessera_core::types::Target;
use tessera_graph::ContentGraph;
use tessera_graph::EdgeType;
use tessera_graph::EdgeTypeQuery;
use tessera_graph::Graph;
use tessera_graph::NodeId;

/// Configuration knobs for the ideal graph build.
#[derive(Debug, Clone, Default)]
pub struct IdealGraphBuildOptions {
  /// When true, the builder records every bundling decision in [`IdealGraph::debug`].
  pub collect_debug: bool,
}

/// Summary stats from building an [`IdealGraph`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdealGraphBuildStats {
  pub assets: usize,
  pub dependencies: usize,
  pub bundles: usize,
  pub bundle_groups: usize,
}

/// Index of an asset in [`IdealGraph::assets`], also its bit in every asset bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey(pub u32);

impl AssetKey {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// A bundle under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct IdealBundle {
  /// Assets in placement order
  pub assets: IndexSet<AssetKey>,
  pub bundle_behavior: MaybeBundleBehavior,
  pub bundle_type: FileType,
  pub env: Arc<Environment>,
  /// Async bundle roots that are already loaded whenever this bundle is, so dependencies on them
  /// can be resolved in place
  pub internalized_assets: Option<FixedBitSet>,
  /// The asset that created this bundle. Shared bundles have none.
  pub main_entry_asset: Option<AssetKey>,
  /// Name of the manual shared bundle rule that produced this bundle
  pub manual_shared_bundle: Option<String>,
  pub needs_stable_name: bool,
  /// Sum of the sizes of `assets`
  pub size: u64,
  /// Bundles that load this one alongside themselves
  pub source_bundles: IndexSet<NodeId>,
  pub target: Target,
  pub unique_key: Option<String>,
}

impl IdealBundle {
  /// A bundle rooted at `asset`, which it contains from the start.
  pub fn with_entry(key: AssetKey, asset: &Asset, target: Target) -> Self {
    IdealBundle {
      assets: IndexSet::from([key]),
      bundle_behavior: asset.bundle_behavior,
      bundle_type: asset.file_type.clone(),
      env: asset.env.clone(),
      internalized_assets: None,
      main_entry_asset: Some(key),
      manual_shared_bundle: None,
      needs_stable_name: false,
      size: u64::from(asset.stats.size),
      source_bundles: IndexSet::new(),
      target,
      unique_key: None,
    }
  }

  /// An empty bundle without an entry asset.
  pub fn empty(bundle_type: FileType, env: Arc<Environment>, target: Target) -> Self {
    IdealBundle {
      assets: IndexSet::new(),
      bundle_behavior: None,
      bundle_type,
      env,
      internalized_assets: None,
      main_entry_asset: None,
      manual_shared_bundle: None,
      needs_stable_name: false,
      size: 0,
      source_bundles: IndexSet::new(),
      target,
      unique_key: None,
    }
  }

  /// Adds an asset, keeping `size` in step. Returns false if it was already present.
  pub fn add_asset(&mut self, key: AssetKey, asset: &Asset) -> bool {
    let added = self.assets.insert(key);
    if added {
      self.size += u64::from(asset.stats.size);
    }
    added
  }

  pub fn remove_asset(&mut self, key: AssetKey, asset: &Asset) -> bool {
    let removed = self.assets.shift_remove(&key);
    if removed {
      self.size -= u64::from(asset.stats.size);
    }
    removed
  }

  pub fn is_shared(&self) -> bool {
    self.main_entry_asset.is_none() && !self.source_bundles.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum IdealBundleNode {
  Root,
  Bundle(IdealBundle),
}

impl IdealBundleNode {
  pub fn as_bundle(&self) -> Option<&IdealBundle> {
    match self {
      IdealBundleNode::Bundle(bundle) => Some(bundle),
      IdealBundleNode::Root => None,
    }
  }

  pub fn as_bundle_mut(&mut self) -> Option<&mut IdealBundle> {
    match self {
      IdealBundleNode::Bundle(bundle) => Some(bundle),
      IdealBundleNode::Root => None,
    }
  }
}

/// Edges between bundles: "loads alongside".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleEdge;

impl EdgeType for BundleEdge {
  fn to_raw(self) -> u32 {
    1
  }

  fn from_raw(_raw: u32) -> Self {
    BundleEdge
  }
}

/// Bundles that load with the bundle group started by `group_id`, the group bundle first.
///
/// Other bundle group roots reached from the group load with it, but their children belong to
/// their own group.
pub fn bundle_group_members(
  bundle_graph: &Graph<IdealBundleNode, BundleEdge>,
  group_roots: &IndexSet<NodeId>,
  group_id: NodeId,
) -> Vec<NodeId> {
  let mut members = Vec::new();
  bundle_graph.traverse(group_id, EdgeTypeQuery::All, |bundle_id, _, actions| {
    members.push(bundle_id);
    if bundle_id != group_id && group_roots.contains(&bundle_id) {
      actions.skip_children();
    }
  });
  members
}

/// Content key of a bundle in [`IdealGraph::dependency_bundle_graph`].
pub fn dependency_bundle_key(bundle_id: NodeId) -> String {
  format!("bundle:{bundle_id}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum DependencyBundleNode {
  Dependency(Arc<Dependency>),
  Bundle(NodeId),
}

/// Priority of the dependency that loads a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyPriorityEdge {
  Sync,
  Parallel,
  Lazy,
}

impl From<Priority> for DependencyPriorityEdge {
  fn from(priority: Priority) -> Self {
    match priority {
      Priority::Sync => DependencyPriorityEdge::Sync,
      Priority::Parallel => DependencyPriorityEdge::Parallel,
      Priority::Lazy => DependencyPriorityEdge::Lazy,
    }
  }
}

impl EdgeType for DependencyPriorityEdge {
  fn to_raw(self) -> u32 {
    match self {
      DependencyPriorityEdge::Sync => 1,
      DependencyPriorityEdge::Parallel => 2,
      DependencyPriorityEdge::Lazy => 3,
    }
  }

  fn from_raw(raw: u32) -> Self {
    match raw {
      1 => DependencyPriorityEdge::Sync,
      2 => DependencyPriorityEdge::Parallel,
      3 => DependencyPriorityEdge::Lazy,
      _ => panic!("Unknown dependency priority edge {raw}"),
    }
  }
}

/// Typed decision event.
///
/// This is intended for debugging and should not be used for correctness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionKind {
  BundleRootCreated {
    bundle: NodeId,
    asset_id: String,
    priority: Priority,
  },
  BundleInternalized {
    asset_id: String,
  },
  BundleReused {
    source_bundle: NodeId,
    reused_bundle: NodeId,
    asset_id: String,
  },
  SharedBundleCreated {
    bundle: NodeId,
    source_bundles: usize,
  },
  ManualBundleSplit {
    bundle: NodeId,
    partitions: usize,
  },
  SharedBundleMerged {
    bundle: NodeId,
    size: u64,
  },
  SharedBundleRemovedForParallelRequestLimit {
    bundle: NodeId,
    bundle_group: NodeId,
  },
}

/// Single decision event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
  /// Monotonically increasing sequence number assigned by the log.
  pub seq: u64,

  pub phase: &'static str,

  pub kind: DecisionKind,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecisionLog {
  next_seq: u64,
  pub decisions: Vec<Decision>,
}

impl DecisionLog {
  pub fn push(&mut self, phase: &'static str, kind: DecisionKind) {
    let seq = self.next_seq;
    self.next_seq += 1;

    self.decisions.push(Decision { seq, phase, kind });
  }

  pub fn is_empty(&self) -> bool {
    self.decisions.is_empty()
  }
}

#[derive(Debug, Clone, Default)]
pub struct IdealGraphDebug {
  pub decisions: DecisionLog,
}

/// Output of the ideal graph algorithm for one target.
#[derive(Debug, Clone)]
pub struct IdealGraph {
  /// Every asset of the target, indexed by [`AssetKey`]
  pub assets: Vec<Arc<Asset>>,

  /// Asset id to its key
  pub asset_keys: IndexMap<String, AssetKey>,

  /// Bundles hang off a root node. Its direct children are the bundles that start a bundle group.
  pub bundle_graph: Graph<IdealBundleNode, BundleEdge>,

  /// Which dependencies load which bundles, keyed by dependency id and bundle node id.
  pub dependency_bundle_graph: ContentGraph<DependencyBundleNode, DependencyPriorityEdge>,

  pub bundle_group_bundle_ids: IndexSet<NodeId>,

  /// Assets that are reached through a parallel or inline dependency, with the bundle that
  /// satisfies each such dependency
  pub asset_reference: IndexMap<AssetKey, Vec<(Arc<Dependency>, NodeId)>>,

  /// Assets claimed by a manual shared bundle rule
  pub manual_asset_to_bundle: IndexMap<AssetKey, NodeId>,

  /// Problems that did not stop the build
  pub diagnostics: Vec<Diagnostic>,

  pub debug: Option<IdealGraphDebug>,
}

impl IdealGraph {
  pub fn asset(&self, key: AssetKey) -> &Arc<Asset> {
    &self.assets[key.index()]
  }

  pub fn asset_key(&self, asset_id: &str) -> Option<AssetKey> {
    self.asset_keys.get(asset_id).copied()
  }

  pub fn bundle(&self, node_id: NodeId) -> Option<&IdealBundle> {
    self.bundle_graph.get_node(node_id)?.as_bundle()
  }

  /// Bundles loaded by the bundle group started by `group_id`.
  pub fn bundle_group_members(&self, group_id: NodeId) -> Vec<NodeId> {
    bundle_group_members(&self.bundle_graph, &self.bundle_group_bundle_ids, group_id)
  }

  /// Every bundle with its node id, in creation order.
  pub fn bundles(&self) -> impl Iterator<Item = (NodeId, &IdealBundle)> + '_ {
    self
      .bundle_graph
      .nodes()
      .filter_map(|(node_id, node)| Some((node_id, node.as_bundle()?)))
  }

  /// The bundle whose main entry is `asset_id`.
  pub fn bundle_for_root(&self, asset_id: &str) -> Option<(NodeId, &IdealBundle)> {
    let key = self.asset_key(asset_id)?;
    self
      .bundles()
      .find(|(_, bundle)| bundle.main_entry_asset == Some(key))
  }

  /// Bundles that contain `asset_id`.
  pub fn bundles_with_asset(&self, asset_id: &str) -> Vec<NodeId> {
    let Some(key) = self.asset_key(asset_id) else {
      return Vec::new();
    };

    self
      .bundles()
      .filter(|(_, bundle)| bundle.assets.contains(&key))
      .map(|(node_id, _)| node_id)
      .collect()
  }

  /// Dependencies that load `bundle_id`, in the order they were connected.
  pub fn dependencies_loading(&self, bundle_id: NodeId) -> Vec<Arc<Dependency>> {
    let Some(bundle_node_id) = self
      .dependency_bundle_graph
      .get_node_id_by_content_key(&dependency_bundle_key(bundle_id))
    else {
      return Vec::new();
    };

    self
      .dependency_bundle_graph
      .get_node_ids_connected_to(bundle_node_id, EdgeTypeQuery::All)
      .into_iter()
      .filter_map(|node_id| match self.dependency_bundle_graph.get_node(node_id)? {
        DependencyBundleNode::Dependency(dependency) => Some(dependency.clone()),
        DependencyBundleNode::Bundle(_) => None,
      })
      .collect()
  }

  /// Ids of a bundle's assets, in placement order.
  pub fn bundle_asset_ids(&self, bundle: &IdealBundle) -> Vec<&str> {
    bundle
      .assets
      .iter()
      .map(|key| self.asset(*key).id.as_str())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::test_utils::make_asset;
  use crate::test_utils::make_target;

  use super::*;

  #[test]
  fn bundle_size_follows_its_assets() {
    let entry = make_asset("src/index.js", 100);
    let other = make_asset("src/other.js", 30);
    let mut bundle = IdealBundle::with_entry(AssetKey(0), &entry, make_target("dist"));
    assert_eq!(bundle.size, 100);

    assert!(bundle.add_asset(AssetKey(1), &other));
    assert!(!bundle.add_asset(AssetKey(1), &other));
    assert_eq!(bundle.size, 130);

    assert!(bundle.remove_asset(AssetKey(0), &entry));
    assert!(!bundle.remove_asset(AssetKey(0), &entry));
    assert_eq!(bundle.size, 30);
    assert_eq!(
      bundle.assets.iter().copied().collect::<Vec<_>>(),
      vec![AssetKey(1)]
    );
  }

  #[test]
  fn shared_bundles_have_sources_and_no_entry() {
    let asset = make_asset("src/shared.js", 10);
    let mut bundle = IdealBundle::empty(
      asset.file_type.clone(),
      asset.env.clone(),
      make_target("dist"),
    );
    assert!(!bundle.is_shared());

    bundle.source_bundles.insert(NodeId::new(1));
    assert!(bundle.is_shared());

    let entry = IdealBundle::with_entry(AssetKey(0), &asset, make_target("dist"));
    assert!(!entry.is_shared());
  }

  #[test]
  fn decision_log_numbers_decisions_in_order() {
    let mut log = DecisionLog::default();
    assert!(log.is_empty());

    log.push("place", DecisionKind::BundleInternalized {
      asset_id: String::from("a"),
    });
    log.push("merge", DecisionKind::SharedBundleMerged {
      bundle: NodeId::new(3),
      size: 10,
    });

    assert_eq!(
      log
        .decisions
        .iter()
        .map(|decision| (decision.seq, decision.phase))
        .collect::<Vec<_>>(),
      vec![(0, "place"), (1, "merge")]
    );
  }
}

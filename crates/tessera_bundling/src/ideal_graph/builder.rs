use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use fixedbitset::FixedBitSet;
use indexmap::IndexMap;
use indexmap::IndexSet;
use tessera_core::asset_graph::AssetGraph;
use tessera_core::asset_graph::AssetGraphNode;
use tessera_core::diagnostic::Diagnostic;
use tessera_core::hash::hash_u64;
use tessera_core::types::Asset;
use tessera_core::types::BundleBehavior;
use tessera_core::types::Dependency;
use tessera_core::types::FileType;
use tessera_core::types::Priority;
use tessera_graph::ContentGraph;
use tessera_graph::EdgeType;
use tessera_graph::EdgeTypeQuery;
use tessera_graph::Graph;
use tessera_graph::GraphVisitor;
use tessera_graph::NodeId;
use tessera_graph::TraversalActions;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::config::BundlerConfig;
use crate::config::ORIGIN;

use super::types::AssetKey;
use super::types::BundleEdge;
use super::types::bundle_group_members;
use super::types::DecisionKind;
use super::types::DecisionLog;
use super::types::dependency_bundle_key;
use super::types::DependencyBundleNode;
use super::types::DependencyPriorityEdge;
use super::types::IdealBundle;
use super::types::IdealBundleNode;
use super::types::IdealGraph;
use super::types::IdealGraphBuildOptions;
use super::types::IdealGraphBuildStats;
use super::types::IdealGraphDebug;

/// How one bundle root loads another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BundleRootEdge {
  Parallel,
  Lazy,
}

impl EdgeType for BundleRootEdge {
  fn to_raw(self) -> u32 {
    match self {
      BundleRootEdge::Parallel => 1,
      BundleRootEdge::Lazy => 2,
    }
  }

  fn from_raw(raw: u32) -> Self {
    match raw {
      1 => BundleRootEdge::Parallel,
      2 => BundleRootEdge::Lazy,
      _ => panic!("Unknown bundle root edge {raw}"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BundleRootNode {
  /// Parent of every entry
  VirtualRoot,
  Root(AssetKey),
}

fn manual_bundle_key(name: &str, file_type: &FileType) -> String {
  format!("{name},{}", file_type.extension())
}

fn is_isolated(bundle: &IdealBundle) -> bool {
  bundle
    .bundle_behavior
    .is_some_and(|behavior| behavior.is_isolated())
}

/// Builds an [`IdealGraph`] for the entries of one target group.
///
/// The build is a fixed sequence of phases over shared state. Each phase is a method below and
/// phases only communicate through the builder's fields.
pub struct IdealGraphBuilder<'a> {
  asset_graph: &'a AssetGraph,
  config: &'a BundlerConfig,
  options: IdealGraphBuildOptions,

  /// (entry dependency, entry asset) pairs, as asset graph nodes
  entries: Vec<(NodeId, NodeId)>,
  entry_dependencies: HashSet<NodeId>,
  entry_keys: HashSet<AssetKey>,

  assets: Vec<Arc<Asset>>,
  asset_keys: IndexMap<String, AssetKey>,
  asset_nodes: Vec<NodeId>,
  asset_node_keys: HashMap<NodeId, AssetKey>,
  dependency_count: usize,

  bundle_graph: Graph<IdealBundleNode, BundleEdge>,
  bundle_graph_root: NodeId,
  dependency_bundle_graph: ContentGraph<DependencyBundleNode, DependencyPriorityEdge>,
  /// Bundles by the asset id that roots them, or by their shared or type-change key
  bundles: HashMap<String, NodeId>,
  /// Bundle root assets mapped to (their bundle, the bundle group bundle they load with)
  bundle_roots: IndexMap<AssetKey, (NodeId, NodeId)>,
  bundle_group_bundle_ids: IndexSet<NodeId>,
  asset_reference: IndexMap<AssetKey, Vec<(Arc<Dependency>, NodeId)>>,

  /// Asset to the index of the manual shared bundle rule that claims it
  manual_asset_to_config: HashMap<AssetKey, usize>,
  constant_module_to_manual_rules: IndexMap<AssetKey, Vec<usize>>,
  manual_shared_map: IndexMap<String, NodeId>,
  manual_shared_bundle_ids: IndexSet<NodeId>,
  manual_asset_to_bundle: IndexMap<AssetKey, NodeId>,
  manual_bundle_to_internalized: IndexMap<NodeId, IndexSet<AssetKey>>,
  /// Constant modules imported by each asset
  inline_constant_deps: HashMap<AssetKey, IndexSet<AssetKey>>,

  bundle_root_graph: Graph<BundleRootNode, BundleRootEdge>,
  bundle_root_nodes: HashMap<AssetKey, NodeId>,
  /// Per asset, the bundle roots that reach it synchronously
  reachable_roots: Vec<FixedBitSet>,
  /// Per bundle root, the assets it reaches synchronously
  reachable_assets: Vec<FixedBitSet>,
  /// Per bundle root, the assets that are loaded before it on every path
  ancestor_assets: Vec<Option<FixedBitSet>>,

  diagnostics: Vec<Diagnostic>,
  decisions: DecisionLog,
}

impl<'a> IdealGraphBuilder<'a> {
  pub fn new(
    asset_graph: &'a AssetGraph,
    config: &'a BundlerConfig,
    entries: Vec<(NodeId, NodeId)>,
    options: IdealGraphBuildOptions,
  ) -> Self {
    let mut bundle_graph = Graph::new();
    let bundle_graph_root = bundle_graph.add_node(IdealBundleNode::Root);
    bundle_graph.set_root_node_id(bundle_graph_root);

    let entry_dependencies = entries
      .iter()
      .map(|(dependency_node_id, _)| *dependency_node_id)
      .collect();

    IdealGraphBuilder {
      asset_graph,
      config,
      options,
      entries,
      entry_dependencies,
      entry_keys: HashSet::new(),
      assets: Vec::new(),
      asset_keys: IndexMap::new(),
      asset_nodes: Vec::new(),
      asset_node_keys: HashMap::new(),
      dependency_count: 0,
      bundle_graph,
      bundle_graph_root,
      dependency_bundle_graph: ContentGraph::new(),
      bundles: HashMap::new(),
      bundle_roots: IndexMap::new(),
      bundle_group_bundle_ids: IndexSet::new(),
      asset_reference: IndexMap::new(),
      manual_asset_to_config: HashMap::new(),
      constant_module_to_manual_rules: IndexMap::new(),
      manual_shared_map: IndexMap::new(),
      manual_shared_bundle_ids: IndexSet::new(),
      manual_asset_to_bundle: IndexMap::new(),
      manual_bundle_to_internalized: IndexMap::new(),
      inline_constant_deps: HashMap::new(),
      bundle_root_graph: Graph::new(),
      bundle_root_nodes: HashMap::new(),
      reachable_roots: Vec::new(),
      reachable_assets: Vec::new(),
      ancestor_assets: Vec::new(),
      diagnostics: Vec::new(),
      decisions: DecisionLog::default(),
    }
  }

  pub fn build(mut self) -> anyhow::Result<(IdealGraph, IdealGraphBuildStats)> {
    // Phase 0: number the assets of this target and find manual shared bundle assets.
    self.collect_assets();
    self.resolve_manual_shared_bundles();

    // Phase 1: one bundle per entry.
    self.create_entry_bundles()?;

    // Phase 2: async, isolated, parallel and inline boundaries become bundles.
    self.create_boundary_bundles()?;

    // Phase 3: which roots reach which assets synchronously.
    self.compute_reachability()?;

    // Phase 4: which assets are already loaded when a root runs.
    self.compute_availability()?;

    // Phase 5: drop async bundles that every parent already has.
    self.internalize_async_bundles()?;

    // Phase 6: place every asset, sharing or duplicating as configured.
    self.place_assets()?;

    // Phase 7: split manual shared bundles and fill in their constants.
    self.finalize_manual_shared_bundles()?;

    // Phase 8: fold shared bundles that are too small back into their sources.
    self.merge_small_shared_bundles()?;

    // Phase 9: keep every bundle group under the parallel request limit.
    self.enforce_parallel_request_limit()?;

    Ok(self.finish())
  }

  // ----------------------------
  // Shared helpers
  // ----------------------------

  fn decide(&mut self, phase: &'static str, kind: DecisionKind) {
    if self.options.collect_debug {
      self.decisions.push(phase, kind);
    }
  }

  fn asset(&self, key: AssetKey) -> &Arc<Asset> {
    &self.assets[key.index()]
  }

  fn empty_asset_set(&self) -> FixedBitSet {
    FixedBitSet::with_capacity(self.assets.len())
  }

  fn bundle(&self, bundle_id: NodeId) -> anyhow::Result<&IdealBundle> {
    self
      .bundle_graph
      .get_node(bundle_id)
      .and_then(IdealBundleNode::as_bundle)
      .with_context(|| format!("bundle {bundle_id} is not in the ideal bundle graph"))
  }

  fn bundle_mut(&mut self, bundle_id: NodeId) -> anyhow::Result<&mut IdealBundle> {
    self
      .bundle_graph
      .get_node_mut(bundle_id)
      .and_then(IdealBundleNode::as_bundle_mut)
      .with_context(|| format!("bundle {bundle_id} is not in the ideal bundle graph"))
  }

  fn add_bundle(&mut self, bundle: IdealBundle) -> NodeId {
    self.bundle_graph.add_node(IdealBundleNode::Bundle(bundle))
  }

  fn bundle_root(&self, key: AssetKey) -> anyhow::Result<(NodeId, NodeId)> {
    self
      .bundle_roots
      .get(&key)
      .copied()
      .with_context(|| format!("asset {} is not a bundle root", self.asset(key).id))
  }

  fn add_bundle_edge(&mut self, from: NodeId, to: NodeId) {
    if from != to {
      self.bundle_graph.add_edge(from, to, BundleEdge);
    }
  }

  fn connect_dependency_to_bundle(
    &mut self,
    dependency: &Arc<Dependency>,
    bundle_id: NodeId,
    edge: DependencyPriorityEdge,
  ) {
    let dependency_node_id = self
      .dependency_bundle_graph
      .add_node_by_content_key_if_needed(&dependency.id, || {
        DependencyBundleNode::Dependency(dependency.clone())
      });
    let bundle_node_id = self
      .dependency_bundle_graph
      .add_node_by_content_key_if_needed(&dependency_bundle_key(bundle_id), || {
        DependencyBundleNode::Bundle(bundle_id)
      });

    self
      .dependency_bundle_graph
      .add_edge(dependency_node_id, bundle_node_id, edge);
  }

  /// Adds `key` to the bundle of `root`. Assets of another type go to a sibling bundle of that
  /// type, shared by the whole bundle group.
  fn add_asset_to_bundle_root(&mut self, key: AssetKey, root: AssetKey) -> anyhow::Result<()> {
    let asset = self.asset(key).clone();
    let (root_bundle_id, group_id) = self.bundle_root(root)?;
    let root_bundle = self.bundle(root_bundle_id)?;

    let bundle_id = if root_bundle.bundle_type == asset.file_type {
      root_bundle_id
    } else {
      let group_entry = self
        .bundle(group_id)
        .ok()
        .and_then(|group| group.main_entry_asset)
        .or(root_bundle.main_entry_asset)
        .or(root_bundle.assets.first().copied())
        .with_context(|| format!("bundle {root_bundle_id} has no entry asset"))?;
      let type_key = format!(
        "{}.{}",
        self.asset(group_entry).id,
        asset.file_type.extension()
      );

      match self.bundles.get(&type_key) {
        Some(bundle_id) => *bundle_id,
        None => {
          let mut bundle = IdealBundle::empty(
            asset.file_type.clone(),
            root_bundle.env.clone(),
            root_bundle.target.clone(),
          );
          bundle.bundle_behavior = root_bundle.bundle_behavior;
          bundle.needs_stable_name = root_bundle.needs_stable_name;
          bundle.unique_key = Some(type_key.clone());

          let bundle_id = self.add_bundle(bundle);
          self.bundles.insert(type_key, bundle_id);
          self.add_bundle_edge(root_bundle_id, bundle_id);
          bundle_id
        }
      }
    };

    self.bundle_mut(bundle_id)?.add_asset(key, &asset);
    self.assign_inline_constants(key, bundle_id)
  }

  /// Adds `key` to a source bundle, going through its root so type changes are respected.
  fn add_asset_to_source_bundle(
    &mut self,
    key: AssetKey,
    source_bundle_id: NodeId,
  ) -> anyhow::Result<()> {
    let main_entry_asset = self.bundle(source_bundle_id)?.main_entry_asset;

    match main_entry_asset {
      Some(root)
        if self
          .bundle_roots
          .get(&root)
          .is_some_and(|(bundle_id, _)| *bundle_id == source_bundle_id) =>
      {
        self.add_asset_to_bundle_root(key, root)
      }
      _ => {
        let asset = self.asset(key).clone();
        self.bundle_mut(source_bundle_id)?.add_asset(key, &asset);
        self.assign_inline_constants(key, source_bundle_id)
      }
    }
  }

  /// Constant modules travel with every asset that imports them.
  fn assign_inline_constants(&mut self, parent: AssetKey, bundle_id: NodeId) -> anyhow::Result<()> {
    let Some(constants) = self.inline_constant_deps.get(&parent) else {
      return Ok(());
    };

    let constants: Vec<AssetKey> = constants.iter().copied().collect();
    for constant in constants {
      let asset = self.asset(constant).clone();
      self.bundle_mut(bundle_id)?.add_asset(constant, &asset);
    }

    Ok(())
  }

  /// Removes a shared bundle after moving its assets into every source bundle.
  fn remove_shared_bundle(&mut self, bundle_id: NodeId) -> anyhow::Result<()> {
    let bundle = self.bundle(bundle_id)?.clone();
    let source_bundles: Vec<NodeId> = bundle
      .source_bundles
      .iter()
      .copied()
      .filter(|source_bundle_id| self.bundle_graph.has_node(*source_bundle_id))
      .collect();

    for source_bundle_id in &source_bundles {
      for key in &bundle.assets {
        self.add_asset_to_source_bundle(*key, *source_bundle_id)?;
      }
    }

    self.reparent_bundle(bundle_id, &source_bundles)?;
    self.forget_bundle(bundle_id);
    Ok(())
  }

  /// Whatever `bundle_id` loads is also loaded by `sources`, so it keeps loading once
  /// `bundle_id` is gone from those sources.
  fn reparent_bundle(&mut self, bundle_id: NodeId, sources: &[NodeId]) -> anyhow::Result<()> {
    let children = self
      .bundle_graph
      .get_node_ids_connected_from(bundle_id, EdgeTypeQuery::All);
    for source_bundle_id in sources {
      for child in &children {
        self.add_bundle_edge(*source_bundle_id, *child);
      }
    }

    let dependents: Vec<NodeId> = self
      .bundle_graph
      .nodes()
      .filter_map(|(node_id, node)| {
        node
          .as_bundle()
          .filter(|bundle| bundle.source_bundles.contains(&bundle_id))
          .map(|_| node_id)
      })
      .collect();

    for dependent in dependents {
      let bundle = self.bundle_mut(dependent)?;
      for source_bundle_id in sources {
        if *source_bundle_id != dependent {
          bundle.source_bundles.insert(*source_bundle_id);
        }
      }
    }

    Ok(())
  }

  /// Deletes a bundle node, and any bundle only it loaded, along with every lookup into them.
  fn forget_bundle(&mut self, bundle_id: NodeId) {
    let removed: HashSet<NodeId> = self.bundle_graph.remove_node(bundle_id).into_iter().collect();

    let node_ids: Vec<NodeId> = self.bundle_graph.node_ids().collect();
    for node_id in node_ids {
      if let Some(bundle) = self
        .bundle_graph
        .get_node_mut(node_id)
        .and_then(IdealBundleNode::as_bundle_mut)
      {
        bundle
          .source_bundles
          .retain(|source_bundle_id| !removed.contains(source_bundle_id));
      }
    }

    for references in self.asset_reference.values_mut() {
      references.retain(|(_, referenced_bundle_id)| !removed.contains(referenced_bundle_id));
    }

    self.bundles.retain(|_, existing| !removed.contains(&*existing));
    self
      .manual_shared_map
      .retain(|_, existing| !removed.contains(&*existing));
    self
      .bundle_roots
      .retain(|_, (existing, _)| !removed.contains(&*existing));
    self
      .bundle_group_bundle_ids
      .retain(|existing| !removed.contains(existing));
    self
      .manual_shared_bundle_ids
      .retain(|existing| !removed.contains(existing));
  }

  // ----------------------------
  // Phase 0: assets and manual shared bundle rules
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn collect_assets(&mut self) {
    let asset_graph = self.asset_graph;
    let entry_dependencies = &self.entry_dependencies;
    let mut assets = Vec::new();
    let mut dependency_count = 0;

    asset_graph.traverse(asset_graph.root_node(), |node_id, node, actions| match node {
      AssetGraphNode::Root => {}
      AssetGraphNode::Dependency(dependency) => {
        // Entries of other targets are bundled separately
        if dependency.is_entry && !entry_dependencies.contains(&node_id) {
          actions.skip_children();
          return;
        }
        dependency_count += 1;
      }
      AssetGraphNode::Asset(asset) => assets.push((node_id, asset.clone())),
    });

    for (node_id, asset) in assets {
      // The asset graph numbers nodes with u32, so asset counts always fit
      let key = AssetKey(self.assets.len() as u32);
      self.asset_keys.insert(asset.id.clone(), key);
      self.asset_node_keys.insert(node_id, key);
      self.asset_nodes.push(node_id);
      self.assets.push(asset);
    }
    self.dependency_count = dependency_count;

    let asset_count = self.assets.len();
    self.reachable_roots = vec![FixedBitSet::with_capacity(asset_count); asset_count];
    self.reachable_assets = vec![FixedBitSet::with_capacity(asset_count); asset_count];
    self.ancestor_assets = vec![None; asset_count];

    for index in 0..asset_count {
      let key = AssetKey(index as u32);
      if !self.asset(key).is_constant_module {
        continue;
      }

      for dependency_node_id in asset_graph.get_incoming_dependencies(self.asset_nodes[index]) {
        let parent = asset_graph
          .get_asset_with_dependency(dependency_node_id)
          .and_then(|parent_node_id| self.asset_node_keys.get(&parent_node_id).copied());

        if let Some(parent) = parent {
          self
            .inline_constant_deps
            .entry(parent)
            .or_default()
            .insert(key);
        }
      }
    }

    debug!(
      assets = asset_count,
      dependencies = dependency_count,
      constants = self.inline_constant_deps.len(),
      "ideal graph: collected assets"
    );
  }

  #[instrument(level = "debug", skip_all)]
  fn resolve_manual_shared_bundles(&mut self) {
    let asset_graph = self.asset_graph;
    let config = self.config;
    let project_root = config.project_root.as_path();

    // Later rules are applied first so that earlier rules win
    for (rule_index, rule) in config.manual_shared_bundles.iter().enumerate().rev() {
      let start = match &rule.root {
        None => asset_graph.root_node(),
        Some(_) => {
          let root = self
            .assets
            .iter()
            .position(|asset| rule.is_root(asset, project_root));

          match root {
            Some(index) => self.asset_nodes[index],
            None => {
              let message = format!(
                "Manual shared bundle \"{}\" skipped, no root asset found",
                rule.name
              );
              warn!(origin = ORIGIN, "{message}");
              self.diagnostics.push(Diagnostic::new(ORIGIN, message));
              continue;
            }
          }
        }
      };

      let entry_dependencies = &self.entry_dependencies;
      let asset_node_keys = &self.asset_node_keys;
      let mut matches = Vec::new();

      asset_graph.traverse(start, |node_id, node, actions| match node {
        AssetGraphNode::Root => {}
        AssetGraphNode::Dependency(dependency) => {
          let foreign_entry = dependency.is_entry && !entry_dependencies.contains(&node_id);
          let leaves_root = rule.root.is_some() && dependency.priority == Priority::Lazy;
          if foreign_entry || leaves_root {
            actions.skip_children();
          }
        }
        AssetGraphNode::Asset(asset) => {
          let Some(key) = asset_node_keys.get(&node_id) else {
            return;
          };

          if rule.matches_type(&asset.file_type) && rule.matches_path(asset, project_root) {
            matches.push((*key, asset.is_constant_module));
          }
        }
      });

      for (key, is_constant_module) in matches {
        if is_constant_module {
          self
            .constant_module_to_manual_rules
            .entry(key)
            .or_default()
            .push(rule_index);
        } else {
          self.manual_asset_to_config.insert(key, rule_index);
        }
      }
    }

    debug!(
      manual_assets = self.manual_asset_to_config.len(),
      manual_constants = self.constant_module_to_manual_rules.len(),
      "ideal graph: resolved manual shared bundle rules"
    );
  }

  // ----------------------------
  // Phase 1: entry bundles
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn create_entry_bundles(&mut self) -> anyhow::Result<()> {
    for (dependency_node_id, asset_node_id) in self.entries.clone() {
      let dependency = self
        .asset_graph
        .get_dependency_node(dependency_node_id)
        .with_context(|| format!("entry dependency {dependency_node_id} is missing"))?
        .clone();
      let key = *self
        .asset_node_keys
        .get(&asset_node_id)
        .with_context(|| format!("entry asset {asset_node_id} was not collected"))?;
      let asset = self.asset(key).clone();

      self.entry_keys.insert(key);

      let bundle_id = match self.bundles.get(&asset.id) {
        Some(bundle_id) => *bundle_id,
        None => {
          let target = dependency
            .target
            .as_deref()
            .cloned()
            .with_context(|| format!("entry dependency {} has no target", dependency.specifier))?;

          let mut bundle = IdealBundle::with_entry(key, &asset, target);
          bundle.needs_stable_name = dependency.is_entry || dependency.needs_stable_name;

          let bundle_id = self.add_bundle(bundle);
          self.bundles.insert(asset.id.clone(), bundle_id);
          self.bundle_roots.insert(key, (bundle_id, bundle_id));
          self.bundle_group_bundle_ids.insert(bundle_id);
          self.add_bundle_edge(self.bundle_graph_root, bundle_id);

          self.decide(
            "entry_bundles",
            DecisionKind::BundleRootCreated {
              bundle: bundle_id,
              asset_id: asset.id.clone(),
              priority: dependency.priority,
            },
          );
          bundle_id
        }
      };

      self.connect_dependency_to_bundle(&dependency, bundle_id, dependency.priority.into());
    }

    debug!(entries = self.entry_keys.len(), "ideal graph: created entry bundles");
    Ok(())
  }

  // ----------------------------
  // Phase 2: bundle boundaries
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn create_boundary_bundles(&mut self) -> anyhow::Result<()> {
    let asset_graph = self.asset_graph;
    let mut visitor = BoundaryVisitor {
      builder: self,
      stack: Vec::new(),
      error: None,
    };

    asset_graph.traverse_with(asset_graph.root_node(), &mut visitor);

    if let Some(error) = visitor.error {
      return Err(error);
    }

    debug!(
      bundle_roots = self.bundle_roots.len(),
      bundle_groups = self.bundle_group_bundle_ids.len(),
      "ideal graph: created boundary bundles"
    );
    Ok(())
  }

  fn visit_dependency(
    &mut self,
    dependency_node_id: NodeId,
    dependency: &Arc<Dependency>,
    stack: &[(AssetKey, NodeId)],
  ) -> anyhow::Result<()> {
    for child_node_id in self.asset_graph.get_dependency_assets(dependency_node_id) {
      let Some(child_key) = self.asset_node_keys.get(&child_node_id).copied() else {
        continue;
      };
      let child = self.asset(child_key).clone();
      let behavior = dependency.bundle_behavior.or(child.bundle_behavior);

      if dependency.priority == Priority::Lazy
        || behavior.is_some_and(|behavior| behavior.is_isolated())
      {
        match self.manual_asset_to_config.get(&child_key).copied() {
          Some(rule_index) => {
            self.create_manual_async_bundle(dependency, child_key, &child, rule_index, stack)?
          }
          None => self.create_async_bundle(dependency, child_key, &child, stack)?,
        }
      } else if dependency.priority == Priority::Parallel
        || behavior == Some(BundleBehavior::Inline)
      {
        self.create_sibling_bundle(dependency, child_key, &child, stack)?;
      }
    }

    Ok(())
  }

  fn promote_isolated(&mut self, bundle_id: NodeId, dependency: &Dependency) -> anyhow::Result<()> {
    if dependency
      .bundle_behavior
      .is_some_and(|behavior| behavior.is_isolated())
    {
      let bundle = self.bundle_mut(bundle_id)?;
      if bundle.bundle_behavior.is_none() {
        bundle.bundle_behavior = dependency.bundle_behavior;
      }
    }

    Ok(())
  }

  /// Lazy and isolated dependencies start a new bundle group.
  fn create_async_bundle(
    &mut self,
    dependency: &Arc<Dependency>,
    child_key: AssetKey,
    child: &Arc<Asset>,
    stack: &[(AssetKey, NodeId)],
  ) -> anyhow::Result<()> {
    let bundle_id = match self.bundles.get(&child.id).copied() {
      Some(bundle_id) => {
        self.promote_isolated(bundle_id, dependency)?;
        bundle_id
      }
      None => {
        let (_, first_group_id) = stack
          .first()
          .with_context(|| {
            format!("dependency {} is outside of any bundle", dependency.specifier)
          })?;
        let target = self.bundle(*first_group_id)?.target.clone();

        let mut bundle = IdealBundle::with_entry(child_key, child, target);
        bundle.bundle_behavior = dependency.bundle_behavior.or(child.bundle_behavior);
        bundle.needs_stable_name = if dependency.bundle_behavior == Some(BundleBehavior::Inline)
          || child.bundle_behavior == Some(BundleBehavior::Inline)
        {
          false
        } else {
          dependency.is_entry || dependency.needs_stable_name
        };

        let bundle_id = self.add_bundle(bundle);
        self.bundles.insert(child.id.clone(), bundle_id);
        self.bundle_roots.insert(child_key, (bundle_id, bundle_id));
        self.bundle_group_bundle_ids.insert(bundle_id);
        self.add_bundle_edge(self.bundle_graph_root, bundle_id);

        self.decide(
          "boundary_bundles",
          DecisionKind::BundleRootCreated {
            bundle: bundle_id,
            asset_id: child.id.clone(),
            priority: dependency.priority,
          },
        );
        bundle_id
      }
    };

    self.connect_dependency_to_bundle(dependency, bundle_id, dependency.priority.into());
    Ok(())
  }

  /// Async imports of manual shared bundle assets load the manual bundle alongside the importer
  /// instead of starting a bundle group of their own.
  fn create_manual_async_bundle(
    &mut self,
    dependency: &Arc<Dependency>,
    child_key: AssetKey,
    child: &Arc<Asset>,
    rule_index: usize,
    stack: &[(AssetKey, NodeId)],
  ) -> anyhow::Result<()> {
    let (referencing_root, group_id) = *stack
      .last()
      .with_context(|| format!("dependency {} is outside of any bundle", dependency.specifier))?;
    let (referencing_bundle_id, _) = self.bundle_root(referencing_root)?;

    let rule_name = self.config.manual_shared_bundles[rule_index].name.clone();
    let manual_key = manual_bundle_key(&rule_name, &child.file_type);

    let bundle_id = match self.manual_shared_map.get(&manual_key).copied() {
      Some(bundle_id) => bundle_id,
      None => {
        let target = self.bundle(referencing_bundle_id)?.target.clone();
        let mut bundle = IdealBundle::with_entry(child_key, child, target);
        bundle.manual_shared_bundle = Some(rule_name);
        bundle.unique_key = Some(manual_key.clone());

        let bundle_id = self.add_bundle(bundle);
        self.manual_shared_map.insert(manual_key, bundle_id);
        self.manual_shared_bundle_ids.insert(bundle_id);

        self.decide(
          "boundary_bundles",
          DecisionKind::BundleRootCreated {
            bundle: bundle_id,
            asset_id: child.id.clone(),
            priority: dependency.priority,
          },
        );
        bundle_id
      }
    };

    let bundle = self.bundle_mut(bundle_id)?;
    bundle.add_asset(child_key, child);
    if referencing_bundle_id != bundle_id {
      bundle.source_bundles.insert(referencing_bundle_id);
    }
    self.add_bundle_edge(referencing_bundle_id, bundle_id);

    self.bundles.entry(child.id.clone()).or_insert(bundle_id);
    self
      .bundle_roots
      .entry(child_key)
      .or_insert((bundle_id, group_id));
    self
      .manual_bundle_to_internalized
      .entry(bundle_id)
      .or_default()
      .insert(child_key);
    self.manual_asset_to_bundle.insert(child_key, bundle_id);
    self.connect_dependency_to_bundle(dependency, bundle_id, dependency.priority.into());

    Ok(())
  }

  /// Parallel and inline dependencies get a bundle in the referencing bundle's group.
  fn create_sibling_bundle(
    &mut self,
    dependency: &Arc<Dependency>,
    child_key: AssetKey,
    child: &Arc<Asset>,
    stack: &[(AssetKey, NodeId)],
  ) -> anyhow::Result<()> {
    let (referencing_root, group_id) = *stack
      .last()
      .with_context(|| format!("dependency {} is outside of any bundle", dependency.specifier))?;
    let (referencing_bundle_id, _) = self.bundle_root(referencing_root)?;

    let bundle_id = match self.bundles.get(&child.id).copied() {
      Some(bundle_id) => {
        self.promote_isolated(bundle_id, dependency)?;
        bundle_id
      }
      None => {
        let referencing_bundle = self.bundle(referencing_bundle_id)?;
        let mut bundle =
          IdealBundle::with_entry(child_key, child, referencing_bundle.target.clone());
        bundle.bundle_behavior = dependency.bundle_behavior.or(child.bundle_behavior);
        bundle.needs_stable_name = if child.bundle_behavior == Some(BundleBehavior::Inline)
          || dependency.bundle_behavior == Some(BundleBehavior::Inline)
          || (dependency.priority == Priority::Parallel && !dependency.needs_stable_name)
        {
          false
        } else {
          referencing_bundle.needs_stable_name
        };

        let bundle_id = self.add_bundle(bundle);
        self.bundles.insert(child.id.clone(), bundle_id);

        self.decide(
          "boundary_bundles",
          DecisionKind::BundleRootCreated {
            bundle: bundle_id,
            asset_id: child.id.clone(),
            priority: dependency.priority,
          },
        );
        bundle_id
      }
    };

    self.bundle_roots.insert(child_key, (bundle_id, group_id));
    self.add_bundle_edge(referencing_bundle_id, bundle_id);
    // Nested siblings still load with the group
    self.add_bundle_edge(group_id, bundle_id);

    if bundle_id != group_id {
      self.connect_dependency_to_bundle(dependency, bundle_id, DependencyPriorityEdge::Parallel);
    }

    self
      .asset_reference
      .entry(child_key)
      .or_default()
      .push((dependency.clone(), bundle_id));

    Ok(())
  }

  // ----------------------------
  // Phase 3: reachability
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn compute_reachability(&mut self) -> anyhow::Result<()> {
    let virtual_root = self.bundle_root_graph.add_node(BundleRootNode::VirtualRoot);
    self.bundle_root_graph.set_root_node_id(virtual_root);

    let roots: Vec<AssetKey> = self.bundle_roots.keys().copied().collect();
    for root in &roots {
      let node_id = self.bundle_root_graph.add_node(BundleRootNode::Root(*root));
      self.bundle_root_nodes.insert(*root, node_id);

      if self.entry_keys.contains(root) {
        self
          .bundle_root_graph
          .add_edge(virtual_root, node_id, BundleRootEdge::Lazy);
      }
    }

    for root in roots {
      let (reached, loaded_roots) = self.reach_from(root)?;

      for key in reached {
        self.reachable_roots[key.index()].insert(root.index());
        self.reachable_assets[root.index()].insert(key.index());
      }

      let from = self.bundle_root_nodes[&root];
      for (child_root, edge) in loaded_roots {
        if let Some(to) = self.bundle_root_nodes.get(&child_root).copied() {
          self.bundle_root_graph.add_edge(from, to, edge);
        }
      }
    }

    debug!(
      bundle_roots = self.bundle_root_nodes.len(),
      bundle_root_edges = self.bundle_root_graph.edge_count(),
      "ideal graph: computed reachability"
    );
    Ok(())
  }

  /// Walks the synchronous subgraph of `root`. Returns the assets reached and the bundle roots
  /// `root` loads through parallel or lazy dependencies.
  fn reach_from(
    &self,
    root: AssetKey,
  ) -> anyhow::Result<(Vec<AssetKey>, Vec<(AssetKey, BundleRootEdge)>)> {
    let root_node_id = self.asset_nodes[root.index()];
    let (root_bundle_id, _) = self.bundle_root(root)?;
    let root_context = self.bundle(root_bundle_id)?.env.context;

    let mut reached = Vec::new();
    let mut loaded_roots = Vec::new();

    self
      .asset_graph
      .traverse(root_node_id, |node_id, node, actions| {
        if node_id == root_node_id {
          return;
        }

        match node {
          AssetGraphNode::Root => {}
          AssetGraphNode::Dependency(dependency) => {
            let opened_bundle = self.dependency_bundle_graph.has_content_key(&dependency.id);
            if dependency.priority == Priority::Sync && !opened_bundle {
              return;
            }

            actions.skip_children();
            if !opened_bundle {
              return;
            }

            let edge = match dependency.priority {
              Priority::Lazy => BundleRootEdge::Lazy,
              Priority::Sync | Priority::Parallel => BundleRootEdge::Parallel,
            };

            for child_node_id in self.asset_graph.get_dependency_assets(node_id) {
              let Some(child) = self.asset_node_keys.get(&child_node_id).copied() else {
                continue;
              };
              let Some(bundle) = self
                .bundle_roots
                .get(&child)
                .and_then(|(bundle_id, _)| self.bundle(*bundle_id).ok())
              else {
                continue;
              };

              if bundle.bundle_behavior.is_none()
                && !bundle.env.is_isolated()
                && bundle.env.context == root_context
              {
                loaded_roots.push((child, edge));
              }
            }
          }
          AssetGraphNode::Asset(asset) => {
            let Some(key) = self.asset_node_keys.get(&node_id).copied() else {
              actions.skip_children();
              return;
            };

            if asset.bundle_behavior.is_some() {
              actions.skip_children();
              return;
            }

            // Constants are placed with their parents
            if !asset.is_constant_module {
              reached.push(key);
            }
          }
        }
      });

    Ok((reached, loaded_roots))
  }

  // ----------------------------
  // Phase 4: availability
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn compute_availability(&mut self) -> anyhow::Result<()> {
    let order = self.bundle_root_graph.topo_sort(EdgeTypeQuery::All);

    for node_id in order {
      let Some(BundleRootNode::Root(root)) = self.bundle_root_graph.get_node(node_id).copied()
      else {
        continue;
      };

      let (bundle_id, group_id) = self.bundle_root(root)?;
      let isolated = is_isolated(self.bundle(bundle_id)?);

      let group_bundles =
        bundle_group_members(&self.bundle_graph, &self.bundle_group_bundle_ids, group_id);

      let mut parallel_availability = self.empty_asset_set();
      let children = self
        .bundle_root_graph
        .get_node_ids_connected_from(node_id, EdgeTypeQuery::All);

      for child_node_id in children {
        let Some(BundleRootNode::Root(child)) =
          self.bundle_root_graph.get_node(child_node_id).copied()
        else {
          continue;
        };
        let (child_bundle_id, _) = self.bundle_root(child)?;
        if self.bundle(child_bundle_id)?.bundle_behavior.is_some() {
          continue;
        }

        // A bundle of the group cannot count itself as already loaded
        let mut available = if isolated {
          self.empty_asset_set()
        } else {
          self.group_availability(root, &group_bundles, child_bundle_id)?
        };

        let is_parallel =
          self
            .bundle_root_graph
            .has_edge(node_id, child_node_id, EdgeTypeQuery::Type(BundleRootEdge::Parallel));
        if is_parallel {
          available.union_with(&parallel_availability);
          parallel_availability.union_with(&self.reachable_assets[child.index()]);
          parallel_availability.insert(child.index());
        }

        if let Some(ancestor_assets) = &mut self.ancestor_assets[child.index()] {
          ancestor_assets.intersect_with(&available);
        } else {
          self.ancestor_assets[child.index()] = Some(available);
        }
      }
    }

    debug!(
      roots_with_ancestors = self.ancestor_assets.iter().filter(|a| a.is_some()).count(),
      "ideal graph: computed availability"
    );
    Ok(())
  }

  /// Assets loaded once `root` runs: its own ancestors plus everything in its bundle group.
  fn group_availability(
    &self,
    root: AssetKey,
    group_bundles: &[NodeId],
    excluded_bundle_id: NodeId,
  ) -> anyhow::Result<FixedBitSet> {
    let mut available = self.ancestor_assets[root.index()]
      .clone()
      .unwrap_or_else(|| self.empty_asset_set());

    for bundle_id in group_bundles {
      if *bundle_id == excluded_bundle_id {
        continue;
      }

      let bundle = self.bundle(*bundle_id)?;
      if bundle.bundle_behavior.is_some() {
        continue;
      }

      for key in &bundle.assets {
        available.insert(key.index());
        available.union_with(&self.reachable_assets[key.index()]);
      }
    }

    Ok(available)
  }

  // ----------------------------
  // Phase 5: internalization
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn internalize_async_bundles(&mut self) -> anyhow::Result<()> {
    let node_ids: Vec<NodeId> = self.bundle_root_graph.node_ids().collect();
    let mut deleted = 0;

    for node_id in node_ids {
      let Some(BundleRootNode::Root(root)) = self.bundle_root_graph.get_node(node_id).copied()
      else {
        continue;
      };
      let Some((bundle_id, _)) = self.bundle_roots.get(&root).copied() else {
        continue;
      };

      let parents = self
        .bundle_root_graph
        .get_node_ids_connected_to(node_id, EdgeTypeQuery::All);
      if parents.is_empty() {
        continue;
      }

      let mut can_delete = !is_isolated(self.bundle(bundle_id)?);
      let mut internalizing_parents = Vec::new();

      for parent_node_id in parents {
        let Some(BundleRootNode::Root(parent)) =
          self.bundle_root_graph.get_node(parent_node_id).copied()
        else {
          can_delete = false;
          continue;
        };

        let already_loaded = self.reachable_assets[parent.index()].contains(root.index())
          || self.ancestor_assets[parent.index()]
            .as_ref()
            .is_some_and(|ancestors| ancestors.contains(root.index()));

        if !already_loaded {
          can_delete = false;
          continue;
        }

        let (parent_bundle_id, _) = self.bundle_root(parent)?;
        let asset_count = self.assets.len();
        self
          .bundle_mut(parent_bundle_id)?
          .internalized_assets
          .get_or_insert_with(|| FixedBitSet::with_capacity(asset_count))
          .insert(root.index());
        internalizing_parents.push(parent);
      }

      if can_delete && !self.manual_asset_to_config.contains_key(&root) {
        self.delete_bundle_root(root, &internalizing_parents)?;
        deleted += 1;
      }
    }

    debug!(deleted, "ideal graph: internalized async bundles");
    Ok(())
  }

  /// Deletes the bundle of an internalized root. Bundles that loaded with it now load with the
  /// bundles that absorbed it.
  fn delete_bundle_root(&mut self, root: AssetKey, parents: &[AssetKey]) -> anyhow::Result<()> {
    let (bundle_id, _) = self.bundle_root(root)?;
    let parent_roots = parents
      .iter()
      .map(|parent| self.bundle_root(*parent))
      .collect::<anyhow::Result<Vec<_>>>()?;

    let parent_bundle_ids: Vec<NodeId> = parent_roots
      .iter()
      .map(|(parent_bundle_id, _)| *parent_bundle_id)
      .collect();
    self.reparent_bundle(bundle_id, &parent_bundle_ids)?;

    if let Some((_, parent_group_id)) = parent_roots.first() {
      for (_, group_id) in self.bundle_roots.values_mut() {
        if *group_id == bundle_id {
          *group_id = *parent_group_id;
        }
      }
    }

    self.bundle_roots.shift_remove(&root);
    let asset_id = self.asset(root).id.clone();
    self.bundles.remove(&asset_id);
    self.forget_bundle(bundle_id);

    // Roots loaded by the deleted one are now loaded by its parents
    if let Some(node_id) = self.bundle_root_nodes.remove(&root) {
      let children = self
        .bundle_root_graph
        .get_node_ids_connected_from(node_id, EdgeTypeQuery::All);
      for parent in parents {
        let Some(parent_node_id) = self.bundle_root_nodes.get(parent).copied() else {
          continue;
        };
        for child in children.iter().filter(|child| **child != parent_node_id) {
          self
            .bundle_root_graph
            .add_edge(parent_node_id, *child, BundleRootEdge::Lazy);
        }
      }
      self.bundle_root_graph.remove_node(node_id);
    }

    self.decide("internalization", DecisionKind::BundleInternalized { asset_id });
    Ok(())
  }

  // ----------------------------
  // Phase 6: placement
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn place_assets(&mut self) -> anyhow::Result<()> {
    for index in 0..self.assets.len() {
      let key = AssetKey(index as u32);
      let asset = self.asset(key).clone();

      if let Some((bundle_id, _)) = self.bundle_roots.get(&key).copied() {
        self.assign_inline_constants(key, bundle_id)?;
      }

      if asset.is_constant_module {
        continue;
      }

      let mut reachable = Vec::new();
      let reachable_roots: Vec<usize> = self.reachable_roots[index].ones().collect();
      for root_index in reachable_roots {
        let root = AssetKey(root_index as u32);
        let Some((root_bundle_id, _)) = self.bundle_roots.get(&root).copied() else {
          continue;
        };

        let root_bundle = self.bundle(root_bundle_id)?;
        let keeps_its_assets = self.entry_keys.contains(&root)
          || !self.asset(root).is_bundle_splittable
          || root_bundle.needs_stable_name
          || is_isolated(root_bundle);

        if keeps_its_assets {
          self.add_asset_to_bundle_root(key, root)?;
        } else if !self.ancestor_assets[root_index]
          .as_ref()
          .is_some_and(|ancestors| ancestors.contains(index))
        {
          reachable.push(root);
        }
      }

      if let Some(rule_index) = self.manual_asset_to_config.get(&key).copied() {
        if !reachable.is_empty() {
          self.place_in_manual_shared_bundle(key, rule_index, &reachable)?;
          continue;
        }
      }

      if !self.config.disable_shared_bundles {
        self.reuse_bundles(key, &mut reachable)?;
      }

      if !self.config.disable_shared_bundles && reachable.len() > self.config.min_bundles {
        self.place_in_shared_bundle(key, &reachable)?;
      } else {
        for root in reachable {
          self.add_asset_to_bundle_root(key, root)?;
        }
      }
    }

    debug!(
      bundles = self.bundle_graph.node_count() - 1,
      "ideal graph: placed assets"
    );
    Ok(())
  }

  /// Drops candidates that can load an existing bundle holding `key` instead.
  ///
  /// When several bundles qualify, the one whose root has the lowest asset key wins.
  fn reuse_bundles(&mut self, key: AssetKey, reachable: &mut Vec<AssetKey>) -> anyhow::Result<()> {
    let asset_id = self.asset(key).id.clone();
    let candidates = reachable.clone();

    for candidate in &candidates {
      if self.asset(*candidate).env.is_isolated() {
        continue;
      }

      let (candidate_bundle_id, _) = self.bundle_root(*candidate)?;

      let reused_bundle_id = match self.bundles.get(&asset_id).copied() {
        Some(own_bundle_id) => Some(own_bundle_id),
        None => candidates
          .iter()
          .filter(|other| *other != candidate)
          .find(|other| {
            self.reachable_roots[other.index()].contains(candidate.index())
              && !self.ancestor_assets[candidate.index()]
                .as_ref()
                .is_some_and(|ancestors| ancestors.contains(other.index()))
          })
          .and_then(|other| self.bundle_roots.get(other))
          .map(|(other_bundle_id, _)| *other_bundle_id),
      };

      let Some(reused_bundle_id) = reused_bundle_id else {
        continue;
      };
      if reused_bundle_id == candidate_bundle_id {
        continue;
      }

      reachable.retain(|root| root != candidate);
      self.add_bundle_edge(candidate_bundle_id, reused_bundle_id);
      self
        .bundle_mut(reused_bundle_id)?
        .source_bundles
        .insert(candidate_bundle_id);

      self.decide(
        "placement",
        DecisionKind::BundleReused {
          source_bundle: candidate_bundle_id,
          reused_bundle: reused_bundle_id,
          asset_id: asset_id.clone(),
        },
      );
    }

    Ok(())
  }

  fn place_in_shared_bundle(
    &mut self,
    key: AssetKey,
    reachable: &[AssetKey],
  ) -> anyhow::Result<()> {
    let asset = self.asset(key).clone();
    let source_bundles = reachable
      .iter()
      .map(|root| self.bundle_root(*root).map(|(bundle_id, _)| bundle_id))
      .collect::<anyhow::Result<Vec<_>>>()?;

    let mut root_ids: Vec<&str> = reachable
      .iter()
      .map(|root| self.asset(*root).id.as_str())
      .collect();
    root_ids.sort_unstable();
    let shared_key = format!("{}.{}", root_ids.join(","), asset.file_type.extension());

    let bundle_id = match self.bundles.get(&shared_key).copied() {
      Some(bundle_id) => bundle_id,
      None => {
        let first_source = source_bundles
          .first()
          .with_context(|| format!("shared asset {} is not reachable", asset.id))?;
        let first_source = self.bundle(*first_source)?;
        let (env, target) = (first_source.env.clone(), first_source.target.clone());

        let mut internalized_assets = first_source
          .internalized_assets
          .clone()
          .unwrap_or_else(|| self.empty_asset_set());
        for source_bundle_id in &source_bundles[1..] {
          match &self.bundle(*source_bundle_id)?.internalized_assets {
            Some(source_internalized) => internalized_assets.intersect_with(source_internalized),
            None => internalized_assets.clear(),
          }
        }

        let mut bundle = IdealBundle::empty(asset.file_type.clone(), env, target);
        bundle.source_bundles = source_bundles.iter().copied().collect();
        bundle.internalized_assets = Some(internalized_assets);

        let bundle_id = self.add_bundle(bundle);
        self.bundles.insert(shared_key, bundle_id);

        self.decide(
          "placement",
          DecisionKind::SharedBundleCreated {
            bundle: bundle_id,
            source_bundles: source_bundles.len(),
          },
        );
        bundle_id
      }
    };

    self.bundle_mut(bundle_id)?.add_asset(key, &asset);
    self.assign_inline_constants(key, bundle_id)?;

    for source_bundle_id in source_bundles {
      self.add_bundle_edge(source_bundle_id, bundle_id);
    }

    Ok(())
  }

  fn place_in_manual_shared_bundle(
    &mut self,
    key: AssetKey,
    rule_index: usize,
    reachable: &[AssetKey],
  ) -> anyhow::Result<()> {
    let asset = self.asset(key).clone();
    let rule_name = self.config.manual_shared_bundles[rule_index].name.clone();
    let manual_key = manual_bundle_key(&rule_name, &asset.file_type);
    let source_bundles = reachable
      .iter()
      .map(|root| self.bundle_root(*root).map(|(bundle_id, _)| bundle_id))
      .collect::<anyhow::Result<Vec<_>>>()?;

    let bundle_id = match self.manual_shared_map.get(&manual_key).copied() {
      Some(bundle_id) => bundle_id,
      None => {
        let first_source = source_bundles
          .first()
          .with_context(|| format!("manual shared asset {} is not reachable", asset.id))?;
        let first_source = self.bundle(*first_source)?;
        let mut bundle = IdealBundle::empty(
          asset.file_type.clone(),
          first_source.env.clone(),
          first_source.target.clone(),
        );
        bundle.manual_shared_bundle = Some(rule_name);
        bundle.unique_key = Some(manual_key.clone());

        let bundle_id = self.add_bundle(bundle);
        self.manual_shared_map.insert(manual_key, bundle_id);
        self.manual_shared_bundle_ids.insert(bundle_id);
        bundle_id
      }
    };

    let bundle = self.bundle_mut(bundle_id)?;
    bundle.add_asset(key, &asset);
    for source_bundle_id in &source_bundles {
      if *source_bundle_id != bundle_id {
        bundle.source_bundles.insert(*source_bundle_id);
      }
    }

    for source_bundle_id in source_bundles {
      self.add_bundle_edge(source_bundle_id, bundle_id);
    }

    self.manual_asset_to_bundle.insert(key, bundle_id);
    self.assign_inline_constants(key, bundle_id)
  }

  // ----------------------------
  // Phase 7: manual shared bundles
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn finalize_manual_shared_bundles(&mut self) -> anyhow::Result<()> {
    self.split_manual_shared_bundles()?;

    let config = self.config;
    for (constant, rule_indexes) in self.constant_module_to_manual_rules.clone() {
      let asset = self.asset(constant).clone();
      for rule_index in rule_indexes {
        let rule = &config.manual_shared_bundles[rule_index];
        let manual_key = manual_bundle_key(&rule.name, &asset.file_type);
        let Some(base_bundle_id) = self.manual_shared_map.get(&manual_key).copied() else {
          continue;
        };

        // Split partitions that import the constant carry their own copy
        let mut bundle_ids: Vec<NodeId> = self
          .manual_rule_bundles(&rule.name, &asset.file_type)
          .into_iter()
          .filter(|bundle_id| self.bundle_imports_constant(*bundle_id, constant))
          .collect();
        if bundle_ids.is_empty() {
          bundle_ids.push(base_bundle_id);
        }

        for bundle_id in bundle_ids {
          self.bundle_mut(bundle_id)?.add_asset(constant, &asset);
        }
      }
    }

    // Async imports of manual bundle assets resolve inside the manual bundle, so none of them
    // keep an entry asset
    let asset_count = self.assets.len();
    for (_, roots) in self.manual_bundle_to_internalized.clone() {
      for root in roots {
        let Some(bundle_id) = self.manual_asset_to_bundle.get(&root).copied() else {
          continue;
        };
        self
          .bundle_mut(bundle_id)?
          .internalized_assets
          .get_or_insert_with(|| FixedBitSet::with_capacity(asset_count))
          .insert(root.index());
      }
    }

    for bundle_id in self.manual_shared_bundle_ids.clone() {
      self.bundle_mut(bundle_id)?.main_entry_asset = None;
    }

    debug!(
      manual_bundles = self.manual_shared_bundle_ids.len(),
      "ideal graph: finalized manual shared bundles"
    );
    Ok(())
  }

  /// Spreads the assets of manual bundles with a `split` over that many bundles, by asset id hash.
  fn split_manual_shared_bundles(&mut self) -> anyhow::Result<()> {
    let config = self.config;
    for rule in &config.manual_shared_bundles {
      let Some(split) = rule.split.filter(|split| *split > 1) else {
        continue;
      };

      let prefix = format!("{},", rule.name);
      let bundle_ids: Vec<NodeId> = self
        .manual_shared_map
        .iter()
        .filter(|(manual_key, _)| manual_key.starts_with(&prefix))
        .map(|(_, bundle_id)| *bundle_id)
        .collect();

      for bundle_id in bundle_ids {
        let bundle = self.bundle(bundle_id)?.clone();

        // Constants go wherever the assets importing them go
        let mut partitions: IndexMap<u64, Vec<AssetKey>> = IndexMap::new();
        for key in &bundle.assets {
          if self.asset(*key).is_constant_module {
            continue;
          }
          let remainder = hash_u64(&self.asset(*key).id) % u64::from(split);
          partitions.entry(remainder).or_default().push(*key);
        }
        partitions.sort_keys();

        if partitions.len() < 2 {
          continue;
        }

        for (index, (_, keys)) in partitions.into_iter().enumerate().skip(1) {
          let mut partition = IdealBundle::empty(
            bundle.bundle_type.clone(),
            bundle.env.clone(),
            bundle.target.clone(),
          );
          partition.manual_shared_bundle = Some(rule.name.clone());
          partition.unique_key = Some(format!(
            "{}{}{}",
            rule.name,
            bundle.bundle_type.extension(),
            index
          ));
          partition.source_bundles = bundle.source_bundles.clone();
          partition.internalized_assets = bundle.internalized_assets.clone();

          for key in &keys {
            let asset = self.asset(*key).clone();
            self.bundle_mut(bundle_id)?.remove_asset(*key, &asset);
            partition.add_asset(*key, &asset);
          }

          let partition_id = self.add_bundle(partition);
          self.manual_shared_bundle_ids.insert(partition_id);
          for source_bundle_id in &bundle.source_bundles {
            self.add_bundle_edge(*source_bundle_id, partition_id);
          }
          for key in &keys {
            self.assign_inline_constants(*key, partition_id)?;
          }
          for key in keys {
            if self.manual_asset_to_bundle.contains_key(&key) {
              self.manual_asset_to_bundle.insert(key, partition_id);
            }
          }
        }

        self.remove_unused_constants(bundle_id)?;

        self.decide(
          "manual_shared_bundles",
          DecisionKind::ManualBundleSplit {
            bundle: bundle_id,
            partitions: split as usize,
          },
        );
      }
    }

    Ok(())
  }

  /// The bundles of a manual shared bundle rule for one file type, split partitions included.
  fn manual_rule_bundles(&self, rule_name: &str, file_type: &FileType) -> Vec<NodeId> {
    self
      .manual_shared_bundle_ids
      .iter()
      .copied()
      .filter(|bundle_id| {
        self.bundle(*bundle_id).is_ok_and(|bundle| {
          bundle.manual_shared_bundle.as_deref() == Some(rule_name)
            && bundle.bundle_type == *file_type
        })
      })
      .collect()
  }

  fn bundle_imports_constant(&self, bundle_id: NodeId, constant: AssetKey) -> bool {
    self.bundle(bundle_id).is_ok_and(|bundle| {
      bundle.assets.iter().any(|key| {
        self
          .inline_constant_deps
          .get(key)
          .is_some_and(|constants| constants.contains(&constant))
      })
    })
  }

  /// Removes constant modules that no remaining asset of the bundle imports.
  fn remove_unused_constants(&mut self, bundle_id: NodeId) -> anyhow::Result<()> {
    let bundle = self.bundle(bundle_id)?;
    let unused: Vec<AssetKey> = bundle
      .assets
      .iter()
      .copied()
      .filter(|key| self.asset(*key).is_constant_module)
      .filter(|key| !self.bundle_imports_constant(bundle_id, *key))
      .collect();

    for key in unused {
      let asset = self.asset(key).clone();
      self.bundle_mut(bundle_id)?.remove_asset(key, &asset);
    }
    Ok(())
  }

  // ----------------------------
  // Phase 8: size merge-back
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn merge_small_shared_bundles(&mut self) -> anyhow::Result<()> {
    let small_bundles: Vec<(NodeId, u64)> = self
      .bundle_graph
      .nodes()
      .filter_map(|(bundle_id, node)| Some((bundle_id, node.as_bundle()?)))
      .filter(|(bundle_id, bundle)| {
        bundle.is_shared()
          && !self.manual_shared_bundle_ids.contains(bundle_id)
          && bundle.size < self.config.min_bundle_size
      })
      .map(|(bundle_id, bundle)| (bundle_id, bundle.size))
      .collect();

    for (bundle_id, size) in &small_bundles {
      if !self.bundle_graph.has_node(*bundle_id) {
        continue;
      }
      self.remove_shared_bundle(*bundle_id)?;
      self.decide(
        "merge_small_shared_bundles",
        DecisionKind::SharedBundleMerged {
          bundle: *bundle_id,
          size: *size,
        },
      );
    }

    debug!(
      merged = small_bundles.len(),
      "ideal graph: merged small shared bundles"
    );
    Ok(())
  }

  // ----------------------------
  // Phase 9: parallel request limit
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn enforce_parallel_request_limit(&mut self) -> anyhow::Result<()> {
    // Only shared bundles are ever removed to meet the limit
    if self.config.disable_shared_bundles {
      return Ok(());
    }

    let group_ids = self
      .bundle_graph
      .get_node_ids_connected_from(self.bundle_graph_root, EdgeTypeQuery::All);
    let mut removed = 0;

    for group_id in group_ids {
      if !self.bundle_graph.has_node(group_id) {
        continue;
      }

      let group_bundles =
        bundle_group_members(&self.bundle_graph, &self.bundle_group_bundle_ids, group_id);

      let mut loaded_bundles = 0;
      let mut candidates = Vec::new();
      for bundle_id in &group_bundles {
        let bundle = self.bundle(*bundle_id)?;
        if bundle
          .bundle_behavior
          .is_some_and(|behavior| behavior.is_inline())
        {
          continue;
        }

        loaded_bundles += 1;
        if *bundle_id != group_id
          && bundle.is_shared()
          && !self.manual_shared_bundle_ids.contains(bundle_id)
        {
          candidates.push((bundle.size, *bundle_id));
        }
      }

      if loaded_bundles <= self.config.max_parallel_requests {
        continue;
      }

      candidates.sort();
      let mut modified_bundles = IndexSet::new();

      for (_, bundle_id) in candidates {
        if loaded_bundles <= self.config.max_parallel_requests {
          break;
        }
        if !self.bundle_graph.has_node(bundle_id) {
          continue;
        }

        let bundle = self.bundle(bundle_id)?.clone();
        let group_sources: Vec<NodeId> = bundle
          .source_bundles
          .iter()
          .copied()
          .filter(|source_bundle_id| group_bundles.contains(source_bundle_id))
          .collect();

        if group_sources.is_empty() {
          continue;
        }

        self.reparent_bundle(bundle_id, &group_sources)?;

        for source_bundle_id in &group_sources {
          for key in &bundle.assets {
            self.add_asset_to_source_bundle(*key, *source_bundle_id)?;
          }

          self
            .bundle_mut(bundle_id)?
            .source_bundles
            .shift_remove(source_bundle_id);
          if self.bundle_graph.has_edge(
            *source_bundle_id,
            bundle_id,
            EdgeTypeQuery::Type(BundleEdge),
          ) {
            self
              .bundle_graph
              .remove_edge(*source_bundle_id, bundle_id, BundleEdge, false);
          }
          modified_bundles.insert(*source_bundle_id);
        }

        if self.bundle(bundle_id)?.source_bundles.is_empty() {
          self.forget_bundle(bundle_id);
        }

        loaded_bundles -= 1;
        removed += 1;
        self.decide(
          "parallel_request_limit",
          DecisionKind::SharedBundleRemovedForParallelRequestLimit {
            bundle: bundle_id,
            bundle_group: group_id,
          },
        );
      }

      for bundle_id in modified_bundles {
        if let Ok(bundle) = self.bundle_mut(bundle_id) {
          bundle.assets.sort();
        }
      }
    }

    debug!(removed, "ideal graph: enforced parallel request limit");
    Ok(())
  }

  fn finish(self) -> (IdealGraph, IdealGraphBuildStats) {
    let stats = IdealGraphBuildStats {
      assets: self.assets.len(),
      dependencies: self.dependency_count,
      bundles: self.bundle_graph.node_count() - 1,
      bundle_groups: self.bundle_group_bundle_ids.len(),
    };

    debug!(
      assets = stats.assets,
      dependencies = stats.dependencies,
      bundles = stats.bundles,
      bundle_groups = stats.bundle_groups,
      "ideal graph: built"
    );

    let debug = self.options.collect_debug.then(|| IdealGraphDebug {
      decisions: self.decisions,
    });

    let graph = IdealGraph {
      assets: self.assets,
      asset_keys: self.asset_keys,
      bundle_graph: self.bundle_graph,
      dependency_bundle_graph: self.dependency_bundle_graph,
      bundle_group_bundle_ids: self.bundle_group_bundle_ids,
      asset_reference: self.asset_reference,
      manual_asset_to_bundle: self.manual_asset_to_bundle,
      diagnostics: self.diagnostics,
      debug,
    };

    (graph, stats)
  }
}

/// Walks the asset graph keeping a stack of (bundle root, bundle group) for the bundle currently
/// being filled.
struct BoundaryVisitor<'b, 'a> {
  builder: &'b mut IdealGraphBuilder<'a>,
  stack: Vec<(AssetKey, NodeId)>,
  error: Option<anyhow::Error>,
}

impl GraphVisitor<AssetGraphNode, ()> for BoundaryVisitor<'_, '_> {
  fn enter(
    &mut self,
    node_id: NodeId,
    node: &AssetGraphNode,
    _context: Option<&()>,
    actions: &mut TraversalActions,
  ) -> Option<()> {
    match node {
      AssetGraphNode::Root => {}
      AssetGraphNode::Asset(_) => {
        let Some(key) = self.builder.asset_node_keys.get(&node_id).copied() else {
          actions.skip_children();
          return None;
        };

        if let Some((bundle_id, group_id)) = self.builder.bundle_roots.get(&key).copied() {
          let group_id = match self.stack.last() {
            Some((_, current_group_id)) if bundle_id != group_id => *current_group_id,
            _ => group_id,
          };
          self.stack.push((key, group_id));
        }
      }
      AssetGraphNode::Dependency(dependency) => {
        if dependency.is_entry {
          if !self.builder.entry_dependencies.contains(&node_id) {
            actions.skip_children();
          }
          return None;
        }

        if let Err(error) = self
          .builder
          .visit_dependency(node_id, dependency, &self.stack)
        {
          self.error = Some(error);
          actions.stop();
        }
      }
    }

    None
  }

  fn exit(&mut self, node_id: NodeId, node: &AssetGraphNode, _actions: &mut TraversalActions) {
    if !matches!(node, AssetGraphNode::Asset(_)) {
      return;
    }

    let key = self.builder.asset_node_keys.get(&node_id);
    if self.stack.last().map(|(root, _)| root) == key {
      self.stack.pop();
    }
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::test_utils::test_config;
  use crate::test_utils::AssetGraphFixture;

  use super::*;

  /// index lazily loads x and y, which both import shared.
  fn two_async_bundles_sharing() -> AssetGraphFixture {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    fixture.asset("src/x.js", 10);
    fixture.asset("src/y.js", 10);
    fixture.asset("src/shared.js", 10);
    fixture.lazy("src/index.js", "src/x.js");
    fixture.lazy("src/index.js", "src/y.js");
    fixture.sync("src/x.js", "src/shared.js");
    fixture.sync("src/y.js", "src/shared.js");
    fixture
  }

  /// Runs every phase up to and including asset placement.
  fn placed<'a>(asset_graph: &'a AssetGraph, config: &'a BundlerConfig) -> IdealGraphBuilder<'a> {
    let mut builder = IdealGraphBuilder::new(
      asset_graph,
      config,
      asset_graph.get_entries(),
      IdealGraphBuildOptions::default(),
    );
    builder.collect_assets();
    builder.resolve_manual_shared_bundles();
    builder.create_entry_bundles().unwrap();
    builder.create_boundary_bundles().unwrap();
    builder.compute_reachability().unwrap();
    builder.compute_availability().unwrap();
    builder.internalize_async_bundles().unwrap();
    builder.place_assets().unwrap();
    builder
  }

  fn root_bundle(builder: &IdealGraphBuilder<'_>, asset_id: &str) -> NodeId {
    builder.bundle_roots[&builder.asset_keys[asset_id]].0
  }

  /// Adds a bundle loaded only by `source_bundle_id` that the request limit never removes.
  fn add_dependent_bundle(builder: &mut IdealGraphBuilder<'_>, source_bundle_id: NodeId) -> NodeId {
    let source = builder.bundle(source_bundle_id).unwrap().clone();
    let mut dependent = IdealBundle::empty(source.bundle_type, source.env, source.target);
    dependent.manual_shared_bundle = Some(String::from("vendor"));
    dependent.source_bundles.insert(source_bundle_id);

    let dependent_id = builder.add_bundle(dependent);
    builder.manual_shared_bundle_ids.insert(dependent_id);
    builder.add_bundle_edge(source_bundle_id, dependent_id);
    dependent_id
  }

  fn shared_bundle_ids(builder: &IdealGraphBuilder<'_>) -> Vec<NodeId> {
    builder
      .bundle_graph
      .nodes()
      .filter(|(bundle_id, node)| {
        node.as_bundle().is_some_and(|bundle| bundle.is_shared())
          && !builder.manual_shared_bundle_ids.contains(bundle_id)
      })
      .map(|(bundle_id, _)| bundle_id)
      .collect()
  }

  #[test]
  fn request_limit_moves_dependents_of_removed_bundles_to_their_sources() {
    let fixture = two_async_bundles_sharing();
    let config = BundlerConfig {
      max_parallel_requests: 2,
      ..test_config()
    };
    let mut builder = placed(&fixture.asset_graph, &config);

    let shared = shared_bundle_ids(&builder);
    assert_eq!(shared.len(), 1);
    let dependent = add_dependent_bundle(&mut builder, shared[0]);

    builder.enforce_parallel_request_limit().unwrap();

    let x_bundle = root_bundle(&builder, "src/x.js");
    let y_bundle = root_bundle(&builder, "src/y.js");
    assert!(!builder.bundle_graph.has_node(shared[0]));
    assert_eq!(
      builder
        .bundle(dependent)
        .unwrap()
        .source_bundles
        .iter()
        .copied()
        .collect::<Vec<_>>(),
      vec![x_bundle, y_bundle]
    );

    let shared_key = builder.asset_keys["src/shared.js"];
    for source in [x_bundle, y_bundle] {
      assert!(builder
        .bundle_graph
        .has_edge(source, dependent, EdgeTypeQuery::All));
      assert!(builder.bundle(source).unwrap().assets.contains(&shared_key));
    }
  }

  #[test]
  fn request_limit_leaves_bundles_alone_when_sharing_is_disabled() {
    let fixture = two_async_bundles_sharing();
    let config = BundlerConfig {
      max_parallel_requests: 1,
      disable_shared_bundles: true,
      ..test_config()
    };
    let mut builder = placed(&fixture.asset_graph, &config);
    assert!(shared_bundle_ids(&builder).is_empty());

    let x_bundle = root_bundle(&builder, "src/x.js");
    let y_bundle = root_bundle(&builder, "src/y.js");
    let x = builder.bundle(x_bundle).unwrap().clone();
    let mut shared = IdealBundle::empty(x.bundle_type, x.env, x.target);
    shared.source_bundles.extend([x_bundle, y_bundle]);
    let shared_id = builder.add_bundle(shared);
    builder.add_bundle_edge(x_bundle, shared_id);
    builder.add_bundle_edge(y_bundle, shared_id);

    builder.enforce_parallel_request_limit().unwrap();

    assert_eq!(shared_bundle_ids(&builder), vec![shared_id]);
    assert!(builder
      .bundle_graph
      .has_edge(x_bundle, shared_id, EdgeTypeQuery::All));
  }
}

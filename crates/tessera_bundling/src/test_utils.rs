use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tessera_core::asset_graph::AssetGraph;
use tessera_core::types::Asset;
use tessera_core::types::BundleBehavior;
use tessera_core::types::Dependency;
use tessera_core::types::DependencyBuilder;
use tessera_core::types::Priority;
use tessera_core::types::Target;
use tessera_graph::NodeId;

use crate::config::BundlerConfig;

pub(crate) const PROJECT_ROOT: &str = "/app";

/// An asset under [`PROJECT_ROOT`] whose id is its project relative path.
pub(crate) fn make_asset(path: &str, size: u32) -> Asset {
  let mut asset = Asset::new(Arc::default(), Path::new(PROJECT_ROOT).join(path), size);
  asset.id = path.to_string();
  asset
}

pub(crate) fn make_target(dist_dir: &str) -> Target {
  Target {
    dist_dir: PathBuf::from(dist_dir),
    ..Target::default()
  }
}

/// Sharing config that never merges bundles back, so tests see the raw placement.
pub(crate) fn test_config() -> BundlerConfig {
  BundlerConfig {
    min_bundle_size: 0,
    project_root: PathBuf::from(PROJECT_ROOT),
    ..BundlerConfig::default()
  }
}

/// Builds asset graphs by asset path.
#[derive(Default)]
pub(crate) struct AssetGraphFixture {
  pub asset_graph: AssetGraph,
  assets: HashMap<String, NodeId>,
}

impl AssetGraphFixture {
  pub fn add_asset(&mut self, asset: Asset) -> NodeId {
    let id = asset.id.clone();
    let node_id = self.asset_graph.add_asset(Arc::new(asset));
    self.assets.insert(id, node_id);
    node_id
  }

  pub fn asset(&mut self, path: &str, size: u32) -> NodeId {
    self.add_asset(make_asset(path, size))
  }

  pub fn entry(&mut self, path: &str, size: u32) -> Dependency {
    self.entry_with_target(path, size, make_target("dist"))
  }

  pub fn entry_with_target(&mut self, path: &str, size: u32, target: Target) -> Dependency {
    let dependency = Dependency::entry(path.to_string(), target);
    let dependency_node_id = self.asset_graph.add_entry_dependency(dependency.clone());
    let asset_node_id = self.asset(path, size);
    self.asset_graph.add_edge(dependency_node_id, asset_node_id);
    dependency
  }

  pub fn dependency(&mut self, from: &str, to: &str, builder: DependencyBuilder) -> Dependency {
    let dependency = builder
      .source_asset_id(from.to_string())
      .specifier(format!("./{to}"))
      .build();

    let dependency_node_id = self.asset_graph.add_dependency(dependency.clone());
    self.asset_graph.add_edge(self.assets[from], dependency_node_id);
    self.asset_graph.add_edge(dependency_node_id, self.assets[to]);
    dependency
  }

  pub fn sync(&mut self, from: &str, to: &str) -> Dependency {
    self.dependency(from, to, DependencyBuilder::default())
  }

  pub fn lazy(&mut self, from: &str, to: &str) -> Dependency {
    self.dependency(from, to, DependencyBuilder::default().priority(Priority::Lazy))
  }

  pub fn parallel(&mut self, from: &str, to: &str) -> Dependency {
    self.dependency(
      from,
      to,
      DependencyBuilder::default().priority(Priority::Parallel),
    )
  }

  pub fn isolated(&mut self, from: &str, to: &str) -> Dependency {
    self.dependency(
      from,
      to,
      DependencyBuilder::default().bundle_behavior(Some(BundleBehavior::Isolated)),
    )
  }
}

use std::sync::Arc;

use crate::types::Asset;
use crate::types::Bundle;
use crate::types::Dependency;
use crate::types::Environment;
use crate::types::FileType;
use crate::types::MaybeBundleBehavior;
use crate::types::Target;

use super::native_bundle_graph::NodeId;

/// Read access to a bundle graph, as used by packaging and by tests
pub trait BundleGraph {
  fn get_bundles(&self) -> Vec<&Bundle>;

  fn get_bundle_assets(&self, bundle: &Bundle) -> anyhow::Result<Vec<&Asset>>;

  fn get_bundle_by_id(&self, id: &str) -> Option<&Bundle>;

  fn get_dependencies(&self, asset: &Asset) -> anyhow::Result<Vec<&Dependency>>;
}

#[derive(Clone, Debug, Default)]
pub struct CreateBundleOptions {
  /// The asset the bundle is named after, if it has one
  pub entry_asset_id: Option<String>,
  /// Identifies bundles without an entry asset
  pub unique_key: Option<String>,
  pub bundle_behavior: MaybeBundleBehavior,
  /// Required when there is no entry asset, otherwise taken from it
  pub bundle_type: Option<FileType>,
  /// Defaults to the environment of the entry asset, then to the target's
  pub env: Option<Arc<Environment>>,
  pub manual_shared_bundle: Option<String>,
  pub needs_stable_name: bool,
  pub target: Target,
}

/// The operations a bundler uses to write its result into a bundle graph
///
/// Assets and dependencies are addressed by their ids, bundles and bundle groups by the node ids
/// handed out when they were created.
pub trait MutableBundleGraph: BundleGraph {
  /// Creates a bundle group loaded through `dependency`, or returns the existing one.
  fn create_bundle_group(
    &mut self,
    dependency: &Dependency,
    target: &Target,
    entry_asset_id: &str,
  ) -> anyhow::Result<NodeId>;

  /// Creates a bundle, or returns the existing bundle with the same identity.
  fn create_bundle(&mut self, options: CreateBundleOptions) -> anyhow::Result<NodeId>;

  fn add_bundle_to_bundle_group(&mut self, bundle: NodeId, bundle_group: NodeId)
    -> anyhow::Result<()>;

  fn add_asset_to_bundle(&mut self, asset_id: &str, bundle: NodeId) -> anyhow::Result<()>;

  /// Records that `from` needs `to` to be loaded alongside it.
  fn create_bundle_reference(&mut self, from: NodeId, to: NodeId) -> anyhow::Result<()>;

  /// Records that `dependency` is satisfied by `asset` from within `bundle`.
  fn create_asset_reference(
    &mut self,
    dependency_id: &str,
    asset_id: &str,
    bundle: NodeId,
  ) -> anyhow::Result<()>;

  /// Marks an async dependency as already satisfied inside `bundle`.
  fn internalize_async_dependency(
    &mut self,
    bundle: NodeId,
    dependency_id: &str,
  ) -> anyhow::Result<()>;

  fn get_incoming_dependencies(&self, asset_id: &str) -> anyhow::Result<Vec<Arc<Dependency>>>;

  /// True when `bundle` holds the asset `dependency` was found in.
  fn bundle_has_dependency(&self, bundle: NodeId, dependency_id: &str) -> bool;

  fn get_bundles_with_dependency(&self, dependency_id: &str) -> Vec<NodeId>;
}

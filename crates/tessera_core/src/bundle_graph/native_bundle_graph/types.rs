use std::sync::Arc;

use crate::types::Asset;
use crate::types::Bundle;
use crate::types::Dependency;
use crate::types::Target;

pub type NodeId = usize;

/// Edge types in the native bundle graph
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum NativeBundleGraphEdgeType {
  /// Structural edges: asset graph edges and bundle group membership
  #[default]
  Null = 1,
  /// A bundle holds an asset or dependency
  Contains = 2,
  /// A bundle group, or the root, loads a bundle
  Bundle = 3,
  /// A bundle or dependency needs another bundle or asset at runtime
  References = 4,
  /// An async dependency that is already satisfied inside the bundle
  InternalAsync = 5,
}

#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum NativeBundleGraphNode {
  Root,
  Asset(Arc<Asset>),
  Dependency(Arc<Dependency>),
  BundleGroup {
    target: Target,
    entry_asset_id: String,
  },
  Bundle(Bundle),
}

use serde::Deserialize;
use serde::Serialize;

use super::environment::Environment;
use super::file_type::FileType;
use super::target::Target;

/// How a bundle is emitted and loaded, when it deviates from a regular bundle
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BundleBehavior {
  /// Embedded into its parent bundle rather than written to a separate file
  Inline,
  /// Loads all of its dependencies itself and assumes nothing is available
  Isolated,
  /// Both inlined into its parent and isolated from it
  InlineIsolated,
}

impl BundleBehavior {
  pub fn is_inline(&self) -> bool {
    matches!(self, BundleBehavior::Inline | BundleBehavior::InlineIsolated)
  }

  pub fn is_isolated(&self) -> bool {
    matches!(
      self,
      BundleBehavior::Isolated | BundleBehavior::InlineIsolated
    )
  }
}

pub type MaybeBundleBehavior = Option<BundleBehavior>;

/// A bundle as materialized in the bundle graph handed to packaging
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
  pub id: String,
  pub bundle_behavior: MaybeBundleBehavior,
  #[serde(rename = "type")]
  pub bundle_type: FileType,
  pub entry_asset_ids: Vec<String>,
  pub env: Environment,
  pub is_splittable: Option<bool>,
  pub main_entry_id: Option<String>,
  pub manual_shared_bundle: Option<String>,
  pub needs_stable_name: Option<bool>,
  pub target: Target,
  pub unique_key: Option<String>,
}

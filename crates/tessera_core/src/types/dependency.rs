use std::hash::Hash;
use std::hash::Hasher;
use std::path::PathBuf;
use std::sync::Arc;

use derive_builder::Builder;
use serde::Deserialize;
use serde::Serialize;

use crate::hash::IdentifierHasher;

use super::asset::AssetId;
use super::bundle::MaybeBundleBehavior;
use super::environment::Environment;
use super::target::Target;

pub fn create_dependency_id(
  source_asset_id: Option<&AssetId>,
  specifier: &str,
  environment_id: &str,
  target: Option<&Target>,
  specifier_type: &SpecifierType,
  bundle_behavior: &MaybeBundleBehavior,
  priority: &Priority,
) -> String {
  let mut hasher = IdentifierHasher::default();

  source_asset_id.hash(&mut hasher);
  specifier.hash(&mut hasher);
  environment_id.hash(&mut hasher);
  target.hash(&mut hasher);
  specifier_type.hash(&mut hasher);
  bundle_behavior.hash(&mut hasher);
  priority.hash(&mut hasher);

  format!("{:016x}", hasher.finish())
}

/// A dependency denotes a connection between two assets
#[derive(Hash, PartialEq, Clone, Debug, Default, Builder, Deserialize, Serialize)]
#[builder(build_fn(skip), pattern = "owned", setter(strip_option))]
#[serde(rename_all = "camelCase")]
// Dependencies should not be created directly, so we can ensure that an ID
// exists. DependencyBuilder::build() should be used instead.
#[non_exhaustive]
pub struct Dependency {
  /// Controls the behavior of the bundle the resolved asset is placed into
  ///
  /// This option is used in combination with priority to determine when the bundle is loaded.
  pub bundle_behavior: MaybeBundleBehavior,

  /// The environment of the dependency
  pub env: Arc<Environment>,

  #[builder(setter(skip))]
  pub id: String,

  /// Determines when the dependency should be loaded
  pub priority: Priority,

  /// The id of the asset with this dependency
  pub source_asset_id: Option<AssetId>,

  /// The file path where the dependency is located
  pub source_path: Option<PathBuf>,

  /// The import or export specifier that connects two assets together
  pub specifier: String,

  /// How the specifier should be interpreted
  pub specifier_type: SpecifierType,

  /// The target associated with an entry, if any
  pub target: Option<Box<Target>>,

  /// Whether the dependency is an entry
  pub is_entry: bool,

  /// Whether the dependency is optional
  ///
  /// If an optional dependency cannot be resolved, this will not fail the build.
  pub is_optional: bool,

  /// Indicates that the name should be stable over time, even when the content of the bundle
  /// changes
  ///
  /// When the dependency is a bundle entry (priority is "parallel" or "lazy"), this controls the
  /// naming of that bundle.
  pub needs_stable_name: bool,
}

impl DependencyBuilder {
  pub fn build(self) -> Dependency {
    let specifier = self.specifier.unwrap_or_default();
    let env = self.env.unwrap_or_default();
    let specifier_type = self.specifier_type.unwrap_or_default();
    let priority = self.priority.unwrap_or_default();
    let bundle_behavior = self.bundle_behavior.flatten();
    let source_asset_id = self.source_asset_id.flatten();
    let target = self.target.flatten();

    let id = create_dependency_id(
      source_asset_id.as_ref(),
      &specifier,
      &env.id(),
      target.as_deref(),
      &specifier_type,
      &bundle_behavior,
      &priority,
    );

    Dependency {
      id,
      bundle_behavior,
      env,
      priority,
      source_asset_id,
      source_path: self.source_path.flatten(),
      specifier,
      specifier_type,
      target,
      is_entry: self.is_entry.unwrap_or_default(),
      is_optional: self.is_optional.unwrap_or_default(),
      needs_stable_name: self.needs_stable_name.unwrap_or_default(),
    }
  }
}

impl Dependency {
  pub fn entry(entry: String, target: Target) -> Dependency {
    DependencyBuilder::default()
      .env(target.env.clone())
      .is_entry(true)
      .needs_stable_name(true)
      .priority(Priority::Sync)
      .specifier(entry)
      .specifier_type(SpecifierType::Url)
      .target(Box::new(target))
      .build()
  }

  /// The output folder of an entry dependency's target.
  pub fn dist_dir(&self) -> Option<&PathBuf> {
    self.target.as_ref().map(|target| &target.dist_dir)
  }
}

/// Determines when a dependency should load
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  /// Resolves the dependency synchronously, placing the resolved asset in the same bundle as the
  /// parent or another bundle that is already on the page
  #[default]
  Sync,
  /// Places the dependency in a separate bundle loaded in parallel with the current bundle
  Parallel,
  /// The dependency should be placed in a separate bundle that is loaded later
  Lazy,
}

/// The type of the import specifier
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecifierType {
  /// An ES Module specifier
  #[default]
  Esm,
  /// A CommonJS specifier
  CommonJS,
  /// A URL that works as in a browser
  ///
  /// URL dependencies are never internalized, the referenced bundle is always fetched.
  Url,
  /// Custom specifiers are interpreted by the resolver
  Custom,
}

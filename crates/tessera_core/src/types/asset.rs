use std::hash::Hash;
use std::hash::Hasher;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::hash::IdentifierHasher;

use super::bundle::MaybeBundleBehavior;
use super::environment::Environment;
use super::file_type::FileType;

pub type AssetId = String;

#[derive(Debug)]
pub struct CreateAssetIdParams<'a> {
  pub environment_id: &'a str,
  pub file_path: &'a Path,
  pub file_type: &'a FileType,
  pub query: Option<&'a str>,
  pub unique_key: Option<&'a str>,
}

pub fn create_asset_id(params: CreateAssetIdParams<'_>) -> AssetId {
  tracing::trace!(?params, "Creating asset id");

  let CreateAssetIdParams {
    environment_id,
    file_path,
    file_type,
    query,
    unique_key,
  } = params;

  let mut hasher = IdentifierHasher::default();

  environment_id.hash(&mut hasher);
  file_path.hash(&mut hasher);
  query.hash(&mut hasher);
  file_type.hash(&mut hasher);
  unique_key.hash(&mut hasher);

  format!("{:016x}", hasher.finish())
}

/// An asset is a file or part of a file that ends up in one or more bundles
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
  /// The main identify hash for the asset
  ///
  /// It is consistent for the entire build and between builds.
  pub id: AssetId,

  /// Controls which bundle the asset is placed into
  pub bundle_behavior: MaybeBundleBehavior,

  /// The environment of the asset
  pub env: Arc<Environment>,

  /// The file path to the asset
  pub file_path: PathBuf,

  /// The file type of the asset, which may change during transformation
  #[serde(rename = "type")]
  pub file_type: FileType,

  pub query: Option<String>,

  /// Statistics about the asset
  pub stats: AssetStats,

  /// Whether this asset can be omitted if none of its exports are being used
  pub side_effects: bool,

  /// Indicates if the asset can be split into shared bundles
  ///
  /// Assets that cannot be split stay in every bundle that reaches them.
  pub is_bundle_splittable: bool,

  /// True if the asset only exports constants
  ///
  /// Constant modules are never given a bundle of their own. They are copied into every bundle
  /// holding an asset that imports them.
  pub is_constant_module: bool,

  /// Distinguishes virtual assets that share a file path
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unique_key: Option<String>,
}

impl Asset {
  /// Creates an asset for `file_path`, typed by its extension.
  pub fn new(env: Arc<Environment>, file_path: PathBuf, size: u32) -> Self {
    let file_type = file_path
      .extension()
      .and_then(|extension| extension.to_str())
      .map(FileType::from_extension)
      .unwrap_or_default();

    let id = create_asset_id(CreateAssetIdParams {
      environment_id: &env.id(),
      file_path: &file_path,
      file_type: &file_type,
      query: None,
      unique_key: None,
    });

    Asset {
      id,
      env,
      file_path,
      file_type,
      stats: AssetStats { size, time: 0 },
      side_effects: true,
      is_bundle_splittable: true,
      ..Asset::default()
    }
  }
}

/// Statistics that pertain to an asset
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct AssetStats {
  pub size: u32,
  pub time: u32,
}

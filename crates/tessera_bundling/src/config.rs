use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;
use tessera_core::diagnostic::Diagnostic;
use tessera_core::types::Asset;
use tessera_core::types::FileType;
use tracing::warn;

pub(crate) const ORIGIN: &str = "tessera_bundling";

/// Which build the bundler runs in. Selects the per-mode configuration block.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
  #[default]
  Development,
  Production,
}

impl BuildMode {
  fn config_key(&self) -> &'static str {
    match self {
      BuildMode::Development => "development",
      BuildMode::Production => "production",
    }
  }
}

/// Build inputs that do not come from the user's bundler configuration
#[derive(Clone, Debug, Default)]
pub struct BundlerOptions {
  pub mode: BuildMode,
  /// Manual shared bundle globs and roots are relative to this directory
  pub project_root: PathBuf,
}

/// A user declared bundle that collects matching assets regardless of the sharing heuristics
#[derive(Clone, Debug, PartialEq)]
pub struct ManualSharedBundle {
  /// Unique among all rules
  pub name: String,
  /// Globs matched against project relative asset paths
  pub assets: Vec<String>,
  /// Limits the rule to these output types
  pub types: Option<Vec<FileType>>,
  /// Only assets reachable from this file are considered
  pub root: Option<PathBuf>,
  /// Number of bundles the matched assets are spread over
  pub split: Option<u32>,
}

impl ManualSharedBundle {
  pub fn matches_type(&self, file_type: &FileType) -> bool {
    self
      .types
      .as_ref()
      .map_or(true, |types| types.contains(file_type))
  }

  pub fn matches_path(&self, asset: &Asset, project_root: &Path) -> bool {
    let relative_path = asset
      .file_path
      .strip_prefix(project_root)
      .unwrap_or(&asset.file_path);
    let relative_path = relative_path.to_string_lossy();

    self
      .assets
      .iter()
      .any(|glob| glob_match::glob_match(glob, &relative_path))
  }

  pub fn is_root(&self, asset: &Asset, project_root: &Path) -> bool {
    self
      .root
      .as_ref()
      .is_some_and(|root| project_root.join(root) == asset.file_path)
  }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawManualSharedBundle {
  name: String,
  assets: Vec<String>,
  types: Option<Vec<String>>,
  root: Option<PathBuf>,
  split: Option<u32>,
}

/// Resolved bundler configuration
#[derive(Clone, Debug, PartialEq)]
pub struct BundlerConfig {
  pub disable_shared_bundles: bool,
  pub manual_shared_bundles: Vec<ManualSharedBundle>,
  /// Upper bound on the bundles one bundle group loads at once
  pub max_parallel_requests: usize,
  /// Shared bundles smaller than this are merged back into their source bundles
  pub min_bundle_size: u64,
  /// An asset must be reachable from more bundles than this before it gets a shared bundle
  pub min_bundles: usize,
  pub project_root: PathBuf,
}

impl Default for BundlerConfig {
  fn default() -> Self {
    BundlerConfig::for_http_version(HttpVersion::Http2, PathBuf::default())
  }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HttpVersion {
  Http1,
  Http2,
}

/// Options shared by the generic configuration block and the per-mode blocks. Unset fields fall
/// through to the next layer.
#[derive(Debug, Default)]
struct ConfigLayer {
  http: Option<HttpVersion>,
  min_bundles: Option<usize>,
  min_bundle_size: Option<u64>,
  max_parallel_requests: Option<usize>,
  disable_shared_bundles: Option<bool>,
  manual_shared_bundles: Option<Vec<ManualSharedBundle>>,
}

impl ConfigLayer {
  fn merge(self, overrides: ConfigLayer) -> ConfigLayer {
    ConfigLayer {
      http: overrides.http.or(self.http),
      min_bundles: overrides.min_bundles.or(self.min_bundles),
      min_bundle_size: overrides.min_bundle_size.or(self.min_bundle_size),
      max_parallel_requests: overrides
        .max_parallel_requests
        .or(self.max_parallel_requests),
      disable_shared_bundles: overrides
        .disable_shared_bundles
        .or(self.disable_shared_bundles),
      manual_shared_bundles: overrides
        .manual_shared_bundles
        .or(self.manual_shared_bundles),
    }
  }
}

const KNOWN_OPTIONS: [&str; 6] = [
  "http",
  "minBundles",
  "minBundleSize",
  "maxParallelRequests",
  "disableSharedBundles",
  "manualSharedBundles",
];

struct ConfigReader {
  diagnostics: Vec<Diagnostic>,
}

impl ConfigReader {
  fn warn(&mut self, message: String) {
    self.report(Diagnostic::new(ORIGIN, message));
  }

  fn report(&mut self, diagnostic: Diagnostic) {
    warn!(origin = ORIGIN, hints = ?diagnostic.hints, "{}", diagnostic.message);
    self.diagnostics.push(diagnostic);
  }

  fn field<T: DeserializeOwned>(&mut self, path: &str, value: &Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
      Ok(value) => Some(value),
      Err(error) => {
        self.warn(format!("Invalid bundler option \"{path}\": {error}"));
        None
      }
    }
  }

  fn read_layer(&mut self, prefix: &str, object: &Map<String, Value>) -> ConfigLayer {
    let mut layer = ConfigLayer::default();

    for (key, value) in object {
      let path = format!("{prefix}{key}");
      match key.as_str() {
        "http" => {
          layer.http = match self.field::<u64>(&path, value) {
            Some(1) => Some(HttpVersion::Http1),
            Some(2) => Some(HttpVersion::Http2),
            Some(other) => {
              self.warn(format!(
                "Unsupported http version {other} in \"{path}\", expected 1 or 2"
              ));
              None
            }
            None => None,
          }
        }
        "minBundles" => layer.min_bundles = self.field(&path, value),
        "minBundleSize" => layer.min_bundle_size = self.field(&path, value),
        "maxParallelRequests" => layer.max_parallel_requests = self.field(&path, value),
        "disableSharedBundles" => layer.disable_shared_bundles = self.field(&path, value),
        "manualSharedBundles" => {
          layer.manual_shared_bundles = self
            .field::<Vec<Value>>(&path, value)
            .map(|rules| self.read_manual_shared_bundles(&path, rules));
        }
        // Mode blocks are layered on top by the caller
        "development" | "production" if prefix.is_empty() => {
          if !value.is_object() {
            self.warn(format!("Bundler option \"{path}\" must be an object"));
          }
        }
        _ => self.report(
          Diagnostic::new(ORIGIN, format!("Unknown bundler option \"{path}\"")).with_hint(
            format!("Supported options are {}", KNOWN_OPTIONS.join(", ")),
          ),
        ),
      }
    }

    layer
  }

  fn read_manual_shared_bundles(
    &mut self,
    path: &str,
    rules: Vec<Value>,
  ) -> Vec<ManualSharedBundle> {
    let mut manual_shared_bundles = Vec::with_capacity(rules.len());

    for (index, rule) in rules.into_iter().enumerate() {
      let rule_path = format!("{path}[{index}]");
      let Some(raw) = self.field::<RawManualSharedBundle>(&rule_path, &rule) else {
        continue;
      };

      if raw.split == Some(0) {
        self.warn(format!(
          "Manual shared bundle \"{}\" skipped, split must be a positive integer",
          raw.name
        ));
        continue;
      }

      manual_shared_bundles.push(ManualSharedBundle {
        name: raw.name,
        assets: raw.assets,
        types: raw.types.map(|types| {
          types
            .iter()
            .map(|extension| FileType::from_extension(extension))
            .collect()
        }),
        root: raw.root,
        split: raw.split,
      });
    }

    manual_shared_bundles
  }
}

impl BundlerConfig {
  pub fn for_http_version(http: HttpVersion, project_root: PathBuf) -> Self {
    let (min_bundle_size, max_parallel_requests) = match http {
      HttpVersion::Http1 => (30_000, 6),
      HttpVersion::Http2 => (20_000, 25),
    };

    BundlerConfig {
      disable_shared_bundles: false,
      manual_shared_bundles: Vec::new(),
      max_parallel_requests,
      min_bundle_size,
      min_bundles: 1,
      project_root,
    }
  }

  /// Resolves the user's bundler configuration.
  ///
  /// Never fails. Problems are returned as warnings and the affected option keeps its default.
  pub fn resolve(config: Option<&Value>, options: &BundlerOptions) -> (Self, Vec<Diagnostic>) {
    let mut reader = ConfigReader {
      diagnostics: Vec::new(),
    };

    let layer = match config {
      None | Some(Value::Null) => ConfigLayer::default(),
      Some(Value::Object(object)) => {
        let generic = reader.read_layer("", object);
        let mode_key = options.mode.config_key();
        let mode_layer = match object.get(mode_key) {
          Some(Value::Object(mode_object)) => {
            reader.read_layer(&format!("{mode_key}."), mode_object)
          }
          _ => ConfigLayer::default(),
        };

        generic.merge(mode_layer)
      }
      Some(_) => {
        reader.warn(String::from("Bundler configuration must be an object"));
        ConfigLayer::default()
      }
    };

    let mut config = BundlerConfig::for_http_version(
      layer.http.unwrap_or(HttpVersion::Http2),
      options.project_root.clone(),
    );

    if let Some(min_bundles) = layer.min_bundles {
      config.min_bundles = min_bundles;
    }
    if let Some(min_bundle_size) = layer.min_bundle_size {
      config.min_bundle_size = min_bundle_size;
    }
    if let Some(max_parallel_requests) = layer.max_parallel_requests {
      config.max_parallel_requests = max_parallel_requests;
    }
    if let Some(disable_shared_bundles) = layer.disable_shared_bundles {
      config.disable_shared_bundles = disable_shared_bundles;
    }

    let mut names = HashSet::new();
    for manual_shared_bundle in layer.manual_shared_bundles.unwrap_or_default() {
      if !names.insert(manual_shared_bundle.name.clone()) {
        reader.report(
          Diagnostic::new(
            ORIGIN,
            format!(
              "Manual shared bundle name \"{}\" is not unique, only the first rule is used",
              manual_shared_bundle.name
            ),
          )
          .with_hint("Give each manual shared bundle rule its own name"),
        );
        continue;
      }

      config.manual_shared_bundles.push(manual_shared_bundle);
    }

    (config, reader.diagnostics)
  }
}

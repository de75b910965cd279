use std::hash::Hash;
use std::hash::Hasher;

use serde::Deserialize;
use serde::Serialize;

use crate::hash::IdentifierHasher;

/// The environment the built code will run in
///
/// Bundles never mix environments. The bundler also refuses to treat code as already loaded when
/// it was loaded in a different context, or when the environment is isolated.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
  /// The environment the output should run in
  pub context: EnvironmentContext,

  /// Whether this is a library build
  ///
  /// Library output is consumed by another tool, so every bundle must stand on its own.
  pub is_library: bool,

  /// Determines what type of module to output
  pub output_format: OutputFormat,

  /// Determines whether scope hoisting should be enabled
  pub should_scope_hoist: bool,

  /// Determines whether the output should be optimised
  pub should_optimize: bool,

  pub source_type: SourceType,
}

impl Environment {
  pub fn id(&self) -> String {
    let mut hasher = IdentifierHasher::default();
    self.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
  }

  /// Isolated environments share nothing with the code that loads them.
  pub fn is_isolated(&self) -> bool {
    self.is_library || self.context.is_worker() || self.context.is_worklet()
  }
}

/// The environment the output should run in
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentContext {
  #[default]
  Browser,
  ElectronMain,
  ElectronRenderer,
  Node,
  ServiceWorker,
  WebWorker,
  Worklet,
}

impl EnvironmentContext {
  pub fn is_node(&self) -> bool {
    use EnvironmentContext::*;
    matches!(self, Node | ElectronMain | ElectronRenderer)
  }

  pub fn is_browser(&self) -> bool {
    use EnvironmentContext::*;
    matches!(
      self,
      Browser | WebWorker | ServiceWorker | Worklet | ElectronRenderer
    )
  }

  pub fn is_worker(&self) -> bool {
    use EnvironmentContext::*;
    matches!(self, WebWorker | ServiceWorker)
  }

  pub fn is_worklet(&self) -> bool {
    matches!(self, EnvironmentContext::Worklet)
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
  Commonjs,
  #[default]
  Esmodule,
  Global,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
  #[default]
  Module,
  Script,
}

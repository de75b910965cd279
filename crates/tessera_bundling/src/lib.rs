use tessera_core::asset_graph::AssetGraph;
use tessera_core::bundle_graph::NativeBundleGraph;
use tessera_core::diagnostic::Diagnostic;

pub mod config;
pub mod decorate;
pub mod ideal_graph;

#[cfg(test)]
mod test_utils;

pub use config::BuildMode;
pub use config::BundlerConfig;
pub use config::BundlerOptions;
pub use config::HttpVersion;
pub use config::ManualSharedBundle;
pub use ideal_graph::IdealGraphBundler;

/// Bundler algorithms take an asset graph and assign assets/dependencies to bundles.
///
/// Implementations are expected to mutate the provided `NativeBundleGraph` to:
/// - create bundle groups and bundles
/// - add assets to bundles and record which bundles reference each other
/// - mark dependencies that are resolved inside the bundle holding them
///
/// Warnings that did not stop bundling are returned.
pub trait Bundler {
  fn bundle(
    &self,
    asset_graph: &AssetGraph,
    bundle_graph: &mut NativeBundleGraph,
  ) -> anyhow::Result<Vec<Diagnostic>>;
}

//! "Ideal graph" bundling.
//!
//! The ideal graph is the bundling decision for one target, expressed over asset keys and bundle
//! node ids before anything is written to a bundle graph. [`IdealGraphBuilder`] computes it in
//! fixed phases:
//!
//! - entry bundles, then one bundle per async, isolated, parallel or inline boundary
//! - synchronous reachability between bundle roots and assets
//! - availability: what is guaranteed to be loaded before each bundle root runs
//! - internalization of async bundles that every parent already has
//! - placement of every asset, reusing, sharing or duplicating as configured
//! - manual shared bundle splitting, merge-back of small shared bundles and the parallel request
//!   limit
//!
//! [`crate::decorate`] then writes the result into a bundle graph.

pub mod builder;
pub mod types;

use std::path::PathBuf;

use anyhow::Context;
use indexmap::IndexMap;
use serde_json::Value;
use tessera_core::asset_graph::AssetGraph;
use tessera_core::bundle_graph::NativeBundleGraph;
use tessera_core::diagnostic::Diagnostic;
use tessera_graph::NodeId;
use tracing::debug;

use crate::config::BundlerConfig;
use crate::config::BundlerOptions;
use crate::decorate::decorate_bundle_graph;
use crate::Bundler;

use self::builder::IdealGraphBuilder;
use self::types::IdealGraph;
use self::types::IdealGraphBuildOptions;
use self::types::IdealGraphBuildStats;

/// Bundler implementation backed by the ideal graph algorithm.
#[derive(Debug, Default)]
pub struct IdealGraphBundler {
  pub config: BundlerConfig,
  pub options: IdealGraphBuildOptions,
  /// Warnings from resolving the configuration, reported with every bundling run
  config_diagnostics: Vec<Diagnostic>,
}

impl IdealGraphBundler {
  pub fn new(config: BundlerConfig, options: IdealGraphBuildOptions) -> Self {
    Self {
      config,
      options,
      config_diagnostics: Vec::new(),
    }
  }

  /// Resolves the user's bundler configuration, keeping any warnings for [`Bundler::bundle`].
  pub fn from_config(
    config: Option<&Value>,
    bundler_options: &BundlerOptions,
    options: IdealGraphBuildOptions,
  ) -> Self {
    let (config, config_diagnostics) = BundlerConfig::resolve(config, bundler_options);

    Self {
      config,
      options,
      config_diagnostics,
    }
  }

  pub fn config_diagnostics(&self) -> &[Diagnostic] {
    &self.config_diagnostics
  }

  /// Builds the ideal graph for one group of entries, given as (dependency, asset) node pairs.
  pub fn build_ideal_graph(
    &self,
    asset_graph: &AssetGraph,
    entries: Vec<(NodeId, NodeId)>,
  ) -> anyhow::Result<(IdealGraph, IdealGraphBuildStats)> {
    IdealGraphBuilder::new(asset_graph, &self.config, entries, self.options.clone())
      .build()
      .context("building IdealGraph via IdealGraphBuilder")
  }

  /// Builds one ideal graph per output directory, in entry order.
  pub fn build_ideal_graphs(
    &self,
    asset_graph: &AssetGraph,
  ) -> anyhow::Result<Vec<(IdealGraph, IdealGraphBuildStats)>> {
    let mut entries_by_dist_dir: IndexMap<PathBuf, Vec<(NodeId, NodeId)>> = IndexMap::new();

    for (dependency_node_id, asset_node_id) in asset_graph.get_entries() {
      let dependency = asset_graph
        .get_dependency_node(dependency_node_id)
        .with_context(|| format!("entry {dependency_node_id} is not a dependency"))?;

      entries_by_dist_dir
        .entry(dependency.dist_dir().cloned().unwrap_or_default())
        .or_default()
        .push((dependency_node_id, asset_node_id));
    }

    entries_by_dist_dir
      .into_iter()
      .map(|(dist_dir, entries)| {
        self
          .build_ideal_graph(asset_graph, entries)
          .with_context(|| format!("bundling entries of {}", dist_dir.display()))
      })
      .collect()
  }
}

impl Bundler for IdealGraphBundler {
  fn bundle(
    &self,
    asset_graph: &AssetGraph,
    bundle_graph: &mut NativeBundleGraph,
  ) -> anyhow::Result<Vec<Diagnostic>> {
    let mut diagnostics = self.config_diagnostics.clone();

    for (ideal_graph, stats) in self.build_ideal_graphs(asset_graph)? {
      decorate_bundle_graph(&ideal_graph, bundle_graph)?;

      debug!(
        assets = stats.assets,
        bundles = stats.bundles,
        bundle_groups = stats.bundle_groups,
        "Bundled target"
      );
      diagnostics.extend(ideal_graph.diagnostics);
    }

    Ok(diagnostics)
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use pretty_assertions::assert_eq;
  use tessera_core::hash::hash_u64;
  use tessera_core::types::BundleBehavior;
  use tessera_graph::EdgeTypeQuery;
  use tracing_test::traced_test;

  use crate::config::ManualSharedBundle;
  use crate::test_utils::make_asset;
  use crate::test_utils::test_config;
  use crate::test_utils::AssetGraphFixture;

  use super::types::DecisionKind;
  use super::*;

  fn build(fixture: &AssetGraphFixture, config: BundlerConfig) -> IdealGraph {
    let bundler = IdealGraphBundler::new(
      config,
      IdealGraphBuildOptions {
        collect_debug: true,
      },
    );

    let mut graphs = bundler.build_ideal_graphs(&fixture.asset_graph).unwrap();
    assert_eq!(graphs.len(), 1);
    graphs.remove(0).0
  }

  /// Sorted asset ids of every bundle, in bundle creation order.
  fn bundle_contents(graph: &IdealGraph) -> Vec<Vec<&str>> {
    graph
      .bundles()
      .map(|(_, bundle)| {
        let mut asset_ids = graph.bundle_asset_ids(bundle);
        asset_ids.sort();
        asset_ids
      })
      .collect()
  }

  fn bundle_id_for(graph: &IdealGraph, asset_id: &str) -> NodeId {
    graph.bundle_for_root(asset_id).unwrap().0
  }

  fn decisions(graph: &IdealGraph) -> Vec<DecisionKind> {
    graph
      .debug
      .as_ref()
      .unwrap()
      .decisions
      .decisions
      .iter()
      .map(|decision| decision.kind.clone())
      .collect()
  }

  fn vendor_rule() -> ManualSharedBundle {
    ManualSharedBundle {
      name: String::from("vendor"),
      assets: vec![String::from("node_modules/**")],
      types: None,
      root: None,
      split: None,
    }
  }

  /// index lazily loads x and y, which both import shared.
  fn two_async_bundles_sharing(shared_size: u32) -> AssetGraphFixture {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    fixture.asset("src/x.js", 10);
    fixture.asset("src/y.js", 10);
    fixture.asset("src/shared.js", shared_size);
    fixture.lazy("src/index.js", "src/x.js");
    fixture.lazy("src/index.js", "src/y.js");
    fixture.sync("src/x.js", "src/shared.js");
    fixture.sync("src/y.js", "src/shared.js");
    fixture
  }

  #[test]
  fn lazy_dependencies_start_a_bundle_group() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/x.js", 10);
    fixture.asset("src/y.js", 10);
    fixture.asset("src/z.js", 10);
    fixture.asset("src/w.js", 10);
    fixture.sync("src/x.js", "src/y.js");
    fixture.lazy("src/x.js", "src/z.js");
    fixture.sync("src/z.js", "src/w.js");

    let graph = build(&fixture, test_config());

    assert_eq!(
      bundle_contents(&graph),
      vec![vec!["src/x.js", "src/y.js"], vec!["src/w.js", "src/z.js"]]
    );

    let x_bundle = bundle_id_for(&graph, "src/x.js");
    let z_bundle = bundle_id_for(&graph, "src/z.js");
    let root = graph.bundle_graph.root_node_id().unwrap();
    assert_eq!(
      graph.bundle_group_bundle_ids.iter().copied().collect::<Vec<_>>(),
      vec![x_bundle, z_bundle]
    );
    assert_eq!(
      graph
        .bundle_graph
        .get_node_ids_connected_from(root, EdgeTypeQuery::All),
      vec![x_bundle, z_bundle]
    );
    assert_eq!(graph.dependencies_loading(z_bundle).len(), 1);
  }

  #[test]
  fn assets_loaded_by_every_parent_are_not_duplicated() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/x.js", 10);
    fixture.asset("src/y.js", 10);
    fixture.asset("src/z.js", 10);
    fixture.asset("src/w.js", 10);
    fixture.sync("src/x.js", "src/y.js");
    fixture.lazy("src/x.js", "src/z.js");
    fixture.sync("src/z.js", "src/w.js");
    fixture.sync("src/x.js", "src/w.js");

    let graph = build(&fixture, test_config());

    assert_eq!(
      bundle_contents(&graph),
      vec![vec!["src/w.js", "src/x.js", "src/y.js"], vec!["src/z.js"]]
    );
  }

  #[test]
  fn availability_requires_every_path() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    for path in ["src/a.js", "src/b.js", "src/c.js", "src/s.js"] {
      fixture.asset(path, 10);
    }
    fixture.lazy("src/index.js", "src/a.js");
    fixture.lazy("src/index.js", "src/b.js");
    fixture.lazy("src/a.js", "src/c.js");
    fixture.lazy("src/b.js", "src/c.js");
    fixture.sync("src/a.js", "src/s.js");
    fixture.sync("src/c.js", "src/s.js");

    let graph = build(&fixture, test_config());

    // c can be loaded through b, which never loads s
    let a_bundle = bundle_id_for(&graph, "src/a.js");
    let c_bundle = bundle_id_for(&graph, "src/c.js");
    let shared = graph.bundles_with_asset("src/s.js");
    assert_eq!(shared.len(), 1);

    let shared_bundle = graph.bundle(shared[0]).unwrap();
    assert!(shared_bundle.is_shared());
    assert_eq!(
      shared_bundle.source_bundles.iter().copied().collect::<Vec<_>>(),
      vec![a_bundle, c_bundle]
    );
  }

  #[test]
  fn small_shared_bundles_are_merged_back() {
    let fixture = two_async_bundles_sharing(500);

    let graph = build(
      &fixture,
      BundlerConfig {
        min_bundle_size: 1000,
        ..test_config()
      },
    );

    assert_eq!(
      bundle_contents(&graph),
      vec![
        vec!["src/index.js"],
        vec!["src/shared.js", "src/x.js"],
        vec!["src/shared.js", "src/y.js"],
      ]
    );
    assert!(decisions(&graph)
      .iter()
      .any(|kind| matches!(kind, DecisionKind::SharedBundleMerged { size: 500, .. })));
  }

  #[test]
  fn assets_reachable_from_enough_bundles_are_shared() {
    let fixture = two_async_bundles_sharing(500);

    let graph = build(&fixture, test_config());

    assert_eq!(
      bundle_contents(&graph),
      vec![
        vec!["src/index.js"],
        vec!["src/x.js"],
        vec!["src/y.js"],
        vec!["src/shared.js"],
      ]
    );

    let shared = graph.bundles_with_asset("src/shared.js");
    let shared_bundle = graph.bundle(shared[0]).unwrap();
    assert_eq!(shared_bundle.main_entry_asset, None);
    assert_eq!(
      shared_bundle.source_bundles.iter().copied().collect::<Vec<_>>(),
      vec![
        bundle_id_for(&graph, "src/x.js"),
        bundle_id_for(&graph, "src/y.js")
      ]
    );
  }

  #[test]
  fn assets_are_duplicated_below_the_sharing_threshold() {
    let fixture = two_async_bundles_sharing(500);
    let duplicated = vec![
      vec!["src/index.js"],
      vec!["src/shared.js", "src/x.js"],
      vec!["src/shared.js", "src/y.js"],
    ];

    let graph = build(
      &fixture,
      BundlerConfig {
        min_bundles: 2,
        ..test_config()
      },
    );
    assert_eq!(bundle_contents(&graph), duplicated);

    let graph = build(
      &fixture,
      BundlerConfig {
        disable_shared_bundles: true,
        ..test_config()
      },
    );
    assert_eq!(bundle_contents(&graph), duplicated);
  }

  #[test]
  fn reuses_a_bundle_the_other_roots_already_load() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    fixture.asset("src/a.js", 10);
    fixture.asset("src/b.js", 10);
    fixture.asset("src/s.js", 10);
    fixture.lazy("src/index.js", "src/a.js");
    fixture.lazy("src/index.js", "src/b.js");
    fixture.sync("src/a.js", "src/b.js");
    fixture.sync("src/b.js", "src/s.js");

    let graph = build(&fixture, test_config());

    assert_eq!(
      bundle_contents(&graph),
      vec![
        vec!["src/index.js"],
        vec!["src/a.js"],
        vec!["src/b.js", "src/s.js"],
      ]
    );

    let a_bundle = bundle_id_for(&graph, "src/a.js");
    let b_bundle = bundle_id_for(&graph, "src/b.js");
    assert!(graph
      .bundle_graph
      .has_edge(a_bundle, b_bundle, EdgeTypeQuery::All));
    assert!(decisions(&graph).iter().any(|kind| matches!(
      kind,
      DecisionKind::BundleReused { source_bundle, reused_bundle, .. }
        if *source_bundle == a_bundle && *reused_bundle == b_bundle
    )));
  }

  #[test]
  fn async_bundles_already_loaded_are_internalized() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    fixture.asset("src/page.js", 10);
    fixture.sync("src/index.js", "src/page.js");
    fixture.lazy("src/index.js", "src/page.js");

    let graph = build(&fixture, test_config());

    assert_eq!(
      bundle_contents(&graph),
      vec![vec!["src/index.js", "src/page.js"]]
    );

    let (_, index_bundle) = graph.bundle_for_root("src/index.js").unwrap();
    let page = graph.asset_key("src/page.js").unwrap();
    assert!(index_bundle
      .internalized_assets
      .as_ref()
      .unwrap()
      .contains(page.index()));
    assert!(decisions(&graph).iter().any(|kind| matches!(
      kind,
      DecisionKind::BundleInternalized { asset_id } if asset_id == "src/page.js"
    )));
  }

  #[test]
  fn parallel_dependencies_join_the_referencing_bundle_group() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    fixture.asset("src/panel.js", 10);
    fixture.asset("src/shared.js", 10);
    fixture.parallel("src/index.js", "src/panel.js");
    fixture.sync("src/index.js", "src/shared.js");
    fixture.sync("src/panel.js", "src/shared.js");

    let graph = build(&fixture, test_config());

    assert_eq!(
      bundle_contents(&graph),
      vec![vec!["src/index.js", "src/shared.js"], vec!["src/panel.js"]]
    );

    let index_bundle = bundle_id_for(&graph, "src/index.js");
    let panel_bundle = bundle_id_for(&graph, "src/panel.js");
    assert_eq!(graph.bundle_group_bundle_ids.len(), 1);
    assert!(graph
      .bundle_graph
      .has_edge(index_bundle, panel_bundle, EdgeTypeQuery::All));

    let panel = graph.asset_key("src/panel.js").unwrap();
    assert_eq!(graph.asset_reference[&panel][0].1, panel_bundle);
  }

  #[test]
  fn nested_parallel_bundles_load_with_the_outer_group() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/x.js", 10);
    for path in ["src/p1.js", "src/p2.js", "src/s.js", "src/z.js"] {
      fixture.asset(path, 10);
    }
    fixture.parallel("src/x.js", "src/p1.js");
    fixture.parallel("src/p1.js", "src/p2.js");
    fixture.sync("src/p2.js", "src/s.js");
    fixture.lazy("src/x.js", "src/z.js");
    fixture.sync("src/z.js", "src/s.js");

    let graph = build(&fixture, test_config());

    // z runs after the whole group of x, which already has s
    assert_eq!(
      bundle_contents(&graph),
      vec![
        vec!["src/x.js"],
        vec!["src/p1.js"],
        vec!["src/p2.js", "src/s.js"],
        vec!["src/z.js"],
      ]
    );

    let x_bundle = bundle_id_for(&graph, "src/x.js");
    let p1_bundle = bundle_id_for(&graph, "src/p1.js");
    let p2_bundle = bundle_id_for(&graph, "src/p2.js");
    assert!(graph
      .bundle_graph
      .has_edge(x_bundle, p2_bundle, EdgeTypeQuery::All));
    assert!(graph
      .bundle_graph
      .has_edge(p1_bundle, p2_bundle, EdgeTypeQuery::All));
    assert_eq!(
      graph.bundle_group_members(x_bundle),
      vec![x_bundle, p1_bundle, p2_bundle]
    );
  }

  #[test]
  fn bundle_group_members_include_reused_group_bundles_but_not_their_children() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    for path in ["src/a.js", "src/b.js", "src/panel.js"] {
      fixture.asset(path, 10);
    }
    fixture.lazy("src/index.js", "src/b.js");
    fixture.lazy("src/index.js", "src/a.js");
    fixture.sync("src/a.js", "src/b.js");
    fixture.parallel("src/b.js", "src/panel.js");

    let graph = build(&fixture, test_config());

    let a_bundle = bundle_id_for(&graph, "src/a.js");
    let b_bundle = bundle_id_for(&graph, "src/b.js");
    let panel_bundle = bundle_id_for(&graph, "src/panel.js");
    assert_eq!(graph.bundle_group_members(a_bundle), vec![a_bundle, b_bundle]);
    assert_eq!(
      graph.bundle_group_members(b_bundle),
      vec![b_bundle, panel_bundle]
    );
  }

  #[test]
  fn type_changes_go_to_a_sibling_bundle() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    fixture.asset("src/styles.css", 10);
    fixture.sync("src/index.js", "src/styles.css");

    let graph = build(&fixture, test_config());

    assert_eq!(
      bundle_contents(&graph),
      vec![vec!["src/index.js"], vec!["src/styles.css"]]
    );

    let index_bundle = bundle_id_for(&graph, "src/index.js");
    let css_bundle = graph.bundles_with_asset("src/styles.css")[0];
    assert_eq!(
      graph.bundle(css_bundle).unwrap().unique_key.as_deref(),
      Some("src/index.js.css")
    );
    assert!(graph
      .bundle_graph
      .has_edge(index_bundle, css_bundle, EdgeTypeQuery::All));
  }

  #[test]
  fn inline_assets_get_their_own_bundle() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    fixture.add_asset(tessera_core::types::Asset {
      bundle_behavior: Some(BundleBehavior::Inline),
      ..make_asset("src/icon.svg", 10)
    });
    fixture.sync("src/index.js", "src/icon.svg");

    let graph = build(&fixture, test_config());

    assert_eq!(
      bundle_contents(&graph),
      vec![vec!["src/index.js"], vec!["src/icon.svg"]]
    );
    let icon_bundle = graph.bundles_with_asset("src/icon.svg")[0];
    assert_eq!(
      graph.bundle(icon_bundle).unwrap().bundle_behavior,
      Some(BundleBehavior::Inline)
    );
  }

  #[test]
  fn isolated_bundles_assume_nothing_is_loaded() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    fixture.asset("src/worker.js", 10);
    fixture.asset("src/shared.js", 10);
    fixture.isolated("src/index.js", "src/worker.js");
    fixture.sync("src/index.js", "src/shared.js");
    fixture.sync("src/worker.js", "src/shared.js");

    let graph = build(&fixture, test_config());

    assert_eq!(
      bundle_contents(&graph),
      vec![
        vec!["src/index.js", "src/shared.js"],
        vec!["src/shared.js", "src/worker.js"],
      ]
    );
    let (_, worker_bundle) = graph.bundle_for_root("src/worker.js").unwrap();
    assert_eq!(worker_bundle.bundle_behavior, Some(BundleBehavior::Isolated));
    assert_eq!(graph.bundle_group_bundle_ids.len(), 2);
  }

  #[test]
  fn bundle_groups_stay_under_the_parallel_request_limit() {
    let mut fixture = AssetGraphFixture::default();
    fixture.entry("src/index.js", 10);
    for path in ["src/a.js", "src/b.js", "src/c.js"] {
      fixture.asset(path, 10);
      fixture.lazy("src/index.js", path);
    }
    fixture.asset("src/ab.js", 100);
    fixture.asset("src/ac.js", 200);
    fixture.asset("src/abc.js", 300);
    for (from, to) in [
      ("src/a.js", "src/ab.js"),
      ("src/b.js", "src/ab.js"),
      ("src/a.js", "src/ac.js"),
      ("src/c.js", "src/ac.js"),
      ("src/a.js", "src/abc.js"),
      ("src/b.js", "src/abc.js"),
      ("src/c.js", "src/abc.js"),
    ] {
      fixture.sync(from, to);
    }

    let unlimited = build(&fixture, test_config());
    assert_eq!(
      unlimited
        .bundles()
        .filter(|(_, bundle)| bundle.is_shared())
        .count(),
      3
    );

    let graph = build(
      &fixture,
      BundlerConfig {
        max_parallel_requests: 2,
        ..test_config()
      },
    );

    for group in &graph.bundle_group_bundle_ids {
      let loaded = graph.bundle_group_members(*group).len();
      assert!(loaded <= 2, "bundle group {group} loads {loaded} bundles");
    }

    // The largest shared bundle survives, every asset is still somewhere
    assert_eq!(graph.bundles_with_asset("src/abc.js").len(), 1);
    assert_eq!(graph.bundles_with_asset("src/ab.js").len(), 2);
    assert_eq!(graph.bundles_with_asset("src/ac.js").len(), 2);
    assert!(decisions(&graph).iter().any(|kind| matches!(
      kind,
      DecisionKind::SharedBundleRemovedForParallelRequestLimit { .. }
    )));
  }

  #[test]
  fn manual_shared_bundles_collect_matching_assets() {
    let mut fixture = two_async_bundles_sharing(10);
    fixture.asset("node_modules/lib/a.js", 10);
    fixture.asset("node_modules/lib/b.js", 10);
    fixture.sync("src/x.js", "node_modules/lib/a.js");
    fixture.sync("src/y.js", "node_modules/lib/a.js");
    fixture.sync("src/x.js", "node_modules/lib/b.js");

    let graph = build(
      &fixture,
      BundlerConfig {
        manual_shared_bundles: vec![vendor_rule()],
        ..test_config()
      },
    );

    let vendor: Vec<_> = graph
      .bundles()
      .filter(|(_, bundle)| bundle.manual_shared_bundle.as_deref() == Some("vendor"))
      .collect();
    assert_eq!(vendor.len(), 1);

    let (_, vendor_bundle) = vendor[0];
    let mut asset_ids = graph.bundle_asset_ids(vendor_bundle);
    asset_ids.sort();
    assert_eq!(
      asset_ids,
      vec!["node_modules/lib/a.js", "node_modules/lib/b.js"]
    );
    assert_eq!(vendor_bundle.main_entry_asset, None);
    assert_eq!(
      vendor_bundle.source_bundles.iter().copied().collect::<Vec<_>>(),
      vec![
        bundle_id_for(&graph, "src/x.js"),
        bundle_id_for(&graph, "src/y.js")
      ]
    );
    assert_eq!(graph.manual_asset_to_bundle.len(), 2);
  }

  #[test]
  fn manual_shared_bundle_roots_limit_matching() {
    let mut fixture = two_async_bundles_sharing(10);
    fixture.asset("node_modules/lib/a.js", 10);
    fixture.asset("node_modules/lib/c.js", 10);
    fixture.sync("src/x.js", "node_modules/lib/a.js");
    fixture.sync("src/y.js", "node_modules/lib/c.js");

    let graph = build(
      &fixture,
      BundlerConfig {
        manual_shared_bundles: vec![ManualSharedBundle {
          root: Some(PathBuf::from("src/x.js")),
          ..vendor_rule()
        }],
        ..test_config()
      },
    );

    let c_bundles = graph.bundles_with_asset("node_modules/lib/c.js");
    assert_eq!(c_bundles, vec![bundle_id_for(&graph, "src/y.js")]);

    let a_bundles = graph.bundles_with_asset("node_modules/lib/a.js");
    assert_eq!(a_bundles.len(), 1);
    assert_eq!(
      graph.bundle(a_bundles[0]).unwrap().manual_shared_bundle.as_deref(),
      Some("vendor")
    );
  }

  #[test]
  fn manual_shared_bundles_split_by_asset_hash() {
    let mut fixture = two_async_bundles_sharing(10);
    let paths: Vec<String> = (0..6)
      .map(|index| format!("node_modules/lib/{index}.js"))
      .collect();
    for path in &paths {
      fixture.asset(path, 10);
      fixture.sync("src/x.js", path);
    }

    let graph = build(
      &fixture,
      BundlerConfig {
        manual_shared_bundles: vec![ManualSharedBundle {
          split: Some(2),
          ..vendor_rule()
        }],
        ..test_config()
      },
    );

    let mut expected: Vec<Vec<&str>> = Vec::new();
    for remainder in 0..2 {
      let partition: Vec<&str> = paths
        .iter()
        .map(String::as_str)
        .filter(|path| hash_u64(path) % 2 == remainder)
        .collect();
      if !partition.is_empty() {
        expected.push(partition);
      }
    }

    let mut partitions: Vec<Vec<&str>> = graph
      .bundles()
      .filter(|(_, bundle)| bundle.manual_shared_bundle.is_some())
      .map(|(_, bundle)| {
        let mut asset_ids = graph.bundle_asset_ids(bundle);
        asset_ids.sort();
        asset_ids
      })
      .collect();
    partitions.sort();
    expected.sort();

    assert_eq!(partitions, expected);
  }

  #[test]
  fn split_manual_shared_bundles_keep_the_constants_they_import() {
    let mut fixture = two_async_bundles_sharing(10);
    for constant in ["node_modules/lib/constants.js", "node_modules/lib/flags.js"] {
      fixture.add_asset(tessera_core::types::Asset {
        is_constant_module: true,
        ..make_asset(constant, 1)
      });
    }

    let paths: Vec<String> = (0..6)
      .map(|index| format!("node_modules/lib/{index}.js"))
      .collect();
    for path in &paths {
      fixture.asset(path, 10);
      fixture.sync("src/x.js", path);
      fixture.sync(path, "node_modules/lib/constants.js");
    }
    fixture.sync(&paths[0], "node_modules/lib/flags.js");

    let graph = build(
      &fixture,
      BundlerConfig {
        manual_shared_bundles: vec![ManualSharedBundle {
          split: Some(2),
          ..vendor_rule()
        }],
        ..test_config()
      },
    );

    let manual: Vec<Vec<&str>> = graph
      .bundles()
      .filter(|(_, bundle)| bundle.manual_shared_bundle.is_some())
      .map(|(_, bundle)| graph.bundle_asset_ids(bundle))
      .collect();
    assert!(!manual.is_empty());
    for asset_ids in &manual {
      assert!(
        asset_ids.contains(&"node_modules/lib/constants.js"),
        "{asset_ids:?} lost a constant it imports"
      );
    }
    assert_eq!(
      graph.bundles_with_asset("node_modules/lib/flags.js"),
      graph.bundles_with_asset(&paths[0])
    );
  }

  #[traced_test]
  #[test]
  fn manual_shared_bundles_without_a_root_asset_are_skipped() {
    let mut fixture = two_async_bundles_sharing(10);
    fixture.asset("node_modules/lib/a.js", 10);
    fixture.sync("src/x.js", "node_modules/lib/a.js");

    let graph = build(
      &fixture,
      BundlerConfig {
        manual_shared_bundles: vec![ManualSharedBundle {
          root: Some(PathBuf::from("src/missing.js")),
          ..vendor_rule()
        }],
        ..test_config()
      },
    );

    assert!(graph
      .bundles()
      .all(|(_, bundle)| bundle.manual_shared_bundle.is_none()));
    assert_eq!(
      graph
        .diagnostics
        .iter()
        .map(|diagnostic| diagnostic.message.as_str())
        .collect::<Vec<_>>(),
      vec!["Manual shared bundle \"vendor\" skipped, no root asset found"]
    );
    assert!(logs_contain("no root asset found"));
  }

  #[test]
  fn building_twice_gives_the_same_graph() {
    let mut fixture = two_async_bundles_sharing(10);
    fixture.asset("src/styles.css", 10);
    fixture.sync("src/x.js", "src/styles.css");
    fixture.sync("src/y.js", "src/styles.css");

    let first = build(&fixture, test_config());
    let second = build(&fixture, test_config());

    let bundles = |graph: &IdealGraph| {
      graph
        .bundles()
        .map(|(bundle_id, bundle)| (bundle_id, bundle.clone()))
        .collect::<Vec<_>>()
    };
    assert_eq!(bundles(&first), bundles(&second));
    assert_eq!(
      first.bundle_group_bundle_ids,
      second.bundle_group_bundle_ids
    );
    assert_eq!(
      first.bundle_graph.get_all_edges().collect::<Vec<_>>(),
      second.bundle_graph.get_all_edges().collect::<Vec<_>>()
    );
  }

  #[test]
  fn decisions_are_sequential() {
    let fixture = two_async_bundles_sharing(10);

    let graph = build(&fixture, test_config());

    let debug = graph.debug.as_ref().expect("debug info should be present");
    assert!(!debug.decisions.is_empty());
    for (index, decision) in debug.decisions.decisions.iter().enumerate() {
      assert_eq!(decision.seq, index as u64);
    }
    assert!(matches!(
      debug.decisions.decisions[0].kind,
      DecisionKind::BundleRootCreated { .. }
    ));
  }

  #[test]
  fn reports_build_stats() {
    let fixture = two_async_bundles_sharing(10);
    let bundler = IdealGraphBundler::new(test_config(), IdealGraphBuildOptions::default());

    let (graph, stats) = bundler
      .build_ideal_graph(&fixture.asset_graph, fixture.asset_graph.get_entries())
      .unwrap();

    assert_eq!(
      stats,
      IdealGraphBuildStats {
        assets: 4,
        dependencies: 5,
        bundles: 4,
        bundle_groups: 3,
      }
    );
    assert!(graph.debug.is_none());
  }
}

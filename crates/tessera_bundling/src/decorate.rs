//! Writes an [`IdealGraph`] into a bundle graph.
//!
//! The ideal graph only knows about assets and which bundles load which. Decoration turns that
//! into bundle groups, bundles, asset membership, references and internalized dependencies
//! through the [`MutableBundleGraph`] operations.

use std::collections::HashMap;

use anyhow::ensure;
use anyhow::Context;
use tessera_core::bundle_graph::CreateBundleOptions;
use tessera_core::bundle_graph::MutableBundleGraph;
use tessera_core::bundle_graph::NodeId as BundleGraphNodeId;
use tessera_core::types::Priority;
use tessera_core::types::SpecifierType;
use tessera_graph::NodeId;
use tracing::debug;
use tracing::instrument;

use crate::ideal_graph::types::AssetKey;
use crate::ideal_graph::types::IdealBundle;
use crate::ideal_graph::types::IdealGraph;

/// Creates every bundle of `ideal_graph` in `bundle_graph`.
#[instrument(level = "debug", skip_all)]
pub fn decorate_bundle_graph<G: MutableBundleGraph>(
  ideal_graph: &IdealGraph,
  bundle_graph: &mut G,
) -> anyhow::Result<()> {
  let mut bundles: HashMap<NodeId, BundleGraphNodeId> = HashMap::new();
  let mut bundle_groups: Vec<(NodeId, BundleGraphNodeId)> = Vec::new();

  for (bundle_id, bundle) in ideal_graph.bundles() {
    let is_bundle_group = ideal_graph.bundle_group_bundle_ids.contains(&bundle_id);

    let created = match bundle.main_entry_asset {
      Some(entry) if is_bundle_group => {
        let entry_asset_id = &ideal_graph.asset(entry).id;

        let mut bundle_group = None;
        for dependency in ideal_graph.dependencies_loading(bundle_id) {
          bundle_group = Some(bundle_graph.create_bundle_group(
            &dependency,
            &bundle.target,
            entry_asset_id,
          )?);
        }
        ensure!(
          bundle_group.is_some(),
          "No dependency loads the bundle group of {entry_asset_id}"
        );

        let created = bundle_graph.create_bundle(entry_bundle_options(ideal_graph, bundle, entry))?;
        if let Some(bundle_group) = bundle_group {
          bundle_graph.add_bundle_to_bundle_group(created, bundle_group)?;
          bundle_groups.push((bundle_id, bundle_group));
        }
        created
      }
      Some(entry) if bundle.manual_shared_bundle.is_none() && bundle.unique_key.is_none() => {
        bundle_graph.create_bundle(entry_bundle_options(ideal_graph, bundle, entry))?
      }
      _ => bundle_graph.create_bundle(CreateBundleOptions {
        entry_asset_id: None,
        unique_key: Some(shared_bundle_key(ideal_graph, bundle)),
        bundle_behavior: bundle.bundle_behavior,
        bundle_type: Some(bundle.bundle_type.clone()),
        env: Some(bundle.env.clone()),
        manual_shared_bundle: bundle.manual_shared_bundle.clone(),
        needs_stable_name: bundle.needs_stable_name,
        target: bundle.target.clone(),
      })?,
    };

    for key in &bundle.assets {
      bundle_graph.add_asset_to_bundle(&ideal_graph.asset(*key).id, created)?;
    }

    bundles.insert(bundle_id, created);
  }

  internalize_dependencies(ideal_graph, bundle_graph, &bundles)?;

  for (bundle_id, bundle_group) in &bundle_groups {
    for member in ideal_graph.bundle_group_members(*bundle_id) {
      if member == *bundle_id {
        continue;
      }
      if let Some(member) = bundles.get(&member) {
        bundle_graph.add_bundle_to_bundle_group(*member, *bundle_group)?;
      }
    }
  }

  for (key, references) in &ideal_graph.asset_reference {
    let asset_id = &ideal_graph.asset(*key).id;
    for (dependency, bundle_id) in references {
      let Some(bundle) = bundles.get(bundle_id) else {
        continue;
      };
      bundle_graph.create_asset_reference(&dependency.id, asset_id, *bundle)?;
    }
  }

  for edge in ideal_graph.bundle_graph.get_all_edges() {
    // Edges out of the root only mark bundle groups
    let Some(from) = bundles.get(&edge.from) else {
      continue;
    };
    let to = bundles
      .get(&edge.to)
      .with_context(|| format!("bundle {} was not created", edge.to))?;

    bundle_graph.create_bundle_reference(*from, *to)?;
  }

  debug!(
    bundles = bundles.len(),
    bundle_groups = bundle_groups.len(),
    "Decorated bundle graph"
  );
  Ok(())
}

fn entry_bundle_options(
  ideal_graph: &IdealGraph,
  bundle: &IdealBundle,
  entry: AssetKey,
) -> CreateBundleOptions {
  CreateBundleOptions {
    entry_asset_id: Some(ideal_graph.asset(entry).id.clone()),
    bundle_behavior: bundle.bundle_behavior,
    manual_shared_bundle: bundle.manual_shared_bundle.clone(),
    needs_stable_name: bundle.needs_stable_name,
    target: bundle.target.clone(),
    ..CreateBundleOptions::default()
  }
}

fn shared_bundle_key(ideal_graph: &IdealGraph, bundle: &IdealBundle) -> String {
  match &bundle.unique_key {
    Some(unique_key) => unique_key.clone(),
    None => ideal_graph.bundle_asset_ids(bundle).join(","),
  }
}

/// Lazy imports of assets a bundle already holds, or already has loaded, are resolved in place.
fn internalize_dependencies<G: MutableBundleGraph>(
  ideal_graph: &IdealGraph,
  bundle_graph: &mut G,
  bundles: &HashMap<NodeId, BundleGraphNodeId>,
) -> anyhow::Result<()> {
  for (bundle_id, bundle) in ideal_graph.bundles() {
    let Some(internalized_assets) = &bundle.internalized_assets else {
      continue;
    };
    let Some(created) = bundles.get(&bundle_id).copied() else {
      continue;
    };

    for index in internalized_assets.ones() {
      let asset_id = &ideal_graph.assets[index].id;

      for dependency in bundle_graph.get_incoming_dependencies(asset_id)? {
        if dependency.priority != Priority::Lazy || dependency.specifier_type == SpecifierType::Url
        {
          continue;
        }

        // Manual bundles hold async roots for every bundle that imports them
        let holders = if bundle.manual_shared_bundle.is_some() {
          bundle_graph.get_bundles_with_dependency(&dependency.id)
        } else if bundle_graph.bundle_has_dependency(created, &dependency.id) {
          vec![created]
        } else {
          Vec::new()
        };

        for holder in holders {
          bundle_graph.internalize_async_dependency(holder, &dependency.id)?;
        }
      }
    }
  }

  Ok(())
}

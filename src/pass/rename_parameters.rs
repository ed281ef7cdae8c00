use std::collections::BTreeMap;

use anyhow::Context;

use crate::component::{Component, Parameter};
use crate::error::PassResult;
use crate::marker::{Marker, MarkerScope, ParameterConfig};
use crate::pass::{BuildContext, Pass};
use crate::scene::NodeId;

/// Renames parameters declared by `Parameters` markers inside their subtree,
/// then registers the final names on the avatar descriptor.
pub(crate) fn process(avatar: &mut MarkerScope<'_>, _: &mut BuildContext<'_>) -> PassResult {
    let mut nodes = avatar.pending(Pass::RenameParameters);
    if nodes.is_empty() {
        return Ok(());
    }

    // inner declarations first, so outer renames apply on top of them
    nodes.sort_by_key(|&id| std::cmp::Reverse(avatar.depth(id)));

    let mut internal = 0usize;
    let mut declared = Vec::new();

    for node in nodes {
        for marker in avatar.markers_of(node, Pass::RenameParameters) {
            let Marker::Parameters(config) = marker else {
                continue;
            };

            let renames = rename_map(&config, &mut internal);
            apply_renames(avatar, node, &renames);

            declared.extend(config.entries.iter().map(|entry| Parameter {
                name: renames.get(&entry.name).unwrap_or(&entry.name).clone(),
                kind: entry.kind,
                default: entry.default,
                saved: entry.saved,
            }));
        }
    }

    let descriptor = avatar
        .descriptor_mut()
        .context("avatar root has no descriptor to register parameters on")?;

    for parameter in declared {
        let name = parameter.name.clone();
        if !descriptor.register_parameter(parameter) {
            tracing::debug!(%name, "parameter already registered");
        }
    }

    Ok(())
}

fn rename_map(config: &ParameterConfig, internal: &mut usize) -> BTreeMap<String, String> {
    let mut renames = BTreeMap::new();
    for entry in &config.entries {
        let target = match (&entry.remap_to, entry.internal) {
            (Some(name), _) => name.clone(),
            (None, true) => {
                *internal += 1;
                format!("{}$$Internal_{}", entry.name, internal)
            }
            (None, false) => continue,
        };
        if target != entry.name {
            renames.insert(entry.name.clone(), target);
        }
    }
    renames
}

/// Rewrites parameter references in every animator and menu marker below `root`.
fn apply_renames(avatar: &mut MarkerScope<'_>, root: NodeId, renames: &BTreeMap<String, String>) {
    if renames.is_empty() {
        return;
    }

    for id in avatar.descendants(root) {
        let Some(node) = avatar.node_mut(id) else {
            continue;
        };

        for component in &mut node.components {
            match component {
                Component::Marker(Marker::MergeAnimator(merge)) => {
                    for (from, to) in renames {
                        merge.controller.rename_parameter(from, to);
                    }
                }
                Component::Marker(Marker::MenuInstaller(installer)) => {
                    for (from, to) in renames {
                        installer.menu.rename_parameter(from, to);
                    }
                }
                _ => {}
            }
        }
    }
}

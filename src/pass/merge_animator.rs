use std::collections::BTreeSet;

use anyhow::Context;

use crate::component::LayerKind;
use crate::error::PassResult;
use crate::marker::{Marker, MarkerScope, PathMode};
use crate::pass::{BuildContext, Pass, join_path};

/// Merges marked animator controllers into the avatar's playable layers.
///
/// Runs after every structural pass, so curve paths are brought up to date
/// first: the avatar's own controllers through the path remap, and every
/// merged controller after rebasing its relative paths onto the marked node.
pub(crate) fn process(avatar: &mut MarkerScope<'_>, ctx: &mut BuildContext<'_>) -> PassResult {
    if !ctx.tables.paths.is_empty()
        && let Some(descriptor) = avatar.descriptor_mut()
    {
        let mut rewritten = 0usize;
        for controller in descriptor.controllers_mut() {
            for curve in controller.curves_mut() {
                let resolved = ctx.tables.paths.resolve(&curve.path).to_string();
                if resolved != curve.path {
                    curve.path = resolved;
                    rewritten += 1;
                }
            }
        }
        tracing::debug!(rewritten, "rewrote animation curve paths");
    }

    let nodes = avatar.pending(Pass::MergeAnimator);
    if nodes.is_empty() {
        return Ok(());
    }

    let mut merged = BTreeSet::<LayerKind>::new();
    for node in nodes {
        let base = avatar.path_of(node).unwrap_or_default();

        for marker in avatar.markers_of(node, Pass::MergeAnimator) {
            let Marker::MergeAnimator(merge) = marker else {
                continue;
            };

            let mut controller = merge.controller;
            for curve in controller.curves_mut() {
                let path = match merge.path_mode {
                    PathMode::Relative => join_path(&base, &curve.path),
                    PathMode::Absolute => curve.path.clone(),
                };
                curve.path = ctx.tables.paths.resolve(&path).to_string();
            }

            let descriptor = avatar
                .descriptor_mut()
                .context("avatar root has no descriptor to merge animators into")?;
            let target = descriptor.layer_mut(merge.layer);
            for parameter in controller.parameters {
                if !target.parameters.contains(&parameter) {
                    target.parameters.push(parameter);
                }
            }
            target.layers.extend(controller.layers);
            merged.insert(merge.layer);
        }
    }

    let name = avatar.name().to_string();
    for kind in merged {
        let Some(controller) = avatar.descriptor().and_then(|d| d.layer(kind)) else {
            continue;
        };
        let path = ctx
            .assets
            .save_generated(&format!("{name}_{kind}.controller"), controller)?;
        tracing::debug!(%path, layer = %kind, "saved merged controller");
    }

    Ok(())
}

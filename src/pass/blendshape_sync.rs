use crate::component::{Component, Curve};
use crate::error::PassResult;
use crate::marker::{BlendshapeBinding, Marker, MarkerScope};
use crate::pass::{BuildContext, Pass};

/// Drives blendshapes on marked meshes from blendshapes on another mesh.
///
/// Every clip that animates a bound source blendshape gets a copy of that
/// curve for the local blendshape. Curves the clip already has for the local
/// blendshape are left alone.
pub(crate) fn process(avatar: &mut MarkerScope<'_>, ctx: &mut BuildContext<'_>) -> PassResult {
    let mut bindings = Vec::new();
    for node in avatar.pending(Pass::BlendshapeSync) {
        let Some(path) = avatar.path_of(node) else {
            continue;
        };

        for marker in avatar.markers_of(node, Pass::BlendshapeSync) {
            let Marker::BlendshapeSync(sync) = marker else {
                continue;
            };
            for binding in sync.bindings {
                let local = local_name(&binding).to_string();
                let known = avatar.node(node).is_some_and(|node| {
                    node.components.iter().any(|component| match component {
                        Component::SkinnedMesh(mesh) => mesh.blendshapes.contains(&local),
                        _ => false,
                    })
                });
                if !known {
                    tracing::warn!(%path, blendshape = %local, "synced blendshape missing on mesh");
                }
                bindings.push((path.clone(), binding));
            }
        }
    }

    if bindings.is_empty() {
        return Ok(());
    }

    let Some(descriptor) = avatar.descriptor_mut() else {
        tracing::debug!("avatar has no descriptor, no animations to sync");
        return Ok(());
    };

    let mut added = 0usize;
    for controller in descriptor.controllers_mut() {
        for clip in controller.clips_mut() {
            for (path, binding) in &bindings {
                let source_path = ctx.tables.paths.resolve(&binding.mesh);
                let source_property = format!("blendShape.{}", binding.blendshape);
                let local_property = format!("blendShape.{}", local_name(binding));

                if clip
                    .curves
                    .iter()
                    .any(|curve| curve.path == *path && curve.property == local_property)
                {
                    continue;
                }

                let copies: Vec<Curve> = clip
                    .curves
                    .iter()
                    .filter(|curve| curve.path == source_path && curve.property == source_property)
                    .map(|curve| Curve {
                        path: path.clone(),
                        property: local_property.clone(),
                        keys: curve.keys.clone(),
                    })
                    .collect();

                added += copies.len();
                clip.curves.extend(copies);
            }
        }
    }

    tracing::debug!(added, "synced blendshape curves");
    Ok(())
}

fn local_name(binding: &BlendshapeBinding) -> &str {
    binding
        .local_blendshape
        .as_deref()
        .unwrap_or(&binding.blendshape)
}

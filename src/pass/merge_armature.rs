use anyhow::{Context, bail};

use crate::component::Component;
use crate::error::PassResult;
use crate::marker::{MarkerScope, Marker, MergeArmature};
use crate::pass::{BuildContext, Pass};
use crate::scene::NodeId;

/// Merges marked armatures into the armature at their target path.
///
/// Bones are matched by name after stripping the configured prefix and
/// suffix. A matched bone is folded into its counterpart: its identity and
/// path are remapped onto the target bone, its components and unmatched
/// children move over, and the bone itself is removed. Bones without a
/// counterpart are moved under the target bone as they are.
pub(crate) fn process(avatar: &mut MarkerScope<'_>, ctx: &mut BuildContext<'_>) -> PassResult {
    for node in avatar.pending(Pass::MergeArmature) {
        for marker in avatar.markers_of(node, Pass::MergeArmature) {
            let Marker::MergeArmature(config) = marker else {
                continue;
            };
            // an earlier merge may already have folded this node away
            if !avatar.contains(node) {
                break;
            }

            let name = avatar.path_of(node).unwrap_or_default();
            let target_path = ctx.tables.paths.resolve(&config.merge_target).to_string();
            let target = avatar.find(&target_path).with_context(|| {
                format!("merge target '{}' of '{name}' not found", config.merge_target)
            })?;

            if target == node || avatar.is_ancestor(node, target) {
                bail!("'{name}' cannot be merged into '{target_path}', which lies inside it");
            }

            tracing::debug!(source = %name, into = %target_path, "merging armature");
            merge_bone(avatar, ctx, &config, node, target)?;
        }
    }

    Ok(())
}

fn merge_bone(
    avatar: &mut MarkerScope<'_>,
    ctx: &mut BuildContext<'_>,
    config: &MergeArmature,
    source: NodeId,
    target: NodeId,
) -> PassResult {
    for child in avatar.children(source) {
        let Some(name) = avatar.node(child).map(|node| node.name.clone()) else {
            continue;
        };

        match avatar.child_by_name(target, strip_affixes(&name, config)) {
            Some(counterpart) => merge_bone(avatar, ctx, config, child, counterpart)?,
            None => ctx.reparent(avatar, child, target)?,
        }
    }

    // every child is gone by now, fold the bone itself into its counterpart
    if let (Some(from), Some(to)) = (avatar.path_of(source), avatar.path_of(target)) {
        ctx.tables.paths.insert(from, to);
    }
    ctx.tables.bones.insert(source, target);

    let moved: Vec<Component> = avatar
        .node_mut(source)
        .map(|node| std::mem::take(&mut node.components))
        .unwrap_or_default()
        .into_iter()
        .filter(|component| !matches!(component, Component::Marker(Marker::MergeArmature(_))))
        .collect();

    if !moved.is_empty() {
        let has_markers = moved.iter().any(Component::is_marker);
        if let Some(node) = avatar.node_mut(target) {
            node.components.extend(moved);
        }
        if has_markers {
            avatar.track(target);
        }
    }

    avatar.remove(source)?;
    Ok(())
}

fn strip_affixes<'a>(name: &'a str, config: &MergeArmature) -> &'a str {
    let name = name.strip_prefix(config.prefix.as_str()).unwrap_or(name);
    name.strip_suffix(config.suffix.as_str()).unwrap_or(name)
}

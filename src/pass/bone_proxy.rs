use glam::Vec3;

use crate::error::PassResult;
use crate::marker::{Marker, MarkerScope};
use crate::pass::{BuildContext, Pass};

/// Moves marked nodes under their target bone.
///
/// Targets are authored against the hierarchy as it was before merging, so
/// they are resolved through the path remap first.
pub(crate) fn process(avatar: &mut MarkerScope<'_>, ctx: &mut BuildContext<'_>) -> PassResult {
    for node in avatar.pending(Pass::BoneProxy) {
        for marker in avatar.markers_of(node, Pass::BoneProxy) {
            let Marker::BoneProxy(proxy) = marker else {
                continue;
            };

            let path = ctx.tables.paths.resolve(&proxy.target).to_string();
            let Some(target) = avatar.find(&path) else {
                tracing::warn!(bone = %proxy.target, "bone proxy target not found, skipping");
                continue;
            };

            if target == node || avatar.is_ancestor(node, target) {
                tracing::warn!(bone = %path, "bone proxy target lies inside the proxy, skipping");
                continue;
            }

            ctx.reparent(avatar, node, target)?;

            if !proxy.keep_position
                && let Some(node) = avatar.node_mut(node)
            {
                node.position = Vec3::ZERO;
            }
        }
    }

    Ok(())
}

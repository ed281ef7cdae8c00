use crate::component::Component;
use crate::error::PassResult;
use crate::marker::MarkerScope;
use crate::pass::BuildContext;

/// Points skinned meshes, constraints and the descriptor's head bone at the
/// bones they were merged into.
pub(crate) fn process(avatar: &mut MarkerScope<'_>, ctx: &mut BuildContext<'_>) -> PassResult {
    let bones = &ctx.tables.bones;
    if bones.is_empty() {
        return Ok(());
    }

    let ids: Vec<_> = avatar.iter().map(|(id, _)| id).collect();
    let mut retargeted = 0usize;

    for id in ids {
        let Some(node) = avatar.node_mut(id) else {
            continue;
        };

        for component in &mut node.components {
            match component {
                Component::SkinnedMesh(mesh) => {
                    for bone in &mut mesh.bones {
                        *bone = bones.resolve(*bone);
                    }
                    mesh.root_bone = mesh.root_bone.map(|bone| bones.resolve(bone));
                    retargeted += 1;
                }
                Component::ParentConstraint(constraint) => {
                    constraint.source = bones.resolve(constraint.source);
                }
                Component::Descriptor(descriptor) => {
                    descriptor.head = descriptor.head.map(|bone| bones.resolve(bone));
                }
                Component::Marker(_) => {}
            }
        }
    }

    tracing::debug!(meshes = retargeted, "retargeted skinned meshes");
    Ok(())
}

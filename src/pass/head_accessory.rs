use anyhow::{Context, bail};

use crate::component::ParentConstraint;
use crate::error::PassResult;
use crate::marker::MarkerScope;
use crate::pass::{BuildContext, Pass};
use crate::scene::{Node, NodeId};

/// Name of the proxy bone accessories are moved under.
pub(crate) const HEAD_CHOP: &str = "HeadChop";

/// Keeps head-attached accessories visible in first person.
///
/// The host hides everything under the head bone for the local player. Marked
/// accessories are moved under a sibling of the head bone that follows the
/// head through a parent constraint, so they still move with it but are no
/// longer hidden along with it.
pub(crate) fn process(avatar: &mut MarkerScope<'_>, ctx: &mut BuildContext<'_>) -> PassResult {
    let mut nodes = avatar.pending(Pass::VisibleHeadAccessory);
    if nodes.is_empty() {
        return Ok(());
    }

    let head = avatar
        .descriptor()
        .context("avatar root has no descriptor, head accessories need one")?
        .head
        .context("avatar descriptor has no head bone")?;
    let head = ctx.tables.bones.resolve(head);
    if !avatar.contains(head) {
        bail!("head bone {head:?} is not part of the avatar");
    }
    let parent = avatar.parent(head).context("head bone has no parent")?;

    // outer accessories first, nested ones travel along with them
    nodes.sort_by_key(|&id| avatar.depth(id));

    let mut chop: Option<NodeId> = None;
    for node in nodes {
        if chop.is_some_and(|chop| avatar.is_ancestor(chop, node)) {
            continue;
        }
        if !avatar.is_ancestor(head, node) {
            let path = avatar.path_of(node).unwrap_or_default();
            tracing::warn!(%path, "head accessory is not attached to the head bone, skipping");
            continue;
        }

        let target = match chop {
            Some(chop) => chop,
            None => {
                let position = avatar.node(head).map(|node| node.position).unwrap_or_default();
                let proxy = Node::new(HEAD_CHOP)
                    .at(position)
                    .with(ParentConstraint { source: head });
                *chop.insert(avatar.add_child(parent, proxy)?)
            }
        };

        ctx.reparent(avatar, node, target)?;
    }

    Ok(())
}

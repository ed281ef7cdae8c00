//! The fixed sequence of rewrite passes.
//!
//! Every pass has the same shape: it receives the avatar (through the
//! [`MarkerScope`] that owns marker cleanup) and the per-run
//! [`BuildContext`], mutates both in place, and may fail. The set is closed
//! and the order in [`Pass::ORDER`] is a dependency chain: structural passes
//! come before the passes that consume the identities and paths they change.

mod blendshape_sync;
mod bone_proxy;
mod head_accessory;
mod menu_install;
mod merge_animator;
mod merge_armature;
mod rename_parameters;
mod retarget_meshes;

use std::fmt::Display;

use crate::assets::AssetStore;
use crate::error::{PassResult, SceneError};
use crate::marker::MarkerScope;
use crate::scene::{NodeId, SceneGraph};
use crate::tables::MappingTables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pass {
    RenameParameters,
    MenuInstall,
    MergeArmature,
    RetargetMeshes,
    BoneProxy,
    VisibleHeadAccessory,
    MergeAnimator,
    BlendshapeSync,
}

impl Pass {
    /// Execution order. Not configurable.
    pub const ORDER: [Pass; 8] = [
        Pass::RenameParameters,
        Pass::MenuInstall,
        Pass::MergeArmature,
        Pass::RetargetMeshes,
        Pass::BoneProxy,
        Pass::VisibleHeadAccessory,
        Pass::MergeAnimator,
        Pass::BlendshapeSync,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Pass::RenameParameters => "rename-parameters",
            Pass::MenuInstall => "menu-install",
            Pass::MergeArmature => "merge-armature",
            Pass::RetargetMeshes => "retarget-meshes",
            Pass::BoneProxy => "bone-proxy",
            Pass::VisibleHeadAccessory => "visible-head-accessory",
            Pass::MergeAnimator => "merge-animator",
            Pass::BlendshapeSync => "blendshape-sync",
        }
    }

    pub(crate) fn run(self, avatar: &mut MarkerScope<'_>, ctx: &mut BuildContext<'_>) -> PassResult {
        match self {
            Pass::RenameParameters => rename_parameters::process(avatar, ctx),
            Pass::MenuInstall => menu_install::process(avatar, ctx),
            Pass::MergeArmature => merge_armature::process(avatar, ctx),
            Pass::RetargetMeshes => retarget_meshes::process(avatar, ctx),
            Pass::BoneProxy => bone_proxy::process(avatar, ctx),
            Pass::VisibleHeadAccessory => head_accessory::process(avatar, ctx),
            Pass::MergeAnimator => merge_animator::process(avatar, ctx),
            Pass::BlendshapeSync => blendshape_sync::process(avatar, ctx),
        }
    }
}

impl Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// State shared by all passes of one run.
pub struct BuildContext<'a> {
    pub tables: &'a mut MappingTables,
    pub assets: &'a mut AssetStore,
}

impl<'a> BuildContext<'a> {
    pub fn new(tables: &'a mut MappingTables, assets: &'a mut AssetStore) -> Self {
        Self { tables, assets }
    }

    /// Moves `node` under `parent` and records the new path of the node and
    /// of every node below it.
    pub fn reparent(
        &mut self,
        graph: &mut SceneGraph,
        node: NodeId,
        parent: NodeId,
    ) -> Result<(), SceneError> {
        let before = subtree_paths(graph, node);
        graph.reparent(node, parent)?;
        self.record_paths(graph, before);
        Ok(())
    }

    fn record_paths(&mut self, graph: &SceneGraph, before: Vec<(NodeId, String)>) {
        for (id, old) in before {
            if let Some(new) = graph.path_of(id) {
                self.tables.paths.insert(old, new);
            }
        }
    }
}

fn subtree_paths(graph: &SceneGraph, node: NodeId) -> Vec<(NodeId, String)> {
    graph
        .descendants(node)
        .into_iter()
        .filter_map(|id| graph.path_of(id).map(|path| (id, path)))
        .collect()
}

/// Joins two hierarchy paths, either of which may be empty.
pub(crate) fn join_path(base: &str, rest: &str) -> String {
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{rest}"),
    }
}

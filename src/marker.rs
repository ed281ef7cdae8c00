//! Transient markers and the scope that guarantees their removal.
//!
//! A marker opts a node into one pass. Markers only live for the duration of
//! a single run: once processing ends, successfully or not, none may remain
//! anywhere in the graph, otherwise a later run (or a nested one) would pick
//! them up again and process the same node twice.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::component::{AnimatorController, LayerKind, Menu, ParameterKind};
use crate::pass::Pass;
use crate::scene::{NodeId, SceneGraph};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Marker {
    Parameters(ParameterConfig),
    MenuInstaller(MenuInstaller),
    MergeArmature(MergeArmature),
    BoneProxy(BoneProxy),
    VisibleHeadAccessory,
    MergeAnimator(MergeAnimator),
    BlendshapeSync(BlendshapeSync),
}

impl Marker {
    /// The pass this marker opts its node into.
    pub fn pass(&self) -> Pass {
        match self {
            Marker::Parameters(_) => Pass::RenameParameters,
            Marker::MenuInstaller(_) => Pass::MenuInstall,
            Marker::MergeArmature(_) => Pass::MergeArmature,
            Marker::BoneProxy(_) => Pass::BoneProxy,
            Marker::VisibleHeadAccessory => Pass::VisibleHeadAccessory,
            Marker::MergeAnimator(_) => Pass::MergeAnimator,
            Marker::BlendshapeSync(_) => Pass::BlendshapeSync,
        }
    }
}

/// Parameters declared by a subtree, optionally renamed on the way in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub entries: Vec<ParameterEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub name: String,
    /// Explicit new name. Takes precedence over `internal`.
    pub remap_to: Option<String>,
    /// Give the parameter a unique name nothing outside the subtree can collide with.
    pub internal: bool,
    pub kind: ParameterKind,
    pub default: f32,
    pub saved: bool,
}

impl ParameterEntry {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            remap_to: None,
            internal: false,
            kind,
            default: 0.0,
            saved: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuInstaller {
    pub menu: Menu,
    /// Submenu path inside the avatar's root menu, `None` for the root itself.
    pub install_target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeArmature {
    /// Hierarchy path of the armature to merge into.
    pub merge_target: String,
    pub prefix: String,
    pub suffix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoneProxy {
    /// Hierarchy path of the new parent, as authored before any merge.
    pub target: String,
    pub keep_position: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathMode {
    /// Curve paths are relative to the marked node.
    #[default]
    Relative,
    /// Curve paths are relative to the avatar root.
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeAnimator {
    pub controller: AnimatorController,
    pub layer: LayerKind,
    pub path_mode: PathMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlendshapeSync {
    pub bindings: Vec<BlendshapeBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendshapeBinding {
    /// Hierarchy path of the mesh whose blendshape drives this one.
    pub mesh: String,
    pub blendshape: String,
    /// Blendshape on the marked mesh, when its name differs.
    pub local_blendshape: Option<String>,
}

/// Pending work for one run, plus guaranteed marker removal.
///
/// Acquiring the scope records every node that carries a marker, grouped by
/// the pass the marker belongs to. Passes reach the graph through the scope
/// and ask it for their pending nodes. When the scope is dropped, on success,
/// on an early `?` return, or while unwinding, every marker is stripped from
/// the whole graph, not only from the recorded nodes.
pub struct MarkerScope<'a> {
    graph: &'a mut SceneGraph,
    pending: BTreeMap<Pass, BTreeSet<NodeId>>,
}

impl<'a> MarkerScope<'a> {
    pub fn acquire(graph: &'a mut SceneGraph) -> Self {
        let mut pending: BTreeMap<Pass, BTreeSet<NodeId>> = BTreeMap::new();
        for (id, node) in graph.iter() {
            for marker in node.markers() {
                pending.entry(marker.pass()).or_default().insert(id);
            }
        }

        tracing::debug!(
            nodes = pending.values().map(BTreeSet::len).sum::<usize>(),
            "acquired marker scope"
        );

        Self { graph, pending }
    }

    /// Nodes still carrying a marker for `pass`, in node order.
    pub fn pending(&self, pass: Pass) -> Vec<NodeId> {
        self.pending
            .get(&pass)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&id| {
                self.graph
                    .node(id)
                    .is_some_and(|node| node.markers().any(|m| m.pass() == pass))
            })
            .collect()
    }

    /// Records markers that arrived on `id` during the run, e.g. when a
    /// pass moved components from one node onto another.
    pub fn track(&mut self, id: NodeId) {
        let Some(node) = self.graph.node(id) else {
            return;
        };
        for marker in node.markers() {
            self.pending.entry(marker.pass()).or_default().insert(id);
        }
    }

    /// Markers of `pass` on `id`.
    pub fn markers_of(&self, id: NodeId, pass: Pass) -> Vec<Marker> {
        self.graph
            .node(id)
            .map(|node| {
                node.markers()
                    .filter(|marker| marker.pass() == pass)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Deref for MarkerScope<'_> {
    type Target = SceneGraph;

    fn deref(&self) -> &Self::Target {
        self.graph
    }
}

impl DerefMut for MarkerScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.graph
    }
}

impl Drop for MarkerScope<'_> {
    fn drop(&mut self) {
        let removed = self.graph.strip_markers();
        self.pending.clear();
        tracing::debug!(removed, "released marker scope");
    }
}

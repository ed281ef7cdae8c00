//! The avatar scene graph.
//!
//! A tree of named nodes stored in a [`StableGraph`], so a [`NodeId`] stays
//! valid while other nodes are moved or removed. Edges point from parent to
//! child and carry a sequence number that keeps siblings in insertion order.

use glam::Vec3;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::component::{AvatarDescriptor, Component};
use crate::core::Hash32;
use crate::error::{AssetError, SceneError};
use crate::marker::Marker;

/// Identity of a node (and of a bone, since bones are nodes).
pub type NodeId = NodeIndex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub position: Vec3,
    pub components: Vec<Component>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: Vec3::ZERO,
            components: Vec::new(),
        }
    }

    pub fn with(mut self, component: impl Into<Component>) -> Self {
        self.components.push(component.into());
        self
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.components.iter().filter_map(Component::as_marker)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneGraph {
    graph: StableGraph<Node, u32>,
    root: NodeId,
    sequence: u32,
}

impl SceneGraph {
    pub fn new(root: Node) -> Self {
        let mut graph = StableGraph::new();
        let root = graph.add_node(root);
        Self {
            graph,
            root,
            sequence: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Name of the root node, which is the avatar's name.
    pub fn name(&self) -> &str {
        &self.graph[self.root].name
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.contains_node(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node_weight(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.graph.node_weight_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.graph
            .node_indices()
            .map(|id| (id, &self.graph[id]))
    }

    pub fn add_child(&mut self, parent: NodeId, node: Node) -> Result<NodeId, SceneError> {
        if !self.contains(parent) {
            return Err(SceneError::Missing(parent));
        }
        let id = self.graph.add_node(node);
        let order = self.next_sequence();
        self.graph.add_edge(parent, id, order);
        Ok(id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.graph
            .neighbors_directed(id, Direction::Incoming)
            .next()
    }

    /// Children of `id` in insertion order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Outgoing)
            .map(|edge| (*edge.weight(), edge.target()))
            .collect();
        edges.sort_by_key(|(order, _)| *order);
        edges.into_iter().map(|(_, child)| child).collect()
    }

    pub fn child_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id)
            .into_iter()
            .find(|&child| self.graph[child].name == name)
    }

    /// `id` followed by all of its descendants, depth first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut acc = Vec::new();
        if !self.contains(id) {
            return acc;
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            acc.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        acc
    }

    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(node) = current {
            depth += 1;
            current = self.parent(node);
        }
        depth
    }

    /// Hierarchy path of `id` relative to the root, e.g. `Armature/Hips`.
    ///
    /// The root itself has the empty path.
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        if !self.contains(id) {
            return None;
        }

        let mut segments = Vec::new();
        let mut current = id;
        while current != self.root {
            segments.push(self.graph[current].name.as_str());
            current = self.parent(current)?;
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    /// Looks up a node by hierarchy path. The first matching sibling wins.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self.root, |node, segment| self.child_by_name(node, segment))
    }

    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId) -> Result<(), SceneError> {
        if id == self.root {
            return Err(SceneError::Root);
        }
        for node in [id, new_parent] {
            if !self.contains(node) {
                return Err(SceneError::Missing(node));
            }
        }
        if id == new_parent || self.is_ancestor(id, new_parent) {
            return Err(SceneError::Cycle {
                node: id,
                parent: new_parent,
            });
        }

        let incoming: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|edge| edge.id())
            .collect();
        for edge in incoming {
            self.graph.remove_edge(edge);
        }

        let order = self.next_sequence();
        self.graph.add_edge(new_parent, id, order);
        Ok(())
    }

    /// Removes `id` and its whole subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<(), SceneError> {
        if id == self.root {
            return Err(SceneError::Root);
        }
        if !self.contains(id) {
            return Err(SceneError::Missing(id));
        }
        for node in self.descendants(id) {
            self.graph.remove_node(node);
        }
        Ok(())
    }

    pub fn descriptor(&self) -> Option<&AvatarDescriptor> {
        self.graph[self.root]
            .components
            .iter()
            .find_map(|component| match component {
                Component::Descriptor(descriptor) => Some(descriptor),
                _ => None,
            })
    }

    pub fn descriptor_mut(&mut self) -> Option<&mut AvatarDescriptor> {
        self.graph[self.root]
            .components
            .iter_mut()
            .find_map(|component| match component {
                Component::Descriptor(descriptor) => Some(descriptor),
                _ => None,
            })
    }

    /// Moves the whole avatar by `offset`.
    pub fn translate(&mut self, offset: Vec3) {
        self.graph[self.root].position += offset;
    }

    pub fn marker_count(&self) -> usize {
        self.graph
            .node_weights()
            .map(|node| node.markers().count())
            .sum()
    }

    /// Removes every marker from every node, returning how many were removed.
    pub fn strip_markers(&mut self) -> usize {
        let mut removed = 0;
        for node in self.graph.node_weights_mut() {
            let before = node.components.len();
            node.components.retain(|component| !component.is_marker());
            removed += before - node.components.len();
        }
        removed
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, AssetError> {
        let mut buffer = Vec::new();
        ciborium::into_writer(self, &mut buffer)?;
        Ok(buffer)
    }

    pub(crate) fn fingerprint(&self) -> Result<Hash32, AssetError> {
        Ok(Hash32::hash(self.encode()?))
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence += 1;
        self.sequence
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Root
    /// └── Armature
    ///     └── Hips
    ///         ├── Spine
    ///         │   └── Head
    ///         └── LeftLeg
    pub(crate) fn skeleton() -> SceneGraph {
        let mut graph = SceneGraph::new(Node::new("Root"));
        let armature = graph.add_child(graph.root(), Node::new("Armature")).unwrap();
        let hips = graph.add_child(armature, Node::new("Hips")).unwrap();
        let spine = graph.add_child(hips, Node::new("Spine")).unwrap();
        graph.add_child(spine, Node::new("Head")).unwrap();
        graph.add_child(hips, Node::new("LeftLeg")).unwrap();
        graph
    }

    #[test]
    fn test_paths() {
        let graph = skeleton();
        let head = graph.find("Armature/Hips/Spine/Head").unwrap();

        assert_eq!(graph.path_of(head).as_deref(), Some("Armature/Hips/Spine/Head"));
        assert_eq!(graph.path_of(graph.root()).as_deref(), Some(""));
        assert_eq!(graph.find(""), Some(graph.root()));
        assert_eq!(graph.find("Armature/Nope"), None);
        assert_eq!(graph.depth(head), 4);
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let graph = skeleton();
        let hips = graph.find("Armature/Hips").unwrap();
        let names: Vec<_> = graph
            .children(hips)
            .into_iter()
            .map(|id| graph.node(id).unwrap().name.clone())
            .collect();
        assert_eq!(names, ["Spine", "LeftLeg"]);
    }

    #[test]
    fn test_reparent() {
        let mut graph = skeleton();
        let leg = graph.find("Armature/Hips/LeftLeg").unwrap();
        let head = graph.find("Armature/Hips/Spine/Head").unwrap();

        graph.reparent(leg, head).unwrap();
        assert_eq!(
            graph.path_of(leg).as_deref(),
            Some("Armature/Hips/Spine/Head/LeftLeg")
        );
        assert_eq!(graph.parent(leg), Some(head));
    }

    #[test]
    fn test_reparent_rejects_cycles_and_root() {
        let mut graph = skeleton();
        let hips = graph.find("Armature/Hips").unwrap();
        let head = graph.find("Armature/Hips/Spine/Head").unwrap();
        let root = graph.root();

        assert!(matches!(graph.reparent(hips, head), Err(SceneError::Cycle { .. })));
        assert!(matches!(graph.reparent(hips, hips), Err(SceneError::Cycle { .. })));
        assert!(matches!(graph.reparent(root, hips), Err(SceneError::Root)));
    }

    #[test]
    fn test_remove_subtree() {
        let mut graph = skeleton();
        let spine = graph.find("Armature/Hips/Spine").unwrap();
        let head = graph.find("Armature/Hips/Spine/Head").unwrap();

        graph.remove(spine).unwrap();
        assert!(!graph.contains(spine));
        assert!(!graph.contains(head));
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_clone_preserves_identities() {
        let graph = skeleton();
        let head = graph.find("Armature/Hips/Spine/Head").unwrap();
        let copy = graph.clone();
        assert_eq!(copy.path_of(head), graph.path_of(head));
        assert_eq!(copy.fingerprint().unwrap(), graph.fingerprint().unwrap());
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let mut graph = skeleton();
        let before = graph.fingerprint().unwrap();
        graph.translate(Vec3::Z);
        assert_ne!(graph.fingerprint().unwrap(), before);
    }
}

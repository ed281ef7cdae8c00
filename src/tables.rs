//! Mapping tables shared by the passes of a single run.
//!
//! Structural passes record here what they did to bone identities and
//! hierarchy paths, so later passes can resolve references that were
//! authored against the graph as it looked before the run.

use std::collections::BTreeMap;

use crate::scene::NodeId;

/// Original bone identity to replacement identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoneRemap {
    map: BTreeMap<NodeId, NodeId>,
}

impl BoneRemap {
    pub fn insert(&mut self, from: NodeId, to: NodeId) {
        if from != to {
            self.map.insert(from, to);
        }
    }

    /// Follows remaps until reaching an identity that was not replaced.
    pub fn resolve(&self, id: NodeId) -> NodeId {
        let mut current = id;
        // a chain can't be longer than the table, anything longer is a cycle
        for _ in 0..=self.map.len() {
            match self.map.get(&current) {
                Some(&next) => current = next,
                None => return current,
            }
        }
        tracing::warn!(?id, "bone remap contains a cycle");
        current
    }

    pub fn get(&self, id: NodeId) -> Option<NodeId> {
        self.map.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// Original hierarchy path to the path the node lives at now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathRemap {
    map: BTreeMap<String, String>,
}

impl PathRemap {
    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let (from, to) = (from.into(), to.into());
        if from != to {
            self.map.insert(from, to);
        }
    }

    /// Follows remaps until reaching a path that was not moved.
    pub fn resolve<'a>(&'a self, path: &'a str) -> &'a str {
        let mut current = path;
        for _ in 0..=self.map.len() {
            match self.map.get(current) {
                Some(next) => current = next.as_str(),
                None => return current,
            }
        }
        tracing::warn!(path, "path remap contains a cycle");
        current
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.map.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// Both tables, reset at the start of every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTables {
    pub bones: BoneRemap,
    pub paths: PathRemap,
}

impl MappingTables {
    pub fn reset(&mut self) {
        self.bones.clear();
        self.paths.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty() && self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bone_chain() {
        let mut bones = BoneRemap::default();
        let (a, b, c) = (NodeId::new(1), NodeId::new(2), NodeId::new(3));
        bones.insert(a, b);
        bones.insert(b, c);

        assert_eq!(bones.resolve(a), c);
        assert_eq!(bones.resolve(c), c);
        assert_eq!(bones.get(a), Some(b));
    }

    #[test]
    fn test_bone_cycle_terminates() {
        let mut bones = BoneRemap::default();
        let (a, b) = (NodeId::new(1), NodeId::new(2));
        bones.insert(a, b);
        bones.insert(b, a);

        let resolved = bones.resolve(a);
        assert!(resolved == a || resolved == b);
    }

    #[test]
    fn test_identity_insert_ignored() {
        let mut paths = PathRemap::default();
        paths.insert("Armature", "Armature");
        assert!(paths.is_empty());
    }

    #[test]
    fn test_path_chain() {
        let mut paths = PathRemap::default();
        paths.insert("Outfit/Hips/Hat", "Armature/Hips/Hat");
        paths.insert("Armature/Hips/Hat", "Armature/Hips/Head/Hat");

        assert_eq!(paths.resolve("Outfit/Hips/Hat"), "Armature/Hips/Head/Hat");
        assert_eq!(paths.resolve("Body"), "Body");
    }

    #[test]
    fn test_reset_clears_both() {
        let mut tables = MappingTables::default();
        tables.bones.insert(NodeId::new(0), NodeId::new(1));
        tables.paths.insert("a", "b");
        assert!(!tables.is_empty());

        tables.reset();
        assert!(tables.is_empty());
    }
}

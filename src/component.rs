//! Components attached to scene nodes.
//!
//! These are the behaviours the passes read and rewrite: the avatar
//! descriptor on the root, skinned meshes bound to bones, constraints, and
//! the transient [`Marker`]s that opt nodes into a pass.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::marker::Marker;
use crate::scene::NodeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Component {
    Descriptor(AvatarDescriptor),
    SkinnedMesh(SkinnedMesh),
    ParentConstraint(ParentConstraint),
    Marker(Marker),
}

impl Component {
    pub fn is_marker(&self) -> bool {
        matches!(self, Component::Marker(_))
    }

    pub fn as_marker(&self) -> Option<&Marker> {
        match self {
            Component::Marker(marker) => Some(marker),
            _ => None,
        }
    }
}

impl From<AvatarDescriptor> for Component {
    fn from(value: AvatarDescriptor) -> Self {
        Component::Descriptor(value)
    }
}

impl From<SkinnedMesh> for Component {
    fn from(value: SkinnedMesh) -> Self {
        Component::SkinnedMesh(value)
    }
}

impl From<ParentConstraint> for Component {
    fn from(value: ParentConstraint) -> Self {
        Component::ParentConstraint(value)
    }
}

impl From<Marker> for Component {
    fn from(value: Marker) -> Self {
        Component::Marker(value)
    }
}

/// The component that makes a root node an avatar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvatarDescriptor {
    /// Head bone, used by head-attached accessory processing.
    pub head: Option<NodeId>,
    /// Playable layers, at most one controller per kind.
    pub layers: Vec<PlayableLayer>,
    /// Root expression menu.
    pub menu: Menu,
    /// Expression parameters.
    pub parameters: Vec<Parameter>,
}

impl AvatarDescriptor {
    pub fn layer(&self, kind: LayerKind) -> Option<&AnimatorController> {
        self.layers
            .iter()
            .find(|layer| layer.kind == kind)
            .map(|layer| &layer.controller)
    }

    /// Returns the controller for `kind`, creating an empty one if missing.
    pub fn layer_mut(&mut self, kind: LayerKind) -> &mut AnimatorController {
        let index = match self.layers.iter().position(|layer| layer.kind == kind) {
            Some(index) => index,
            None => {
                self.layers.push(PlayableLayer {
                    kind,
                    controller: AnimatorController::new(format!("{kind} (merged)")),
                });
                self.layers.len() - 1
            }
        };

        &mut self.layers[index].controller
    }

    pub fn controllers_mut(&mut self) -> impl Iterator<Item = &mut AnimatorController> {
        self.layers.iter_mut().map(|layer| &mut layer.controller)
    }

    /// Adds a parameter unless one with the same name is already registered.
    pub fn register_parameter(&mut self, parameter: Parameter) -> bool {
        if self.parameters.iter().any(|p| p.name == parameter.name) {
            return false;
        }
        self.parameters.push(parameter);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayableLayer {
    pub kind: LayerKind,
    pub controller: AnimatorController,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Base,
    Additive,
    Gesture,
    Action,
    Fx,
}

impl Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LayerKind::Base => "Base",
            LayerKind::Additive => "Additive",
            LayerKind::Gesture => "Gesture",
            LayerKind::Action => "Action",
            LayerKind::Fx => "FX",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimatorController {
    pub name: String,
    pub parameters: Vec<String>,
    pub layers: Vec<AnimatorLayer>,
}

impl AnimatorController {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn curves(&self) -> impl Iterator<Item = &Curve> {
        self.layers
            .iter()
            .flat_map(|layer| &layer.clips)
            .flat_map(|clip| &clip.curves)
    }

    pub fn curves_mut(&mut self) -> impl Iterator<Item = &mut Curve> {
        self.layers
            .iter_mut()
            .flat_map(|layer| &mut layer.clips)
            .flat_map(|clip| &mut clip.curves)
    }

    pub fn clips_mut(&mut self) -> impl Iterator<Item = &mut AnimationClip> {
        self.layers.iter_mut().flat_map(|layer| &mut layer.clips)
    }

    pub fn rename_parameter(&mut self, from: &str, to: &str) {
        for name in &mut self.parameters {
            if name == from {
                *name = to.to_string();
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimatorLayer {
    pub name: String,
    pub clips: Vec<AnimationClip>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimationClip {
    pub name: String,
    pub curves: Vec<Curve>,
}

/// A single animated property, addressed by hierarchy path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    /// Hierarchy path relative to the avatar root.
    pub path: String,
    /// Animated property, e.g. `blendShape.Smile`.
    pub property: String,
    pub keys: Vec<Keyframe>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    pub items: Vec<MenuItem>,
}

impl Menu {
    /// Walks `path` (`/`-separated submenu names), creating missing submenus.
    pub fn submenu_mut(&mut self, path: &str) -> &mut Menu {
        let mut menu = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let index = match menu.items.iter().position(|item| item.name == segment) {
                Some(index) => index,
                None => {
                    menu.items.push(MenuItem::submenu(segment, Menu::default()));
                    menu.items.len() - 1
                }
            };
            menu = menu.items[index].submenu.get_or_insert_with(Menu::default);
        }
        menu
    }

    pub fn rename_parameter(&mut self, from: &str, to: &str) {
        for item in &mut self.items {
            if item.parameter.as_deref() == Some(from) {
                item.parameter = Some(to.to_string());
            }
            if let Some(submenu) = &mut item.submenu {
                submenu.rename_parameter(from, to);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub name: String,
    pub parameter: Option<String>,
    pub value: f32,
    pub submenu: Option<Menu>,
}

impl MenuItem {
    pub fn toggle(name: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter: Some(parameter.into()),
            value: 1.0,
            submenu: None,
        }
    }

    pub fn submenu(name: impl Into<String>, menu: Menu) -> Self {
        Self {
            name: name.into(),
            parameter: None,
            value: 0.0,
            submenu: Some(menu),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    pub default: f32,
    pub saved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    Int,
    Float,
    Bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkinnedMesh {
    pub root_bone: Option<NodeId>,
    pub bones: Vec<NodeId>,
    pub blendshapes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParentConstraint {
    pub source: NodeId,
}

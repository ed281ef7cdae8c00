#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod assets;
mod component;
mod core;
mod error;
mod host;
#[cfg(feature = "logging")]
mod logging;
mod marker;
mod pass;
mod processor;
mod scene;
mod tables;

pub use crate::assets::{AVATAR_EXTENSION, AssetStore, DEFAULT_GENERATED_DIR, DEFAULT_OUTPUT_DIR};
pub use crate::component::{
    AnimationClip, AnimatorController, AnimatorLayer, AvatarDescriptor, Component, Curve,
    Keyframe, LayerKind, Menu, MenuItem, Parameter, ParameterKind, ParentConstraint,
    PlayableLayer, SkinnedMesh,
};
pub use crate::error::*;
pub use crate::host::{
    AppliedAvatar, AvatarBuildCallback, BuildHost, CALLBACK_ORDER, PlayModeChange, ScopedOutput,
};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::marker::{
    BlendshapeBinding, BlendshapeSync, BoneProxy, Marker, MarkerScope, MenuInstaller,
    MergeAnimator, MergeArmature, ParameterConfig, ParameterEntry, PathMode,
};
pub use crate::pass::{BuildContext, Pass};
pub use crate::processor::{
    AvatarProcessor, AvatarStats, Config, Diagnostics, FeatureValidator, Hook, HookCallback,
    LogValidator, PassExecution,
};
pub use crate::scene::{Node, NodeId, SceneGraph};
pub use crate::tables::{BoneRemap, MappingTables, PathRemap};

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::pass::Pass;
use crate::scene::{NodeId, SceneGraph};

/// Result returned by pass bodies and subscriber hooks.
pub type PassResult<T = ()> = anyhow::Result<T, anyhow::Error>;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Node {0:?} does not exist in the scene graph")]
    Missing(NodeId),

    #[error("The root node cannot be moved or removed")]
    Root,

    #[error("Node {node:?} cannot be moved under its own descendant {parent:?}")]
    Cycle { node: NodeId, parent: NodeId },
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Couldn't access asset on disk.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't encode asset.\n{0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("Couldn't decode asset.\n{0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("Asset name '{0}' has no file stem")]
    InvalidName(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pass '{0}':\n{1}")]
    Pass(Pass, anyhow::Error),

    #[error("Hook:\n{0}")]
    Hook(anyhow::Error),

    #[error(transparent)]
    Asset(#[from] AssetError),
}

impl PipelineError {
    /// The pass that failed, if the failure came from a pass.
    pub fn pass(&self) -> Option<Pass> {
        match self {
            PipelineError::Pass(pass, _) => Some(*pass),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error("Error while processing the copy at '{output}':\n{source}")]
    Process {
        output: Utf8PathBuf,
        /// The duplicate, possibly partially processed. The original is never touched.
        avatar: Box<SceneGraph>,
        source: PipelineError,
    },
}

#[derive(Debug, Error)]
#[error("Build aborted by callback '{0}'")]
pub struct BuildAborted(pub String);

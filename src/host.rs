//! Entry points the host editor calls.
//!
//! The host runs registered build callbacks around every avatar build and
//! delivers play mode transitions. Manual processing of the selected avatar
//! goes through [`AvatarProcessor::apply_to_current_avatar`].

use std::ops::{Deref, DerefMut};
use std::time::Instant;

use camino::Utf8PathBuf;

use crate::core::as_overhead;
use crate::error::{ApplyError, BuildAborted};
use crate::processor::AvatarProcessor;
use crate::scene::SceneGraph;

/// Preprocess priority of the processor. Runs before nearly every other callback.
pub const CALLBACK_ORDER: i32 = -9000;

/// A callback taking part in the host's avatar build.
pub trait AvatarBuildCallback {
    /// Lower values run earlier.
    fn callback_order(&self) -> i32;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Returns `false` to abort the build.
    fn on_preprocess_avatar(&mut self, avatar: &mut SceneGraph) -> bool;

    /// Runs after every build attempt, successful or not.
    fn on_postprocess_avatar(&mut self);
}

impl AvatarBuildCallback for AvatarProcessor {
    fn callback_order(&self) -> i32 {
        CALLBACK_ORDER
    }

    fn name(&self) -> &str {
        "rigweave"
    }

    fn on_preprocess_avatar(&mut self, avatar: &mut SceneGraph) -> bool {
        // A panicking pass or subscriber must abort the build like any other
        // error. Markers are stripped by the scope guard while unwinding.
        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.process_avatar(avatar).map_err(anyhow::Error::from)
        })) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("Processing panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("Processing panicked: {s}")
                } else {
                    String::from("Processing panicked with unknown payload")
                };

                Err(anyhow::anyhow!(msg))
            }
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("Error processing avatar '{}':\n{err}", avatar.name());
                false
            }
        }
    }

    fn on_postprocess_avatar(&mut self) {
        if let Err(err) = self.assets.delete_temporary_assets() {
            tracing::error!("Error deleting temporary assets:\n{err}");
        }
    }
}

/// Minimal build driver with the host's callback semantics.
///
/// Preprocess callbacks run in ascending order and the first one returning
/// `false` aborts the build. Postprocess callbacks run regardless.
#[derive(Default)]
pub struct BuildHost<'a> {
    callbacks: Vec<&'a mut dyn AvatarBuildCallback>,
}

impl<'a> BuildHost<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, callback: &'a mut dyn AvatarBuildCallback) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn build(&mut self, avatar: &mut SceneGraph) -> Result<(), BuildAborted> {
        self.callbacks.sort_by_key(|callback| callback.callback_order());

        let mut aborted = None;
        for callback in &mut self.callbacks {
            if !callback.on_preprocess_avatar(avatar) {
                aborted = Some(callback.name().to_string());
                break;
            }
        }

        for callback in &mut self.callbacks {
            callback.on_postprocess_avatar();
        }

        match aborted {
            Some(name) => Err(BuildAborted(name)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayModeChange {
    EnteredEditMode,
    ExitingEditMode,
    EnteredPlayMode,
    ExitingPlayMode,
}

/// Output override installed for the lifetime of the guard.
///
/// Generated assets land in the override directory and are kept. The
/// override is released when the guard drops, on every exit path.
pub struct ScopedOutput<'a> {
    processor: &'a mut AvatarProcessor,
}

impl<'a> ScopedOutput<'a> {
    pub fn install(processor: &'a mut AvatarProcessor, path: Utf8PathBuf) -> Self {
        processor.assets.install_override(path);
        Self { processor }
    }
}

impl Deref for ScopedOutput<'_> {
    type Target = AvatarProcessor;

    fn deref(&self) -> &Self::Target {
        self.processor
    }
}

impl DerefMut for ScopedOutput<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.processor
    }
}

impl Drop for ScopedOutput<'_> {
    fn drop(&mut self) {
        self.processor.assets.clear_override();
    }
}

/// A processed duplicate written by a manual apply.
#[derive(Debug)]
pub struct AppliedAvatar {
    /// Output directory allocated for this apply.
    pub output: Utf8PathBuf,
    /// The persisted duplicate, inside `output`.
    pub asset: Utf8PathBuf,
    pub avatar: SceneGraph,
}

impl AvatarProcessor {
    /// Processes a copy of the selected avatar and persists it.
    ///
    /// Returns `Ok(None)` when nothing is selected or the selection is not an
    /// avatar. The selection itself is never modified.
    pub fn apply_to_current_avatar(
        &mut self,
        selection: Option<&SceneGraph>,
    ) -> Result<Option<AppliedAvatar>, ApplyError> {
        let Some(original) = selection else {
            return Ok(None);
        };
        if original.descriptor().is_none() {
            tracing::warn!(avatar = original.name(), "selection is not an avatar");
            return Ok(None);
        }

        let s = Instant::now();
        let output = self.assets.allocate_output_path(original.name());

        let mut avatar = original.clone();
        avatar.translate(self.duplicate_offset);

        let result = ScopedOutput::install(self, output.clone()).process_avatar(&mut avatar);
        if let Err(source) = result {
            return Err(ApplyError::Process {
                output,
                avatar: Box::new(avatar),
                source,
            });
        }

        let asset = self.assets.save_avatar(&output, &avatar)?;
        tracing::info!("Applied avatar to {asset} {}", as_overhead(s));

        Ok(Some(AppliedAvatar {
            output,
            asset,
            avatar,
        }))
    }

    /// Deletes temporary assets once the editor is back in edit mode.
    ///
    /// Covers builds that were aborted before postprocessing ran.
    pub fn on_play_mode_state_changed(&mut self, change: PlayModeChange) {
        if change != PlayModeChange::EnteredEditMode {
            return;
        }

        if let Err(err) = self.assets.delete_temporary_assets() {
            tracing::error!("Error deleting temporary assets:\n{err}");
        }
    }
}

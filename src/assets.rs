//! Assets written to the project while processing an avatar.
//!
//! Passes that need to persist data (merged animator controllers, for
//! instance) go through [`AssetStore::save_generated`]. During a normal
//! build those files are temporary: they are recorded in a set and deleted
//! once the host is done with the build, or the next time the editor goes
//! back to edit mode. During a manual apply an output override is installed
//! and the files land in the output directory instead, where they stay.

use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::Hash32;
use crate::error::AssetError;
use crate::scene::SceneGraph;

pub const DEFAULT_OUTPUT_DIR: &str = "Assets/ModularAvatarOutput";
pub const DEFAULT_GENERATED_DIR: &str = "Assets/999_Generated";

/// Extension used for persisted avatars.
pub const AVATAR_EXTENSION: &str = "avatar";

#[derive(Debug)]
pub struct AssetStore {
    /// Project directory on disk, every other path is relative to it.
    root: Utf8PathBuf,
    output_dir: Utf8PathBuf,
    generated_dir: Utf8PathBuf,
    output_override: Option<Utf8PathBuf>,
    temporary: BTreeSet<Utf8PathBuf>,
}

impl AssetStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            output_dir: DEFAULT_OUTPUT_DIR.into(),
            generated_dir: DEFAULT_GENERATED_DIR.into(),
            output_override: None,
            temporary: BTreeSet::new(),
        }
    }

    pub(crate) fn set_output_dir(&mut self, dir: impl Into<Utf8PathBuf>) {
        self.output_dir = dir.into();
    }

    pub(crate) fn set_generated_dir(&mut self, dir: impl Into<Utf8PathBuf>) {
        self.generated_dir = dir.into();
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Absolute location of a project-relative path.
    pub fn absolute(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }

    pub fn output_override(&self) -> Option<&Utf8Path> {
        self.output_override.as_deref()
    }

    pub(crate) fn install_override(&mut self, path: Utf8PathBuf) {
        self.output_override = Some(path);
    }

    pub(crate) fn clear_override(&mut self) {
        self.output_override = None;
    }

    pub fn temporary_assets(&self) -> impl Iterator<Item = &Utf8Path> {
        self.temporary.iter().map(Utf8PathBuf::as_path)
    }

    /// Picks an output location for `name` that no file or directory occupies.
    ///
    /// Tries `<output>/<name>` first, then `<output>/<name> 1`,
    /// `<output>/<name> 2`, and so on.
    pub fn allocate_output_path(&self, name: &str) -> Utf8PathBuf {
        let base = self.output_dir.join(name);
        let mut candidate = base.clone();
        let mut extension = 0;

        while self.absolute(&candidate).exists() {
            extension += 1;
            candidate = Utf8PathBuf::from(format!("{base} {extension}"));
        }

        candidate
    }

    /// Saves `value` as a generated asset and returns its project-relative path.
    ///
    /// The file is named after `name` and its content hash. Without an
    /// override the asset is temporary.
    pub fn save_generated<T>(&mut self, name: &str, value: &T) -> Result<Utf8PathBuf, AssetError>
    where
        T: Serialize,
    {
        let name = Utf8Path::new(name);
        let stem = name
            .file_stem()
            .ok_or_else(|| AssetError::InvalidName(name.to_string()))?;
        let ext = name.extension().unwrap_or("asset");

        let mut buffer = Vec::new();
        ciborium::into_writer(value, &mut buffer)?;
        let hash = Hash32::hash(&buffer).to_hex();

        let (dir, temporary) = match &self.output_override {
            Some(dir) => (dir.clone(), false),
            None => (self.generated_dir.clone(), true),
        };

        let path = dir.join(format!("{stem}-{}.{ext}", &hash[..16]));
        let absolute = self.absolute(&path);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&absolute, &buffer)?;

        if temporary {
            self.temporary.insert(path.clone());
        }

        tracing::debug!(%path, temporary, "saved generated asset");
        Ok(path)
    }

    pub fn load<T>(&self, path: impl AsRef<Utf8Path>) -> Result<T, AssetError>
    where
        T: DeserializeOwned,
    {
        let file = fs::File::open(self.absolute(path))?;
        Ok(ciborium::from_reader(std::io::BufReader::new(file))?)
    }

    /// Persists an avatar as `<dir>/<name>.avatar`.
    pub fn save_avatar(&self, dir: &Utf8Path, avatar: &SceneGraph) -> Result<Utf8PathBuf, AssetError> {
        let path = dir.join(format!("{}.{AVATAR_EXTENSION}", avatar.name()));
        let absolute = self.absolute(&path);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&absolute, avatar.encode()?)?;
        Ok(path)
    }

    /// Deletes every temporary asset, and the generated directory with it.
    ///
    /// Safe to call at any time, including when nothing was generated.
    /// Returns the number of recorded assets that were removed. Assets that
    /// couldn't be removed stay registered for the next attempt.
    pub fn delete_temporary_assets(&mut self) -> Result<usize, AssetError> {
        let mut removed = 0;
        let mut failure = None;

        for path in std::mem::take(&mut self.temporary) {
            match fs::remove_file(self.absolute(&path)) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(%path, "couldn't delete temporary asset");
                    self.temporary.insert(path);
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            return Err(err.into());
        }

        // leftovers from runs that never reached cleanup
        let generated = self.absolute(&self.generated_dir);
        if generated.is_dir() {
            fs::remove_dir_all(&generated)?;
        }

        if removed > 0 {
            tracing::info!(removed, "deleted temporary assets");
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::AnimatorController;
    use tempfile::TempDir;

    fn store() -> (TempDir, AssetStore) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, AssetStore::new(root))
    }

    #[test]
    fn test_allocate_skips_existing_paths() {
        let (_dir, store) = store();
        let output = store.absolute(DEFAULT_OUTPUT_DIR);
        fs::create_dir_all(output.join("Foo")).unwrap();
        fs::write(output.join("Foo 1"), b"").unwrap();

        assert_eq!(
            store.allocate_output_path("Foo"),
            Utf8Path::new("Assets/ModularAvatarOutput/Foo 2")
        );
    }

    #[test]
    fn test_allocate_free_path() {
        let (_dir, store) = store();
        assert_eq!(
            store.allocate_output_path("Bar"),
            Utf8Path::new("Assets/ModularAvatarOutput/Bar")
        );
    }

    #[test]
    fn test_generated_assets_are_temporary() {
        let (_dir, mut store) = store();
        let controller = AnimatorController::new("fx");

        let path = store.save_generated("fx.controller", &controller).unwrap();
        assert!(path.starts_with(DEFAULT_GENERATED_DIR));
        assert_eq!(path.extension(), Some("controller"));
        assert!(store.absolute(&path).exists());

        let loaded: AnimatorController = store.load(&path).unwrap();
        assert_eq!(loaded, controller);

        assert_eq!(store.delete_temporary_assets().unwrap(), 1);
        assert!(!store.absolute(&path).exists());
        assert!(!store.absolute(DEFAULT_GENERATED_DIR).exists());
    }

    #[test]
    fn test_override_assets_persist() {
        let (_dir, mut store) = store();
        store.install_override("Assets/ModularAvatarOutput/Foo".into());

        let path = store
            .save_generated("fx.controller", &AnimatorController::new("fx"))
            .unwrap();
        store.clear_override();

        assert!(path.starts_with("Assets/ModularAvatarOutput/Foo"));
        assert_eq!(store.temporary_assets().count(), 0);
        assert_eq!(store.delete_temporary_assets().unwrap(), 0);
        assert!(store.absolute(&path).exists());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, mut store) = store();
        assert_eq!(store.delete_temporary_assets().unwrap(), 0);
        assert_eq!(store.delete_temporary_assets().unwrap(), 0);
    }

    #[test]
    fn test_failed_delete_keeps_remaining_assets_registered() {
        let (_dir, mut store) = store();
        let stuck = store
            .save_generated("fx.controller", &AnimatorController::new("fx"))
            .unwrap();
        let other = store
            .save_generated("gesture.controller", &AnimatorController::new("gesture"))
            .unwrap();

        // a directory in place of the file makes removal fail
        fs::remove_file(store.absolute(&stuck)).unwrap();
        fs::create_dir(store.absolute(&stuck)).unwrap();

        assert!(store.delete_temporary_assets().is_err());
        assert!(!store.absolute(&other).exists());
        let left: Vec<_> = store.temporary_assets().collect();
        assert_eq!(left, [stuck.as_path()]);
        assert!(store.absolute(DEFAULT_GENERATED_DIR).exists());

        fs::remove_dir(store.absolute(&stuck)).unwrap();
        assert_eq!(store.delete_temporary_assets().unwrap(), 0);
        assert_eq!(store.temporary_assets().count(), 0);
        assert!(!store.absolute(DEFAULT_GENERATED_DIR).exists());
    }

    #[test]
    fn test_delete_clears_stale_generated_dir() {
        let (_dir, mut store) = store();
        let stale = store.absolute(DEFAULT_GENERATED_DIR).join("orphan.controller");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"").unwrap();

        assert_eq!(store.delete_temporary_assets().unwrap(), 0);
        assert!(!stale.exists());
    }
}

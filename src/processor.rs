//! The pipeline orchestrator.
//!
//! [`AvatarProcessor::process_avatar`] runs every pass of [`Pass::ORDER`]
//! against one avatar. A run always starts from empty mapping tables and
//! always ends with zero markers in the graph. Subscribers and the host
//! validator are only reached when every pass succeeded.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use glam::Vec3;
use indicatif::ProgressStyle;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::assets::{AssetStore, DEFAULT_GENERATED_DIR, DEFAULT_OUTPUT_DIR};
use crate::component::{Component, Menu};
use crate::core::{Hash32, as_overhead};
use crate::error::{PassResult, PipelineError};
use crate::marker::MarkerScope;
use crate::pass::{BuildContext, Pass};
use crate::scene::SceneGraph;
use crate::tables::MappingTables;

/// Type of the callback stored in [`Hook::AfterProcessing`].
pub type HookCallback = Box<dyn Fn(&SceneGraph) -> PassResult + Send + Sync>;

/// Subscribers notified by the processor.
pub enum Hook {
    /// Fired once per successful run, after marker cleanup and before the
    /// host validator is re-invoked.
    AfterProcessing(HookCallback),
}

impl Hook {
    /// Creates a new `AfterProcessing` hook from the given callback.
    ///
    /// The callback receives the processed avatar. Returning an error fails
    /// the run with [`PipelineError::Hook`], and the validator is skipped.
    pub fn after_processing<F>(fun: F) -> Self
    where
        F: Fn(&SceneGraph) -> PassResult + Send + Sync + 'static,
    {
        Hook::AfterProcessing(Box::new(fun))
    }
}

impl Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hook::AfterProcessing(_) => write!(f, "Hook::AfterProcessing(*)"),
        }
    }
}

/// Build statistics handed to the host validator after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvatarStats {
    pub nodes: usize,
    pub skinned_meshes: usize,
    /// Distinct bones referenced by skinned meshes.
    pub bones: usize,
    pub constraints: usize,
    pub animator_layers: usize,
    pub parameters: usize,
    pub menu_controls: usize,
}

impl AvatarStats {
    pub fn collect(avatar: &SceneGraph) -> Self {
        let mut stats = AvatarStats {
            nodes: avatar.len(),
            ..Default::default()
        };
        let mut bones = BTreeSet::new();

        for (_, node) in avatar.iter() {
            for component in &node.components {
                match component {
                    Component::SkinnedMesh(mesh) => {
                        stats.skinned_meshes += 1;
                        bones.extend(mesh.bones.iter().copied());
                        bones.extend(mesh.root_bone);
                    }
                    Component::ParentConstraint(_) => stats.constraints += 1,
                    Component::Descriptor(_) | Component::Marker(_) => {}
                }
            }
        }
        stats.bones = bones.len();

        if let Some(descriptor) = avatar.descriptor() {
            stats.animator_layers = descriptor
                .layers
                .iter()
                .map(|layer| layer.controller.layers.len())
                .sum();
            stats.parameters = descriptor.parameters.len();
            stats.menu_controls = count_controls(&descriptor.menu);
        }

        stats
    }
}

fn count_controls(menu: &Menu) -> usize {
    menu.items
        .iter()
        .map(|item| 1 + item.submenu.as_ref().map_or(0, count_controls))
        .sum()
}

/// The host's feature validation and statistics routine.
///
/// The host captures build statistics before preprocessing callbacks run, so
/// the processor hands it the processed avatar once more after every
/// successful run.
pub trait FeatureValidator {
    fn validate_features(&mut self, avatar: &SceneGraph, stats: &AvatarStats);
}

impl<F> FeatureValidator for F
where
    F: FnMut(&SceneGraph, &AvatarStats),
{
    fn validate_features(&mut self, avatar: &SceneGraph, stats: &AvatarStats) {
        self(avatar, stats)
    }
}

/// Validator used when the host doesn't supply one, it only logs the stats.
#[derive(Debug, Default)]
pub struct LogValidator;

impl FeatureValidator for LogValidator {
    fn validate_features(&mut self, avatar: &SceneGraph, stats: &AvatarStats) {
        tracing::info!(
            avatar = avatar.name(),
            nodes = stats.nodes,
            meshes = stats.skinned_meshes,
            bones = stats.bones,
            parameters = stats.parameters,
            "refreshed avatar statistics"
        );
    }
}

#[derive(Debug, Clone)]
pub struct PassExecution {
    pub pass: Pass,
    pub start: Instant,
    pub duration: Duration,
}

/// What happened during the last run.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Passes in the order they ran, including the one that failed.
    pub executions: Vec<PassExecution>,
    pub failed: Option<Pass>,
    /// Whether the run changed the avatar at all. Only known after success.
    pub changed: bool,
    pub stats: Option<AvatarStats>,
}

impl Diagnostics {
    pub fn order(&self) -> Vec<Pass> {
        self.executions.iter().map(|exec| exec.pass).collect()
    }
}

/// A builder struct for creating an [`AvatarProcessor`] with specified settings.
pub struct Config {
    root: Utf8PathBuf,
    output_dir: Utf8PathBuf,
    generated_dir: Utf8PathBuf,
    duplicate_offset: Vec3,
    hooks: Vec<Hook>,
    validator: Box<dyn FeatureValidator>,
}

impl Config {
    fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            output_dir: DEFAULT_OUTPUT_DIR.into(),
            generated_dir: DEFAULT_GENERATED_DIR.into(),
            duplicate_offset: Vec3::new(0.0, 0.0, 2.0),
            hooks: Vec::new(),
            validator: Box::new(LogValidator),
        }
    }

    /// Project-relative directory manual applies are written to.
    pub fn output_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Project-relative directory temporary generated assets are written to.
    pub fn generated_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.generated_dir = dir.into();
        self
    }

    /// How far a manually applied duplicate is moved away from its original.
    pub fn duplicate_offset(mut self, offset: Vec3) -> Self {
        self.duplicate_offset = offset;
        self
    }

    pub fn add_hook(mut self, hook: Hook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn validator(mut self, validator: impl FeatureValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn finish(self) -> AvatarProcessor {
        let mut assets = AssetStore::new(self.root);
        assets.set_output_dir(self.output_dir);
        assets.set_generated_dir(self.generated_dir);

        AvatarProcessor {
            tables: MappingTables::default(),
            assets,
            hooks: self.hooks,
            validator: self.validator,
            duplicate_offset: self.duplicate_offset,
            diagnostics: Diagnostics::default(),
        }
    }
}

/// Runs the ordered rewrite passes over avatars.
///
/// Owns everything that outlives a single pass: the mapping tables (reset
/// at the start of every run), the asset store with its temporary asset
/// set, and the subscribers.
pub struct AvatarProcessor {
    tables: MappingTables,
    pub(crate) assets: AssetStore,
    hooks: Vec<Hook>,
    validator: Box<dyn FeatureValidator>,
    pub(crate) duplicate_offset: Vec3,
    diagnostics: Diagnostics,
}

impl AvatarProcessor {
    pub fn config(root: impl Into<Utf8PathBuf>) -> Config {
        Config::new(root.into())
    }

    /// A processor with the default configuration.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self::config(root).finish()
    }

    /// Mapping tables as the last run left them.
    pub fn tables(&self) -> &MappingTables {
        &self.tables
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut AssetStore {
        &mut self.assets
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Runs every pass against `avatar`, in place.
    ///
    /// This will:
    /// 1. Reset the mapping tables.
    /// 2. Run the passes in order, stopping at the first failure.
    /// 3. Strip every marker from the graph, whatever happened in 2.
    /// 4. On success, notify subscribers and re-invoke the host validator.
    pub fn process_avatar(&mut self, avatar: &mut SceneGraph) -> Result<(), PipelineError> {
        let s = Instant::now();

        self.tables.reset();
        self.diagnostics = Diagnostics::default();

        let name = avatar.name().to_string();
        let root_span = tracing::span!(Level::INFO, "process_avatar", avatar = %name);
        root_span.pb_set_length(Pass::ORDER.len() as u64);
        root_span.pb_set_style(&progress_style());
        root_span.pb_set_message(&format!("Processing {name}"));
        let _enter = root_span.enter();

        let before = self.run_passes(avatar, &root_span)?;

        for hook in &self.hooks {
            match hook {
                Hook::AfterProcessing(callback) => callback(avatar).map_err(PipelineError::Hook)?,
            }
        }

        let stats = AvatarStats::collect(avatar);
        self.validator.validate_features(avatar, &stats);

        self.diagnostics.changed = avatar.fingerprint()? != before;
        self.diagnostics.stats = Some(stats);

        tracing::info!("Processed avatar {name} {}", as_overhead(s));
        Ok(())
    }

    fn run_passes(
        &mut self,
        avatar: &mut SceneGraph,
        root_span: &tracing::Span,
    ) -> Result<Hash32, PipelineError> {
        // dropped on every return below, taking all markers with it
        let mut scope = MarkerScope::acquire(avatar);
        let before = scope.fingerprint()?;
        let mut ctx = BuildContext::new(&mut self.tables, &mut self.assets);

        for pass in Pass::ORDER {
            let span = tracing::span!(Level::INFO, "pass", name = pass.name());
            let _enter = span.enter();

            let start = Instant::now();
            let result = pass.run(&mut scope, &mut ctx);
            self.diagnostics.executions.push(PassExecution {
                pass,
                start,
                duration: start.elapsed(),
            });
            root_span.pb_inc(1);

            if let Err(err) = result {
                tracing::error!(pass = pass.name(), "pass failed, aborting run");
                self.diagnostics.failed = Some(pass);
                return Err(PipelineError::Pass(pass, err));
            }
        }

        Ok(before)
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::component::{
        AnimationClip, AnimatorController, AnimatorLayer, AvatarDescriptor, Curve, LayerKind,
        ParameterKind, SkinnedMesh,
    };
    use crate::marker::{
        BoneProxy, Marker, MergeAnimator, MergeArmature, ParameterConfig, ParameterEntry, PathMode,
    };
    use crate::scene::Node;
    use crate::scene::tests::skeleton;
    use tempfile::TempDir;

    /// Skeleton avatar wearing an outfit that exercises most passes:
    ///
    /// ```text
    /// Root            descriptor, head = Head
    /// ├── Armature/Hips/{Spine/Head, LeftLeg}
    /// └── Outfit      Parameters, MergeAnimator
    ///     ├── Armature                MergeArmature -> "Armature"
    ///     │   └── Hips/Spine/Head/Hat VisibleHeadAccessory
    ///     ├── Body    skinned to the outfit bones
    ///     └── Badge   BoneProxy -> "Outfit/Armature/Hips"
    /// ```
    pub(crate) fn dressed_avatar() -> SceneGraph {
        let mut graph = skeleton();
        let root = graph.root();
        let head = graph.find("Armature/Hips/Spine/Head").unwrap();
        graph.node_mut(root).unwrap().components.push(
            AvatarDescriptor {
                head: Some(head),
                ..Default::default()
            }
            .into(),
        );

        let mut hat = ParameterEntry::new("hat", ParameterKind::Bool);
        hat.remap_to = Some("outfit/hat".into());
        let controller = AnimatorController {
            name: "outfit".into(),
            parameters: vec!["hat".into()],
            layers: vec![AnimatorLayer {
                name: "hat".into(),
                clips: vec![AnimationClip {
                    name: "hat on".into(),
                    curves: vec![Curve {
                        path: "Armature/Hips/Spine/Head/Hat".into(),
                        property: "m_IsActive".into(),
                        keys: vec![],
                    }],
                }],
            }],
        };
        let outfit = graph
            .add_child(
                root,
                Node::new("Outfit")
                    .with(Marker::Parameters(ParameterConfig { entries: vec![hat] }))
                    .with(Marker::MergeAnimator(MergeAnimator {
                        controller,
                        layer: LayerKind::Fx,
                        path_mode: PathMode::Relative,
                    })),
            )
            .unwrap();

        let armature = graph
            .add_child(
                outfit,
                Node::new("Armature").with(Marker::MergeArmature(MergeArmature {
                    merge_target: "Armature".into(),
                    ..Default::default()
                })),
            )
            .unwrap();
        let hips = graph.add_child(armature, Node::new("Hips")).unwrap();
        let spine = graph.add_child(hips, Node::new("Spine")).unwrap();
        let outfit_head = graph.add_child(spine, Node::new("Head")).unwrap();
        graph
            .add_child(outfit_head, Node::new("Hat").with(Marker::VisibleHeadAccessory))
            .unwrap();

        graph
            .add_child(
                outfit,
                Node::new("Body").with(SkinnedMesh {
                    root_bone: Some(hips),
                    bones: vec![hips, spine],
                    blendshapes: vec![],
                }),
            )
            .unwrap();
        graph
            .add_child(
                outfit,
                Node::new("Badge").with(Marker::BoneProxy(BoneProxy {
                    target: "Outfit/Armature/Hips".into(),
                    keep_position: false,
                })),
            )
            .unwrap();

        graph
    }

    fn processor(dir: &TempDir) -> Config {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        AvatarProcessor::config(root)
    }

    #[test]
    fn test_passes_run_in_fixed_order() {
        let dir = TempDir::new().unwrap();
        let mut processor = processor(&dir).finish();
        let mut graph = dressed_avatar();

        processor.process_avatar(&mut graph).unwrap();

        assert_eq!(processor.diagnostics().order(), Pass::ORDER);
        assert_eq!(processor.diagnostics().failed, None);
    }

    #[test]
    fn test_full_run_rewrites_avatar() {
        let dir = TempDir::new().unwrap();
        let mut processor = processor(&dir).finish();
        let mut graph = dressed_avatar();

        processor.process_avatar(&mut graph).unwrap();

        assert_eq!(graph.marker_count(), 0);
        assert!(graph.find("Outfit/Armature").is_none());
        assert!(graph.find("Armature/Hips/Spine/HeadChop/Hat").is_some());
        assert!(graph.find("Armature/Hips/Badge").is_some());

        let hips = graph.find("Armature/Hips").unwrap();
        let spine = graph.find("Armature/Hips/Spine").unwrap();
        let body = graph.find("Outfit/Body").unwrap();
        let Some(Component::SkinnedMesh(mesh)) = graph.node(body).unwrap().components.first() else {
            panic!("mesh component missing");
        };
        assert_eq!(mesh.bones, vec![hips, spine]);

        let descriptor = graph.descriptor().unwrap();
        assert_eq!(descriptor.parameters[0].name, "outfit/hat");
        let fx = descriptor.layer(LayerKind::Fx).unwrap();
        assert_eq!(fx.parameters, ["outfit/hat"]);
        let paths: Vec<_> = fx.curves().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, ["Armature/Hips/Spine/HeadChop/Hat"]);

        assert_eq!(processor.assets().temporary_assets().count(), 1);
        assert!(processor.diagnostics().changed);
    }

    #[test]
    fn test_tables_reset_at_run_start() {
        let dir = TempDir::new().unwrap();
        let mut processor = processor(&dir).finish();
        processor.tables.paths.insert("Stale", "Leftover");
        processor
            .tables
            .bones
            .insert(crate::scene::NodeId::new(1), crate::scene::NodeId::new(2));

        let mut graph = skeleton();
        processor.process_avatar(&mut graph).unwrap();

        assert!(processor.tables().is_empty());
    }

    #[test]
    fn test_failing_pass_stops_sequence_and_strips_markers() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = calls.clone();
        let validated = Arc::new(AtomicUsize::new(0));
        let validator_calls = validated.clone();

        let mut processor = processor(&dir)
            .add_hook(Hook::after_processing(move |_| {
                hook_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .validator(move |_: &SceneGraph, _: &AvatarStats| {
                validator_calls.fetch_add(1, Ordering::SeqCst);
            })
            .finish();

        let mut graph = dressed_avatar();
        let armature = graph.find("Outfit/Armature").unwrap();
        let badge = graph.find("Outfit/Badge").unwrap();
        graph.node_mut(armature).unwrap().components = vec![
            Marker::MergeArmature(MergeArmature {
                merge_target: "Missing".into(),
                ..Default::default()
            })
            .into(),
        ];

        let err = processor.process_avatar(&mut graph).unwrap_err();

        assert_eq!(err.pass(), Some(Pass::MergeArmature));
        assert_eq!(processor.diagnostics().order(), &Pass::ORDER[..3]);
        assert_eq!(processor.diagnostics().failed, Some(Pass::MergeArmature));
        assert_eq!(graph.marker_count(), 0);
        // bone proxy never ran
        assert_eq!(graph.path_of(badge).as_deref(), Some("Outfit/Badge"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(validated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_after_structural_passes_strips_markers() {
        let dir = TempDir::new().unwrap();
        let mut processor = processor(&dir).finish();

        // without a descriptor only the animator merge has nowhere to go
        let mut graph = dressed_avatar();
        let root = graph.root();
        let outfit = graph.find("Outfit").unwrap();
        let hat = graph.find("Outfit/Armature/Hips/Spine/Head/Hat").unwrap();
        graph
            .node_mut(root)
            .unwrap()
            .components
            .retain(|component| !matches!(component, Component::Descriptor(_)));
        graph.node_mut(outfit).unwrap().components.retain(|component| {
            !matches!(component, Component::Marker(Marker::Parameters(_)))
        });
        graph.node_mut(hat).unwrap().components.clear();

        let err = processor.process_avatar(&mut graph).unwrap_err();

        assert_eq!(err.pass(), Some(Pass::MergeAnimator));
        assert_eq!(graph.marker_count(), 0);
        assert_eq!(processor.diagnostics().failed, Some(Pass::MergeAnimator));
        assert_eq!(processor.diagnostics().order(), Pass::ORDER[..7]);
        // structural passes before it still went through
        assert!(graph.find("Armature/Hips/Spine/Head/Hat").is_some());
        assert!(graph.find("Outfit/Armature").is_none());
        assert!(processor.diagnostics().stats.is_none());
    }

    #[test]
    fn test_first_pass_failure_runs_nothing_else() {
        let dir = TempDir::new().unwrap();
        let mut processor = processor(&dir).finish();

        let mut graph = dressed_avatar();
        let root = graph.root();
        graph
            .node_mut(root)
            .unwrap()
            .components
            .retain(|component| !matches!(component, Component::Descriptor(_)));

        let err = processor.process_avatar(&mut graph).unwrap_err();

        assert_eq!(err.pass(), Some(Pass::RenameParameters));
        assert_eq!(graph.marker_count(), 0);
        assert_eq!(processor.diagnostics().order(), Pass::ORDER[..1]);
        // the outfit armature was never merged
        assert!(graph.find("Outfit/Armature/Hips").is_some());
    }

    #[test]
    fn test_second_run_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let mut processor = processor(&dir).finish();
        let mut graph = dressed_avatar();

        processor.process_avatar(&mut graph).unwrap();
        let first = graph.encode().unwrap();

        processor.process_avatar(&mut graph).unwrap();
        assert!(!processor.diagnostics().changed);
        assert_eq!(graph.encode().unwrap(), first);
        assert!(processor.tables().is_empty());
    }

    #[test]
    fn test_hooks_fire_after_cleanup_then_validator() {
        let dir = TempDir::new().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let hook_events = events.clone();
        let validator_events = events.clone();

        let mut processor = processor(&dir)
            .add_hook(Hook::after_processing(move |avatar| {
                assert_eq!(avatar.marker_count(), 0);
                hook_events.lock().unwrap().push("hook");
                Ok(())
            }))
            .validator(move |avatar: &SceneGraph, stats: &AvatarStats| {
                assert_eq!(stats.nodes, avatar.len());
                validator_events.lock().unwrap().push("validate");
            })
            .finish();

        let mut graph = dressed_avatar();
        processor.process_avatar(&mut graph).unwrap();

        assert_eq!(*events.lock().unwrap(), ["hook", "validate"]);
    }

    #[test]
    fn test_hook_error_fails_run() {
        let dir = TempDir::new().unwrap();
        let mut processor = processor(&dir)
            .add_hook(Hook::after_processing(|_| anyhow::bail!("subscriber broke")))
            .finish();

        let mut graph = dressed_avatar();
        let err = processor.process_avatar(&mut graph).unwrap_err();

        assert!(matches!(err, PipelineError::Hook(_)));
        assert_eq!(graph.marker_count(), 0);
        assert!(processor.diagnostics().stats.is_none());
    }

    #[test]
    fn test_stats_collect() {
        let mut graph = dressed_avatar();
        graph
            .descriptor_mut()
            .unwrap()
            .menu
            .submenu_mut("Clothes")
            .items
            .push(crate::component::MenuItem::toggle("Hat", "hat"));

        let stats = AvatarStats::collect(&graph);
        assert_eq!(stats.nodes, graph.len());
        assert_eq!(stats.skinned_meshes, 1);
        assert_eq!(stats.bones, 2);
        assert_eq!(stats.menu_controls, 2);
    }
}

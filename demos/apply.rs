//! Dresses a small avatar, runs it through a simulated host build, then
//! applies it manually to a scratch project.
//!
//! ```text
//! cargo run --example apply --features logging
//! ```

use camino::Utf8PathBuf;
use rigweave::{
    AvatarDescriptor, AvatarProcessor, AvatarStats, BoneProxy, BuildHost, Hook, Marker,
    MergeArmature, Node, PlayModeChange, SceneGraph, SkinnedMesh,
};

fn avatar() -> anyhow::Result<SceneGraph> {
    let mut graph = SceneGraph::new(Node::new("Kitsune"));
    let root = graph.root();

    let armature = graph.add_child(root, Node::new("Armature"))?;
    let hips = graph.add_child(armature, Node::new("Hips"))?;
    let head = graph.add_child(hips, Node::new("Head"))?;

    if let Some(node) = graph.node_mut(root) {
        node.components.push(
            AvatarDescriptor {
                head: Some(head),
                ..Default::default()
            }
            .into(),
        );
    }

    let outfit = graph.add_child(root, Node::new("Jacket"))?;
    let outfit_armature = graph.add_child(
        outfit,
        Node::new("Armature").with(Marker::MergeArmature(MergeArmature {
            merge_target: "Armature".into(),
            prefix: "J_".into(),
            suffix: String::new(),
        })),
    )?;
    let outfit_hips = graph.add_child(outfit_armature, Node::new("J_Hips"))?;
    let outfit_head = graph.add_child(outfit_hips, Node::new("J_Head"))?;
    graph.add_child(outfit_head, Node::new("J_Hood").with(Marker::VisibleHeadAccessory))?;
    graph.add_child(
        outfit,
        Node::new("Jacket_Mesh").with(SkinnedMesh {
            root_bone: Some(outfit_hips),
            bones: vec![outfit_hips],
            blendshapes: vec![],
        }),
    )?;
    graph.add_child(
        root,
        Node::new("Halo").with(Marker::BoneProxy(BoneProxy {
            target: "Armature/Hips/Head".into(),
            keep_position: false,
        })),
    )?;

    Ok(graph)
}

fn main() -> anyhow::Result<()> {
    #[cfg(feature = "logging")]
    rigweave::init_logging()?;

    let project = tempfile::TempDir::new()?;
    let root = Utf8PathBuf::from_path_buf(project.path().to_path_buf())
        .map_err(|path| anyhow::anyhow!("non UTF-8 project path {}", path.display()))?;

    let mut processor = AvatarProcessor::config(root)
        .add_hook(Hook::after_processing(|avatar| {
            println!("processed '{}' into {} nodes", avatar.name(), avatar.len());
            Ok(())
        }))
        .validator(|_: &SceneGraph, stats: &AvatarStats| println!("{stats:?}"))
        .finish();

    let mut built = avatar()?;
    BuildHost::new().register(&mut processor).build(&mut built)?;
    println!("passes: {:?}", processor.diagnostics().order());
    processor.on_play_mode_state_changed(PlayModeChange::EnteredEditMode);

    let selected = avatar()?;
    match processor.apply_to_current_avatar(Some(&selected))? {
        Some(applied) => println!("applied to {}", applied.asset),
        None => println!("selection is not an avatar"),
    }

    Ok(())
}

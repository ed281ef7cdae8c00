use anyhow::Context;

use crate::component::Menu;
use crate::error::PassResult;
use crate::marker::{Marker, MarkerScope};
use crate::pass::{BuildContext, Pass};

/// Controls the host can show on a single menu page.
const MAX_MENU_CONTROLS: usize = 8;

pub(crate) fn process(avatar: &mut MarkerScope<'_>, _: &mut BuildContext<'_>) -> PassResult {
    let mut installers = Vec::new();
    for node in avatar.pending(Pass::MenuInstall) {
        for marker in avatar.markers_of(node, Pass::MenuInstall) {
            if let Marker::MenuInstaller(installer) = marker {
                installers.push(installer);
            }
        }
    }

    if installers.is_empty() {
        return Ok(());
    }

    let descriptor = avatar
        .descriptor_mut()
        .context("avatar root has no descriptor to install menus into")?;

    for installer in installers {
        let target = installer.install_target.as_deref().unwrap_or("");
        let menu = descriptor.menu.submenu_mut(target);
        menu.items.extend(installer.menu.items);
    }

    warn_oversized(&descriptor.menu, "");

    Ok(())
}

fn warn_oversized(menu: &Menu, path: &str) {
    if menu.items.len() > MAX_MENU_CONTROLS {
        let name = if path.is_empty() { "<root>" } else { path };
        tracing::warn!(
            menu = name,
            controls = menu.items.len(),
            "menu has more controls than the host displays"
        );
    }

    for item in &menu.items {
        if let Some(submenu) = &item.submenu {
            warn_oversized(submenu, &crate::pass::join_path(path, &item.name));
        }
    }
}

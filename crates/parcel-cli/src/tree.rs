use nu_ansi_term::Color::{Cyan, Green, LightRed};
use parcel_manifest::{find_packages, PackageNode, Upstream};
use parcel_utils::path::resolve_path;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    error::Result,
    utils::{Colored, Icons},
};

fn short(revision: &str) -> &str {
    let hex = revision.strip_prefix("sha256:").unwrap_or(revision);
    &hex[..hex.len().min(12)]
}

fn upstream_summary(upstream: &Upstream) -> String {
    let mut summary = match upstream {
        Upstream::Git(git) => format!("{}@{}", upstream.source(), git.git_ref),
        Upstream::Oci(_) => upstream.source().to_string(),
    };
    let directory = upstream.directory().trim_matches('/');
    if !directory.is_empty() && directory != "." {
        summary.push_str(&format!(" ({directory})"));
    }
    if let Some(revision) = upstream.resolved() {
        summary.push_str(&format!(" {}", short(revision)));
    }
    summary
}

fn node_line(node: &PackageNode) -> String {
    let path = if node.path.as_os_str().is_empty() {
        ".".to_string()
    } else {
        node.path.display().to_string()
    };
    let upstream = node
        .manifest
        .upstream
        .as_ref()
        .map(|upstream| {
            format!(
                " {} {}",
                Icons::ARROW,
                Colored(LightRed, upstream_summary(upstream))
            )
        })
        .unwrap_or_default();

    format!(
        "{}{} {} {}{}",
        "  ".repeat(node.depth),
        Icons::PACKAGE,
        Colored(Cyan, node.manifest.name()),
        Colored(Green, path),
        upstream
    )
}

pub fn show_tree(dir: &str, json: bool) -> Result<()> {
    let root = resolve_path(dir)?;
    let nodes = find_packages(&root)?;

    if json {
        let packages: Vec<_> = nodes
            .iter()
            .map(|node| {
                json!({
                    "path": node.path,
                    "name": node.manifest.name(),
                    "depth": node.depth,
                    "source": node.manifest.upstream.as_ref().map(Upstream::kind),
                    "upstream": node.manifest.upstream,
                    "subpackages": node.manifest.subpackages.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&packages)?);
        return Ok(());
    }

    if nodes.is_empty() {
        warn!("No packages found in {}", root.display());
        return Ok(());
    }

    for node in &nodes {
        info!("{}", node_line(node));
    }
    Ok(())
}

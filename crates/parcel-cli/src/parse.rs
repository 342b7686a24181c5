use nu_ansi_term::Color::{Blue, Cyan};
use parcel_fetch::default_destination;
use parcel_location::{parse, ImageIdentifier, ParseOptions, Reference};
use serde_json::{Map, Value};
use tracing::info;

use crate::{error::Result, utils::Colored};

/// Field names and values describing `reference`, in display order.
fn describe(reference: &Reference) -> Vec<(&'static str, String)> {
    let mut fields = vec![("kind", reference.kind().to_string())];
    match reference {
        Reference::Dir { directory } => {
            fields.push(("directory", directory.display().to_string()));
        }
        Reference::Git(git) => {
            fields.push(("repo", git.repo.clone()));
            fields.push(("ref", git.git_ref.clone()));
            fields.push(("directory", git.directory.clone()));
        }
        Reference::Oci(oci) => {
            fields.push(("image", oci.image.to_string()));
            fields.push(("registry", oci.image.registry.clone()));
            fields.push(("repository", oci.image.repository.clone()));
            match &oci.image.identifier {
                ImageIdentifier::Tag(tag) => fields.push(("tag", tag.clone())),
                ImageIdentifier::Digest(digest) => fields.push(("digest", digest.clone())),
            }
            fields.push(("directory", oci.directory.clone()));
        }
        Reference::InputStream(_) | Reference::OutputStream(_) | Reference::DuplexStream(_) => {}
    }
    if let Some(dest) = default_destination(reference) {
        fields.push(("destination", dest));
    }
    fields
}

pub fn parse_location(location: &str, stdin: bool, stdout: bool, json: bool) -> Result<()> {
    let mut options = ParseOptions::new();
    if stdin {
        options = options.stdin(std::io::stdin());
    }
    if stdout {
        options = options.stdout(std::io::stdout());
    }

    let reference = parse(location, &options)?;
    let fields = describe(&reference);

    if json {
        let object: Map<String, Value> = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), Value::String(value)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&object)?);
        return Ok(());
    }

    info!("{}", Colored(Cyan, &reference));
    for (key, value) in fields {
        info!("  {}: {}", Colored(Blue, key), value);
    }
    Ok(())
}

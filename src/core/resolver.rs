//! Input resolution: concrete values from config, upstream outputs, and images.
//!
//! For each declared input the sources are tried in order and the first
//! present value wins; then the declared default; otherwise the node cannot
//! run. A `Null` value anywhere counts as absent. Resolution never triggers
//! execution of another node.

use super::config::GlobalConfig;
use super::error::{ImageError, ResolutionError};
use super::image;
use super::types::{FilterValue, ImageFilter, NodeSpec, Outputs, ResolvedInputs, Source, Value};
use crate::backend::ImageCatalog;
use indexmap::IndexMap;
use tracing::debug;

/// Resolve every declared input of a node.
///
/// `upstream` holds the outputs of nodes that have already executed.
pub fn resolve_inputs<C: ImageCatalog + ?Sized>(
    spec: &NodeSpec,
    config: &GlobalConfig,
    upstream: &IndexMap<String, Outputs>,
    images: &C,
) -> Result<ResolvedInputs, ResolutionError> {
    let mut resolved = ResolvedInputs::default();

    for (input, sources) in &spec.inputs {
        let value = first_present(spec, input, sources, config, upstream, images)?;
        let value = match value {
            Some(v) => v,
            None => spec
                .defaults
                .get(input)
                .cloned()
                .ok_or_else(|| ResolutionError::MissingInput {
                    node: spec.name.clone(),
                    input: input.clone(),
                })?,
        };
        resolved.values.insert(input.clone(), value);
    }

    // Defaults without sources are still inputs.
    for (input, default) in &spec.defaults {
        if !resolved.values.contains_key(input) {
            resolved.values.insert(input.clone(), default.clone());
        }
    }

    Ok(resolved)
}

fn first_present<C: ImageCatalog + ?Sized>(
    spec: &NodeSpec,
    input: &str,
    sources: &[Source],
    config: &GlobalConfig,
    upstream: &IndexMap<String, Outputs>,
    images: &C,
) -> Result<Option<Value>, ResolutionError> {
    for source in sources {
        let found = match source {
            Source::Global { key } => config.get(key).cloned(),
            Source::Node { node, key } => {
                let outputs =
                    upstream
                        .get(node)
                        .ok_or_else(|| ResolutionError::UpstreamNotExecuted {
                            node: spec.name.clone(),
                            upstream: node.clone(),
                        })?;
                outputs.get(key).filter(|v| !v.is_null()).cloned()
            }
            Source::LatestImage(filter) => {
                Some(latest_image(spec, input, filter, config, images)?)
            }
        };
        if let Some(value) = found {
            debug!(node = %spec.name, input, source = %source, "resolved input");
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn latest_image<C: ImageCatalog + ?Sized>(
    spec: &NodeSpec,
    input: &str,
    filter: &ImageFilter,
    config: &GlobalConfig,
    images: &C,
) -> Result<Value, ResolutionError> {
    let tags = concrete_filter(spec, input, filter, config)?;
    let catalog = images
        .list_images()
        .map_err(|source| ResolutionError::Catalog {
            node: spec.name.clone(),
            input: input.to_string(),
            source,
        })?;
    let picked = image::select_image(&tags, &catalog).map_err(|source: ImageError| {
        ResolutionError::Image {
            node: spec.name.clone(),
            input: input.to_string(),
            source,
        }
    })?;
    Ok(Value::String(picked.id.clone()))
}

/// Replace `global:` filter values with their configured text.
fn concrete_filter(
    spec: &NodeSpec,
    input: &str,
    filter: &ImageFilter,
    config: &GlobalConfig,
) -> Result<IndexMap<String, String>, ResolutionError> {
    filter
        .tags
        .iter()
        .map(|(tag, value)| {
            let text = match value {
                FilterValue::Literal(s) => s.clone(),
                FilterValue::Global(key) => config
                    .get(key)
                    .map(super::types::value_to_string)
                    .ok_or_else(|| ResolutionError::FilterValueMissing {
                        node: spec.name.clone(),
                        input: input.to_string(),
                        key: key.clone(),
                    })?,
            };
            Ok((tag.clone(), text))
        })
        .collect()
}

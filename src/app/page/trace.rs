use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{ComputedStyle, Document, ITEM_CONTAINER_ID, NodeId, Signal};

fn default_item_parent() -> String {
    ITEM_CONTAINER_ID.to_string()
}

/// One recorded page event. Traces are JSON lines, one step per line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum TraceStep {
    /// Client-side navigation; fires the navigation-finished signal.
    Navigate { url: String },
    ContentLoaded,
    Append {
        parent: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        display: Option<String>,
        #[serde(default)]
        visibility: Option<String>,
        #[serde(default)]
        opacity: Option<f32>,
    },
    AppendItem {
        #[serde(default = "default_item_parent")]
        parent: String,
        href: String,
        #[serde(default)]
        progress: Option<f64>,
    },
    SetProgress {
        #[serde(default = "default_item_parent")]
        parent: String,
        index: usize,
        progress: f64,
    },
    Remove { id: String },
    /// Removes every child of the element.
    Clear { id: String },
    SetStyle {
        id: String,
        #[serde(default)]
        display: Option<String>,
        #[serde(default)]
        visibility: Option<String>,
        #[serde(default)]
        opacity: Option<f32>,
    },
    Resize,
    Wait { ms: u64 },
}

impl TraceStep {
    pub(crate) fn label(&self) -> String {
        match self {
            Self::Navigate { url } => format!("navigate {url}"),
            Self::ContentLoaded => "content loaded".to_string(),
            Self::Append { parent, id, .. } => match id {
                Some(id) => format!("append #{id} to {parent}"),
                None => format!("append element to {parent}"),
            },
            Self::AppendItem { href, .. } => format!("append item {href}"),
            Self::SetProgress {
                index, progress, ..
            } => format!("item {index} progress {progress}"),
            Self::Remove { id } => format!("remove #{id}"),
            Self::Clear { id } => format!("clear #{id}"),
            Self::SetStyle { id, .. } => format!("restyle #{id}"),
            Self::Resize => "resize".to_string(),
            Self::Wait { ms } => format!("wait {ms}ms"),
        }
    }

    /// Applies the step to `doc` and returns the signals it raises. `wait`
    /// raises none; the caller owns the clock.
    pub(crate) fn apply(&self, doc: &mut Document) -> Result<Vec<Signal>> {
        let signals = match self {
            Self::Navigate { url } => {
                doc.set_location(url.clone());
                vec![Signal::NavigateFinished]
            }
            Self::ContentLoaded => vec![Signal::ContentLoaded],
            Self::Append {
                parent,
                id,
                display,
                visibility,
                opacity,
            } => {
                let parent = doc.resolve(parent)?;
                let mut style = ComputedStyle::default();
                patch_style(&mut style, display, visibility, opacity);
                doc.append_element(parent, id.as_deref(), style);
                mutation_signals(doc, parent)
            }
            Self::AppendItem {
                parent,
                href,
                progress,
            } => {
                let parent = doc.resolve(parent)?;
                doc.append_item(parent, href, *progress);
                mutation_signals(doc, parent)
            }
            Self::SetProgress {
                parent,
                index,
                progress,
            } => {
                let container = doc.resolve(parent)?;
                let mutated = doc.set_item_progress(container, *index, *progress)?;
                mutation_signals(doc, mutated)
            }
            Self::Remove { id } => {
                let node = doc.resolve(id)?;
                let parent = doc.detach(node)?;
                mutation_signals(doc, parent)
            }
            Self::Clear { id } => {
                let node = doc.resolve(id)?;
                doc.clear_children(node);
                mutation_signals(doc, node)
            }
            Self::SetStyle {
                id,
                display,
                visibility,
                opacity,
            } => {
                let node = doc.resolve(id)?;
                patch_style(doc.style_mut(node), display, visibility, opacity);
                vec![Signal::LayoutChanged]
            }
            Self::Resize => vec![Signal::Resize],
            Self::Wait { .. } => Vec::new(),
        };
        Ok(signals)
    }
}

fn patch_style(
    style: &mut ComputedStyle,
    display: &Option<String>,
    visibility: &Option<String>,
    opacity: &Option<f32>,
) {
    if let Some(display) = display {
        style.display = display.clone();
    }
    if let Some(visibility) = visibility {
        style.visibility = visibility.clone();
    }
    if let Some(opacity) = opacity {
        style.opacity = *opacity;
    }
}

fn mutation_signals(doc: &Document, mutated: NodeId) -> Vec<Signal> {
    doc.observers_for(mutated)
        .into_iter()
        .map(Signal::Mutation)
        .collect()
}

#[derive(Debug, Default)]
pub(crate) struct ParsedTrace {
    pub(crate) steps: Vec<TraceStep>,
    pub(crate) skipped_lines: usize,
}

pub(crate) fn parse_trace(raw: &str) -> ParsedTrace {
    let mut parsed = ParsedTrace::default();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<TraceStep>(trimmed) {
            Ok(step) => parsed.steps.push(step),
            Err(_) => parsed.skipped_lines += 1,
        }
    }
    parsed
}

pub(crate) fn read_trace(path: &Path) -> Result<ParsedTrace> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read page trace {}", path.display()))?;
    let parsed = parse_trace(&raw);
    if parsed.skipped_lines > 0 {
        tracing::warn!(
            skipped = parsed.skipped_lines,
            path = %path.display(),
            "ignored malformed trace lines"
        );
    }
    Ok(parsed)
}

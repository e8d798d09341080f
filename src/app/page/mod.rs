mod document;
mod trace;

use anyhow::Result;

use super::tracker::DisplayState;

pub(crate) use document::*;
pub(crate) use trace::*;

pub(crate) const ITEM_CONTAINER_ID: &str = "items";
pub(crate) const ITEM_LINK_ID: &str = "wc-endpoint";
pub(crate) const STATS_CONTAINER_ID: &str = "playlist-stats";
pub(crate) const PLAYER_ID: &str = "player";
pub(crate) const BELOW_ID: &str = "below";
pub(crate) const SECONDARY_ID: &str = "secondary";
pub(crate) const SECONDARY_INNER_ID: &str = "secondary-inner";
pub(crate) const PRIMARY_INNER_ID: &str = "primary-inner";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ObserverId(pub(crate) u64);

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ComputedStyle {
    pub(crate) display: String,
    pub(crate) visibility: String,
    pub(crate) opacity: f32,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            opacity: 1.0,
        }
    }
}

impl ComputedStyle {
    pub(crate) fn is_visible(&self) -> bool {
        self.display != "none" && self.visibility != "hidden" && self.opacity != 0.0
    }
}

/// An item link as rendered by the host, with the width of its progress
/// overlay when one is present.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ItemLink {
    pub(crate) href: String,
    pub(crate) progress_width: Option<f64>,
}

impl ItemLink {
    pub(crate) fn shows_progress(&self) -> bool {
        self.progress_width.is_some_and(|width| width > 0.0)
    }
}

/// Signals the tracker reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    ContentLoaded,
    NavigateFinished,
    /// One batched callback for the given observer.
    Mutation(ObserverId),
    Resize,
    LayoutChanged,
}

/// Read access to the host page. Every query that can miss returns an
/// `Option` so absence is handled at the call site.
pub(crate) trait PageSource {
    fn location(&self) -> &str;
    fn root(&self) -> NodeId;
    fn element_by_id(&self, id: &str) -> Option<NodeId>;
    fn computed_style(&self, node: NodeId) -> Option<ComputedStyle>;
    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn item_links(&self, container: NodeId) -> Vec<ItemLink>;
    /// Subtree childList observation rooted at `target`.
    fn observe(&mut self, target: NodeId) -> ObserverId;
    /// Returns false when the observer was already released.
    fn disconnect(&mut self, observer: ObserverId) -> bool;

    fn is_visible(&self, node: NodeId) -> bool {
        self.computed_style(node)
            .is_some_and(|style| style.is_visible())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layout {
    Sidebar,
    Stacked,
}

impl Layout {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Sidebar => "sidebar",
            Self::Stacked => "stacked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub(crate) parent: NodeId,
    pub(crate) before: NodeId,
    pub(crate) layout: Layout,
}

/// The stats container and its two presentation primitives: a text line and
/// a width-bearing bar.
pub(crate) trait ProgressSink {
    fn has_stats_container(&self) -> bool;
    fn insert_stats_container(&mut self, placement: Placement) -> Result<()>;
    fn render(&mut self, state: &DisplayState);
}

use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};

use super::super::tracker::DisplayState;
use super::{
    ComputedStyle, ITEM_LINK_ID, ItemLink, NodeId, ObserverId, PageSource, Placement,
    ProgressSink, STATS_CONTAINER_ID,
};

#[derive(Debug, Clone)]
enum NodeKind {
    Element,
    ItemLink {
        href: String,
        progress_width: Option<f64>,
    },
    Stats {
        text: String,
        bar_percent: u32,
    },
}

#[derive(Debug, Clone)]
struct Node {
    dom_id: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    style: ComputedStyle,
    kind: NodeKind,
}

impl Node {
    fn new(dom_id: Option<String>, parent: Option<NodeId>, kind: NodeKind) -> Self {
        Self {
            dom_id,
            parent,
            children: Vec::new(),
            style: ComputedStyle::default(),
            kind,
        }
    }
}

/// Arena-backed page model. Nodes are never freed; detached subtrees simply
/// stop being reachable from the root.
#[derive(Debug, Clone)]
pub(crate) struct Document {
    location: String,
    nodes: Vec<Node>,
    observers: BTreeMap<ObserverId, NodeId>,
    next_observer: u64,
    observers_created: u64,
    stats_inserts: u64,
}

impl Document {
    pub(crate) fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            nodes: vec![Node::new(None, None, NodeKind::Element)],
            observers: BTreeMap::new(),
            next_observer: 1,
            observers_created: 0,
            stats_inserts: 0,
        }
    }

    pub(crate) fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    /// `body` names the root; anything else is looked up by element id.
    pub(crate) fn resolve(&self, name: &str) -> Result<NodeId> {
        if name == "body" {
            return Ok(self.root());
        }
        self.element_by_id(name)
            .ok_or_else(|| anyhow!("no element with id '{name}' in the page"))
    }

    pub(crate) fn append_element(
        &mut self,
        parent: NodeId,
        dom_id: Option<&str>,
        style: ComputedStyle,
    ) -> NodeId {
        let mut node = Node::new(dom_id.map(str::to_string), Some(parent), NodeKind::Element);
        node.style = style;
        self.push_child(parent, node, None)
    }

    pub(crate) fn append_item(
        &mut self,
        parent: NodeId,
        href: &str,
        progress_width: Option<f64>,
    ) -> NodeId {
        let node = Node::new(
            Some(ITEM_LINK_ID.to_string()),
            Some(parent),
            NodeKind::ItemLink {
                href: href.to_string(),
                progress_width,
            },
        );
        self.push_child(parent, node, None)
    }

    /// Updates the progress overlay of the `index`th link under `container`
    /// and returns the link's parent, where the overlay mutation lands.
    pub(crate) fn set_item_progress(
        &mut self,
        container: NodeId,
        index: usize,
        width: f64,
    ) -> Result<NodeId> {
        let link = self
            .descendants(container)
            .into_iter()
            .filter(|id| matches!(self.nodes[id.0].kind, NodeKind::ItemLink { .. }))
            .nth(index)
            .ok_or_else(|| anyhow!("no item link at index {index}"))?;
        if let NodeKind::ItemLink { progress_width, .. } = &mut self.nodes[link.0].kind {
            *progress_width = Some(width);
        }
        Ok(self.nodes[link.0].parent.unwrap_or(container))
    }

    /// Detaches `node` and returns its former parent.
    pub(crate) fn detach(&mut self, node: NodeId) -> Result<NodeId> {
        let Some(parent) = self.nodes[node.0].parent.take() else {
            bail!("cannot detach the root node");
        };
        self.nodes[parent.0].children.retain(|child| *child != node);
        Ok(parent)
    }

    pub(crate) fn clear_children(&mut self, node: NodeId) {
        let children = std::mem::take(&mut self.nodes[node.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    pub(crate) fn style_mut(&mut self, node: NodeId) -> &mut ComputedStyle {
        &mut self.nodes[node.0].style
    }

    /// Observers whose subtree includes `mutated`, i.e. the ones a childList
    /// change on `mutated` would notify.
    pub(crate) fn observers_for(&self, mutated: NodeId) -> Vec<ObserverId> {
        if !self.is_attached(mutated) {
            return Vec::new();
        }
        self.observers
            .iter()
            .filter(|(_, target)| self.contains(**target, mutated))
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn live_observers(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn observers_created(&self) -> u64 {
        self.observers_created
    }

    #[cfg(test)]
    pub(crate) fn stats_container_count(&self) -> usize {
        self.attached_nodes()
            .filter(|id| matches!(self.nodes[id.0].kind, NodeKind::Stats { .. }))
            .count()
    }

    pub(crate) fn stats_inserts(&self) -> u64 {
        self.stats_inserts
    }

    pub(crate) fn stats_text(&self) -> Option<&str> {
        let node = self.stats_node()?;
        match &self.nodes[node.0].kind {
            NodeKind::Stats { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn stats_bar_percent(&self) -> Option<u32> {
        let node = self.stats_node()?;
        match &self.nodes[node.0].kind {
            NodeKind::Stats { bar_percent, .. } => Some(*bar_percent),
            _ => None,
        }
    }

    /// Element id of the node the stats container was inserted under.
    pub(crate) fn stats_parent_id(&self) -> Option<&str> {
        let node = self.stats_node()?;
        let parent = self.nodes[node.0].parent?;
        self.nodes[parent.0].dom_id.as_deref()
    }

    fn stats_node(&self) -> Option<NodeId> {
        self.element_by_id(STATS_CONTAINER_ID)
    }

    fn push_child(&mut self, parent: NodeId, node: Node, before: Option<usize>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        let children = &mut self.nodes[parent.0].children;
        match before {
            Some(position) => children.insert(position, id),
            None => children.push(id),
        }
        id
    }

    fn is_attached(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            if current == self.root() {
                return true;
            }
            match self.nodes[current.0].parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn attached_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.descendants(self.root()).into_iter()
    }

    /// Preorder traversal of the subtree below `node`, excluding `node`.
    fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[node.0].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
        }
        out
    }
}

impl PageSource for Document {
    fn location(&self) -> &str {
        &self.location
    }

    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.attached_nodes()
            .find(|node| self.nodes[node.0].dom_id.as_deref() == Some(id))
    }

    fn computed_style(&self, node: NodeId) -> Option<ComputedStyle> {
        if !self.is_attached(node) {
            return None;
        }
        self.nodes.get(node.0).map(|n| n.style.clone())
    }

    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id.0).and_then(|n| n.parent);
        }
        false
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    fn item_links(&self, container: NodeId) -> Vec<ItemLink> {
        self.descendants(container)
            .into_iter()
            .filter_map(|id| match &self.nodes[id.0].kind {
                NodeKind::ItemLink {
                    href,
                    progress_width,
                } => Some(ItemLink {
                    href: href.clone(),
                    progress_width: *progress_width,
                }),
                _ => None,
            })
            .collect()
    }

    fn observe(&mut self, target: NodeId) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers_created += 1;
        self.observers.insert(id, target);
        id
    }

    fn disconnect(&mut self, observer: ObserverId) -> bool {
        self.observers.remove(&observer).is_some()
    }
}

impl ProgressSink for Document {
    fn has_stats_container(&self) -> bool {
        self.stats_node().is_some()
    }

    fn insert_stats_container(&mut self, placement: Placement) -> Result<()> {
        let position = self.nodes[placement.parent.0]
            .children
            .iter()
            .position(|child| *child == placement.before)
            .ok_or_else(|| anyhow!("insertion reference is not a child of the target parent"))?;
        let node = Node::new(
            Some(STATS_CONTAINER_ID.to_string()),
            Some(placement.parent),
            NodeKind::Stats {
                text: String::new(),
                bar_percent: 0,
            },
        );
        self.push_child(placement.parent, node, Some(position));
        self.stats_inserts += 1;
        Ok(())
    }

    fn render(&mut self, state: &DisplayState) {
        let Some(node) = self.stats_node() else {
            return;
        };
        if let NodeKind::Stats { text, bar_percent } = &mut self.nodes[node.0].kind {
            *text = state.text();
            *bar_percent = state.percent.min(100);
        }
    }
}

//! Road network payload.
//!
//! Nodes live in a flat vector and refer to each other by position. Each
//! physical edge is stored once per classification bit, symmetrically on
//! both endpoints, so filtering a network by road class is a bit test on
//! the link.
//!
//! Nodes are also addressed by the raster cell they fall into. Highway
//! nodes share coordinates with the surface network but live in their own
//! cell namespace ([`NodeCell::Highway`]), so a highway node and a surface
//! node in the same cell never collide.

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::{Bounds, GridData, Metadata};

// =============================================================================
// Classification
// =============================================================================

/// Road classification bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Classification(u8);

impl Classification {
    pub const NONE: Classification = Classification(0);
    pub const OTHER: Classification = Classification(1);
    pub const SECONDARY: Classification = Classification(2);
    pub const PRIMARY: Classification = Classification(4);
    pub const HIGHWAY_LINK: Classification = Classification(8);
    pub const HIGHWAY: Classification = Classification(16);

    const MASK: u8 = 0x1F;

    /// Single-bit classifications, lowest first.
    pub const BITS: [Classification; 5] = [
        Classification::OTHER,
        Classification::SECONDARY,
        Classification::PRIMARY,
        Classification::HIGHWAY_LINK,
        Classification::HIGHWAY,
    ];

    /// Keeps only the five known bits.
    pub fn from_bits(bits: u32) -> Self {
        Classification((bits & Self::MASK as u32) as u8)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Classification) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn without(self, other: Classification) -> Self {
        Classification(self.0 & !other.0)
    }

    /// The set bits as single-bit classifications.
    pub fn split(self) -> impl Iterator<Item = Classification> {
        Self::BITS.into_iter().filter(move |bit| self.contains(*bit))
    }
}

impl BitOr for Classification {
    type Output = Classification;

    fn bitor(self, rhs: Self) -> Self::Output {
        Classification(self.0 | rhs.0)
    }
}

impl BitOrAssign for Classification {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Classification({:#07b})", self.0)
    }
}

// =============================================================================
// Nodes and links
// =============================================================================

/// Raster cell a node falls into, in either the surface or the highway namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCell {
    Surface(u32),
    Highway(u32),
}

impl NodeCell {
    /// Raster index, regardless of namespace.
    pub fn index(self) -> u32 {
        match self {
            NodeCell::Surface(i) | NodeCell::Highway(i) => i,
        }
    }

    pub fn is_highway(self) -> bool {
        matches!(self, NodeCell::Highway(_))
    }
}

/// One directed half of a logical edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphLink {
    /// Position of the other endpoint in [`GraphData::nodes`].
    pub node: usize,
    pub distance: f32,
    /// Exactly one bit, or [`Classification::NONE`] for unclassified edges.
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub lon: f64,
    pub lat: f64,
    /// Union of the classifications of every edge that ever touched this node.
    pub classification: Classification,
    pub cell: NodeCell,
    pub links: Vec<GraphLink>,
}

impl GraphNode {
    pub fn new(lon: f64, lat: f64, classification: Classification, cell: NodeCell) -> Self {
        Self {
            lon,
            lat,
            classification,
            cell,
            links: Vec::new(),
        }
    }

    fn find_link(&self, node: usize, classification: Classification) -> Option<usize> {
        self.links
            .iter()
            .position(|l| l.node == node && l.classification == classification)
    }

    /// Adds or merges a single-bit half edge, keeping the smaller distance.
    fn merge_link(&mut self, node: usize, distance: f32, classification: Classification) {
        match self.find_link(node, classification) {
            Some(i) => {
                let link = &mut self.links[i];
                link.distance = link.distance.min(distance);
            }
            None => self.links.push(GraphLink {
                node,
                distance,
                classification,
            }),
        }
    }
}

// =============================================================================
// GraphData
// =============================================================================

/// A planar road network snapped to a uniform cell raster.
#[derive(Debug, Clone, Default)]
pub struct GraphData {
    pub bounds: Bounds,
    pub metadata: Metadata,
    pub cell_size_x: f64,
    pub cell_size_y: f64,
    pub count_x: usize,
    pub count_y: usize,
    pub nodes: Vec<GraphNode>,
    index: HashMap<NodeCell, usize>,
    density: Option<GridData>,
}

impl GraphData {
    /// An empty (unloaded) graph with the given raster geometry.
    pub fn new(bounds: Bounds, cell_size_x: f64, cell_size_y: f64) -> Self {
        let mut graph = Self {
            bounds,
            cell_size_x,
            cell_size_y,
            ..Self::default()
        };
        graph.update_counts();
        graph
    }

    /// Recomputes `count_x`/`count_y` from bounds and cell size.
    pub fn update_counts(&mut self) {
        self.count_x = cells_along(self.bounds.width(), self.cell_size_x);
        self.count_y = cells_along(self.bounds.height(), self.cell_size_y);
    }

    pub fn is_loaded(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn unload(&mut self) {
        self.nodes = Vec::new();
        self.index = HashMap::new();
        self.density = None;
    }

    /// Raster index of a position, clamped to the grid.
    pub fn cell_index(&self, lon: f64, lat: f64) -> u32 {
        let x = ((lon - self.bounds.west) / self.cell_size_x).floor();
        let y = ((self.bounds.north - lat) / self.cell_size_y).floor();
        let x = (x.max(0.0) as usize).min(self.count_x.saturating_sub(1));
        let y = (y.max(0.0) as usize).min(self.count_y.saturating_sub(1));
        (x + self.count_x * y) as u32
    }

    /// Column and row of a raster index.
    pub fn cell_coords(&self, index: u32) -> (usize, usize) {
        let count_x = self.count_x.max(1);
        (index as usize % count_x, index as usize / count_x)
    }

    /// Appends a node and registers its cell. The first node to claim a
    /// cell keeps it.
    pub fn push_node(&mut self, node: GraphNode) -> usize {
        let position = self.nodes.len();
        self.index.entry(node.cell).or_insert(position);
        self.nodes.push(node);
        position
    }

    pub fn node_at(&self, cell: NodeCell) -> Option<usize> {
        self.index.get(&cell).copied()
    }

    /// Adds an edge between two nodes, once per classification bit and on
    /// both endpoints. Repeated edges keep the smaller distance. Self-loops
    /// are ignored.
    pub fn add_link(&mut self, a: usize, b: usize, distance: f32, classification: Classification) {
        if a == b || a >= self.nodes.len() || b >= self.nodes.len() {
            return;
        }
        if classification.is_empty() {
            self.nodes[a].merge_link(b, distance, Classification::NONE);
            self.nodes[b].merge_link(a, distance, Classification::NONE);
            return;
        }
        for bit in classification.split() {
            self.nodes[a].merge_link(b, distance, bit);
            self.nodes[b].merge_link(a, distance, bit);
        }
    }

    /// Removes the `classification` half edges between `a` and `b` in both directions.
    pub fn remove_link(&mut self, a: usize, b: usize, classification: Classification) {
        if let Some(node) = self.nodes.get_mut(a) {
            node.links
                .retain(|l| !(l.node == b && l.classification == classification));
        }
        if let Some(node) = self.nodes.get_mut(b) {
            node.links
                .retain(|l| !(l.node == a && l.classification == classification));
        }
    }

    /// Number of logical (single-classification, undirected) edges.
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.links.len()).sum::<usize>() / 2
    }

    /// Iterates logical edges once each as `(a, b, link)` with `a < b`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, &GraphLink)> {
        self.nodes.iter().enumerate().flat_map(|(a, node)| {
            node.links
                .iter()
                .filter(move |l| l.node > a)
                .map(move |l| (a, l.node, l))
        })
    }

    /// Drops every node for which `keep` returns false, along with all links
    /// pointing at it, and renumbers the survivors. Returns the number of
    /// removed nodes.
    pub fn retain_nodes(&mut self, mut keep: impl FnMut(usize, &GraphNode) -> bool) -> usize {
        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut next = 0;
        for (i, node) in self.nodes.iter().enumerate() {
            if keep(i, node) {
                remap[i] = next;
                next += 1;
            }
        }
        let removed = self.nodes.len() - next;
        if removed == 0 {
            return 0;
        }

        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = nodes
            .into_iter()
            .enumerate()
            .filter(|(i, _)| remap[*i] != usize::MAX)
            .map(|(_, mut node)| {
                node.links.retain(|l| remap[l.node] != usize::MAX);
                for link in &mut node.links {
                    link.node = remap[link.node];
                }
                node
            })
            .collect();
        self.rebuild_index();
        removed
    }

    /// Orders every node's links by target, then classification. A sorted
    /// graph decodes from its binary form with the same link order.
    pub fn sort_links(&mut self) {
        for node in &mut self.nodes {
            node.links.sort_by_key(|l| (l.node, l.classification.bits()));
        }
    }

    pub fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, node) in self.nodes.iter().enumerate() {
            self.index.entry(node.cell).or_insert(i);
        }
    }

    /// Density raster: each cell holds the sum of the classification masks
    /// of the nodes that fall into it. Built on first use.
    pub fn density_grid(&mut self) -> &GridData {
        if self.density.is_none() {
            self.density = Some(self.build_density_grid());
        }
        self.density.get_or_insert_with(GridData::default)
    }

    pub fn has_density_grid(&self) -> bool {
        self.density.is_some()
    }

    pub(crate) fn set_density_grid(&mut self, grid: GridData) {
        self.density = Some(grid);
    }

    fn build_density_grid(&self) -> GridData {
        let count = self.count_x * self.count_y;
        let mut values = vec![0.0f32; count];
        for node in &self.nodes {
            let index = node.cell.index() as usize;
            if let Some(cell) = values.get_mut(index) {
                *cell += node.classification.bits() as f32;
            }
        }
        let mut grid = GridData::new(self.bounds, self.count_x, self.count_y);
        if !grid.set_values(values, None) {
            grid.values = None;
        }
        grid
    }
}

fn cells_along(extent: f64, cell_size: f64) -> usize {
    if cell_size > 0.0 && extent.is_finite() && extent > 0.0 {
        (extent / cell_size).round().max(1.0) as usize
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_graph() -> GraphData {
        let mut graph = GraphData::new(Bounds::new(0.0, 3.0, 1.0, 0.0), 1.0, 1.0);
        for x in 0..3 {
            let lon = x as f64 + 0.5;
            let cell = NodeCell::Surface(graph.cell_index(lon, 0.5));
            graph.push_node(GraphNode::new(lon, 0.5, Classification::PRIMARY, cell));
        }
        graph
    }

    #[test]
    fn test_classification_split() {
        let c = Classification::from_bits(0b10110);
        let bits: Vec<_> = c.split().collect();
        assert_eq!(
            bits,
            vec![
                Classification::SECONDARY,
                Classification::PRIMARY,
                Classification::HIGHWAY
            ]
        );
        assert!(c.contains(Classification::HIGHWAY));
        assert!(!c.contains(Classification::OTHER));
        assert_eq!(c.without(Classification::HIGHWAY).bits(), 0b00110);
        assert_eq!(Classification::from_bits(0xFF).bits(), 0x1F);
    }

    #[test]
    fn test_add_link_is_symmetric_per_bit() {
        let mut graph = line_graph();
        graph.add_link(0, 1, 5.0, Classification::PRIMARY | Classification::OTHER);

        assert_eq!(graph.nodes[0].links.len(), 2);
        assert_eq!(graph.nodes[1].links.len(), 2);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.nodes[1]
            .links
            .iter()
            .all(|l| l.node == 0 && l.distance == 5.0));
    }

    #[test]
    fn test_duplicate_edge_keeps_shorter_distance() {
        let mut graph = line_graph();
        graph.add_link(0, 1, 5.0, Classification::PRIMARY);
        graph.add_link(1, 0, 3.0, Classification::PRIMARY);
        graph.add_link(0, 1, 4.0, Classification::PRIMARY);

        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.nodes[0].links[0].distance, 3.0);
        assert_eq!(graph.nodes[1].links[0].distance, 3.0);
    }

    #[test]
    fn test_self_loop_ignored() {
        let mut graph = line_graph();
        graph.add_link(2, 2, 1.0, Classification::OTHER);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_remove_link() {
        let mut graph = line_graph();
        graph.add_link(0, 1, 1.0, Classification::PRIMARY | Classification::SECONDARY);
        graph.remove_link(1, 0, Classification::PRIMARY);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.nodes[0].links[0].classification, Classification::SECONDARY);
    }

    #[test]
    fn test_retain_nodes_renumbers_links() {
        let mut graph = line_graph();
        graph.add_link(0, 1, 1.0, Classification::PRIMARY);
        graph.add_link(1, 2, 2.0, Classification::PRIMARY);

        let removed = graph.retain_nodes(|i, _| i != 0);

        assert_eq!(removed, 1);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[0].links.len(), 1);
        assert_eq!(graph.nodes[0].links[0].node, 1);
        assert_eq!(graph.node_at(NodeCell::Surface(0)), None);
        assert_eq!(graph.node_at(NodeCell::Surface(1)), Some(0));
    }

    #[test]
    fn test_sort_links() {
        let mut graph = line_graph();
        graph.add_link(1, 2, 1.0, Classification::PRIMARY);
        graph.add_link(1, 0, 1.0, Classification::SECONDARY | Classification::OTHER);
        graph.sort_links();

        let order: Vec<_> = graph.nodes[1]
            .links
            .iter()
            .map(|l| (l.node, l.classification))
            .collect();
        assert_eq!(
            order,
            vec![
                (0, Classification::OTHER),
                (0, Classification::SECONDARY),
                (2, Classification::PRIMARY)
            ]
        );
    }

    #[test]
    fn test_cell_index_is_clamped() {
        let graph = line_graph();
        assert_eq!(graph.cell_index(2.5, 0.5), 2);
        assert_eq!(graph.cell_index(9.0, -3.0), 2);
        assert_eq!(graph.cell_index(-1.0, 5.0), 0);
        assert_eq!(graph.cell_coords(2), (2, 0));
    }

    #[test]
    fn test_density_grid_sums_classifications() {
        let mut graph = line_graph();
        let cell = NodeCell::Highway(1);
        graph.push_node(GraphNode::new(1.5, 0.5, Classification::HIGHWAY, cell));

        let density = graph.density_grid();
        assert_eq!(density.values, Some(vec![4.0, 20.0, 4.0]));
        assert_eq!(density.max_value, 20.0);
    }
}

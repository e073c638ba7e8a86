//! Graph codec and road network construction.
//!
//! # CSV input
//!
//! One header row, then one edge per row:
//!
//! ```text
//! distance,source,target,x1,y1,x2,y2,classification
//! ```
//!
//! Source edges are turned into a [`GraphData`] by [`GraphBuilder`]:
//!
//! 1. Edges carrying the Highway bit are split: the Highway part goes to a
//!    separate highway network that shares coordinates with the surface one.
//! 2. Nodes are created once per source id and network and accumulate the
//!    classification of every edge touching them.
//! 3. Edges are stored once per classification bit; duplicates keep the
//!    shorter distance.
//! 4. The cell size is the smallest coordinate delta above
//!    [`MIN_CELL_DELTA`] on each axis. Bounds grow by half a cell and every
//!    node is assigned a raster cell.
//! 5. HighwayLink edges of a surface node sharing a cell with a highway node
//!    move to the highway node. Surface nodes left without edges are dropped.
//! 6. Edges between cells that are not Moore neighbours are pruned, then
//!    nodes left without edges.
//! 7. Every empty cell gets an unclassified node at its centre, linked to
//!    the surface nodes of its Moore neighbours with distances in meters.
//!    This potential network lets routing leave the roads.
//! 8. A density raster is built from node classifications.
//!
//! # Binary layout after the common header
//!
//! ```text
//! cellX f64 | cellY f64 | countX i32 | countY i32 | metadata   <- header-only reads stop here
//! | nodes i32 | (lon f64, lat f64, class u8, highway u8, cell u32) * nodes
//! | edges i32 | (a u32, b u32, distance f32, class u8) * edges
//! ```

use std::collections::HashMap;
use std::io::{BufRead, Read, Write};

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};

use super::binary::{self, read_count, write_count};
use super::csv::{self, CsvLines};
use super::CodecError;
use crate::data::{Bounds, Classification, GraphData, GraphNode, NodeCell};

/// Coordinate deltas at or below this (about one meter) are precision noise.
pub const MIN_CELL_DELTA: f64 = 1e-5;

// =============================================================================
// Builder
// =============================================================================

/// Summary of the cleanup passes of a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub rehomed_links: usize,
    pub merged_nodes: usize,
    pub pruned_edges: usize,
    pub pruned_nodes: usize,
    pub potential_nodes: usize,
}

/// Incremental road network builder.
pub struct GraphBuilder {
    graph: GraphData,
    ids: HashMap<(i64, bool), usize>,
    highway: Vec<bool>,
    cell_size_x: f64,
    cell_size_y: f64,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: GraphData::new(Bounds::inverted(), 0.0, 0.0),
            ids: HashMap::new(),
            highway: Vec::new(),
            cell_size_x: f64::MAX,
            cell_size_y: f64::MAX,
        }
    }

    /// Adds one source edge. Self-loops and unclassified edges are skipped.
    pub fn add_edge(
        &mut self,
        source: i64,
        target: i64,
        from: (f64, f64),
        to: (f64, f64),
        distance: f32,
        classification: Classification,
    ) {
        if source == target {
            return;
        }
        let mut remaining = classification;
        if remaining.contains(Classification::HIGHWAY) {
            self.add_split_edge(source, target, from, to, distance, Classification::HIGHWAY, true);
            remaining = remaining.without(Classification::HIGHWAY);
        }
        if !remaining.is_empty() {
            self.add_split_edge(source, target, from, to, distance, remaining, false);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_split_edge(
        &mut self,
        source: i64,
        target: i64,
        from: (f64, f64),
        to: (f64, f64),
        distance: f32,
        classification: Classification,
        highway: bool,
    ) {
        let a = self.node(source, from, classification, highway);
        let b = self.node(target, to, classification, highway);
        self.graph.add_link(a, b, distance, classification);

        let (na, nb) = (&self.graph.nodes[a], &self.graph.nodes[b]);
        let dx = (nb.lon - na.lon).abs();
        if dx > MIN_CELL_DELTA {
            self.cell_size_x = self.cell_size_x.min(dx);
        }
        let dy = (nb.lat - na.lat).abs();
        if dy > MIN_CELL_DELTA {
            self.cell_size_y = self.cell_size_y.min(dy);
        }
    }

    fn node(
        &mut self,
        id: i64,
        (lon, lat): (f64, f64),
        classification: Classification,
        highway: bool,
    ) -> usize {
        if let Some(&position) = self.ids.get(&(id, highway)) {
            self.graph.nodes[position].classification |= classification;
            return position;
        }
        let position = self.graph.nodes.len();
        // Cells are assigned once the raster geometry is known
        self.graph
            .nodes
            .push(GraphNode::new(lon, lat, classification, NodeCell::Surface(0)));
        self.highway.push(highway);
        self.ids.insert((id, highway), position);
        self.graph.bounds.expand(lon, lat);
        position
    }

    /// Finishes construction. Fails only if the input had no usable edges.
    pub fn build(mut self, source: &str) -> Result<(GraphData, BuildReport), CodecError> {
        if self.graph.nodes.is_empty() {
            return Err(CodecError::invalid("graph has no edges"));
        }

        let (cell_x, cell_y) = match (finite(self.cell_size_x), finite(self.cell_size_y)) {
            (Some(x), Some(y)) => (x, y),
            (Some(x), None) => (x, x),
            (None, Some(y)) => (y, y),
            (None, None) => {
                return Err(CodecError::invalid(
                    "cannot infer a cell size: every edge is shorter than the precision threshold",
                ))
            }
        };

        let graph = &mut self.graph;
        graph.cell_size_x = cell_x;
        graph.cell_size_y = cell_y;
        graph.bounds.west -= cell_x * 0.5;
        graph.bounds.east += cell_x * 0.5;
        graph.bounds.north += cell_y * 0.5;
        graph.bounds.south -= cell_y * 0.5;
        graph.update_counts();

        for (position, highway) in self.highway.iter().enumerate() {
            let node = &graph.nodes[position];
            let index = graph.cell_index(node.lon, node.lat);
            graph.nodes[position].cell = if *highway {
                NodeCell::Highway(index)
            } else {
                NodeCell::Surface(index)
            };
        }
        graph.rebuild_index();

        let mut report = BuildReport::default();
        reconcile_highway_links(graph, &mut report);
        prune_long_edges(graph, &mut report);
        create_potential_network(graph, &mut report);
        graph.sort_links();

        if report.pruned_edges > 0 || report.pruned_nodes > 0 {
            info!(
                file = source,
                edges = report.pruned_edges,
                nodes = report.pruned_nodes,
                "Pruned edges between non-adjacent cells"
            );
        }
        debug!(
            file = source,
            nodes = graph.nodes.len(),
            edges = graph.edge_count(),
            count_x = graph.count_x,
            count_y = graph.count_y,
            rehomed = report.rehomed_links,
            merged = report.merged_nodes,
            potential = report.potential_nodes,
            "Graph built"
        );

        graph.density_grid();
        Ok((self.graph, report))
    }
}

fn finite(size: f64) -> Option<f64> {
    (size < f64::MAX).then_some(size)
}

/// Moves HighwayLink edges of surface nodes onto the highway node in the
/// same cell.
fn reconcile_highway_links(graph: &mut GraphData, report: &mut BuildReport) {
    let mut emptied = vec![false; graph.nodes.len()];

    for link_node in 0..graph.nodes.len() {
        let node = &graph.nodes[link_node];
        if node.cell.is_highway() || !node.classification.contains(Classification::HIGHWAY_LINK) {
            continue;
        }
        let Some(highway_node) = graph.node_at(NodeCell::Highway(node.cell.index())) else {
            continue;
        };

        let moved: Vec<_> = node
            .links
            .iter()
            .filter(|l| l.classification == Classification::HIGHWAY_LINK)
            .map(|l| (l.node, l.distance))
            .collect();

        for (target, distance) in moved {
            graph.remove_link(link_node, target, Classification::HIGHWAY_LINK);
            graph.add_link(highway_node, target, distance, Classification::HIGHWAY_LINK);
            report.rehomed_links += 1;
        }

        graph.nodes[highway_node].classification |= Classification::HIGHWAY_LINK;
        let node = &mut graph.nodes[link_node];
        node.classification = node.classification.without(Classification::HIGHWAY_LINK);
        if node.links.is_empty() {
            emptied[link_node] = true;
        }
    }

    report.merged_nodes = graph.retain_nodes(|i, _| !emptied[i]);
}

/// True when two cells touch, diagonals included.
///
/// Adjacency is decided on column and row rather than on the raw index
/// delta, so cells at opposite ends of consecutive rows (delta of 1 across
/// a row wrap) are not neighbours.
fn is_moore_neighbour(graph: &GraphData, a: NodeCell, b: NodeCell) -> bool {
    let (ax, ay) = graph.cell_coords(a.index());
    let (bx, by) = graph.cell_coords(b.index());
    let dx = ax.abs_diff(bx);
    let dy = ay.abs_diff(by);
    dx <= 1 && dy <= 1 && (dx, dy) != (0, 0)
}

/// Removes edges whose endpoints are not in adjacent cells, then any node
/// left without edges.
fn prune_long_edges(graph: &mut GraphData, report: &mut BuildReport) {
    let invalid: Vec<_> = graph
        .edges()
        .filter(|(a, b, _)| !is_moore_neighbour(graph, graph.nodes[*a].cell, graph.nodes[*b].cell))
        .map(|(a, b, link)| (a, b, link.classification))
        .collect();

    report.pruned_edges = invalid.len();
    for (a, b, classification) in invalid {
        graph.remove_link(a, b, classification);
    }
    report.pruned_nodes = graph.retain_nodes(|_, node| !node.links.is_empty());
}

/// Fills every empty cell with an unclassified surface node and links it to
/// the surface nodes around it. A cell holding only a highway node is not
/// empty.
fn create_potential_network(graph: &mut GraphData, report: &mut BuildReport) {
    let (count_x, count_y) = (graph.count_x, graph.count_y);
    let mut occupied = vec![false; count_x * count_y];
    for node in &graph.nodes {
        if let Some(cell) = occupied.get_mut(node.cell.index() as usize) {
            *cell = true;
        }
    }

    let first = graph.nodes.len();
    for index in (0..occupied.len()).filter(|&i| !occupied[i]) {
        let (x, y) = (index % count_x, index / count_x);
        let lon = graph.bounds.west + (x as f64 + 0.5) * graph.cell_size_x;
        let lat = graph.bounds.north - (y as f64 + 0.5) * graph.cell_size_y;
        let cell = NodeCell::Surface(index as u32);
        graph.push_node(GraphNode::new(lon, lat, Classification::NONE, cell));
    }
    report.potential_nodes = graph.nodes.len() - first;
    if report.potential_nodes == 0 {
        return;
    }

    let (meters_x, meters_y) = graph.bounds.size_in_meters();
    let step_x = meters_x / count_x as f64;
    let step_y = meters_y / count_y as f64;
    let step_xy = step_x.hypot(step_y);

    for position in first..graph.nodes.len() {
        let (x, y) = graph.cell_coords(graph.nodes[position].cell.index());
        for (dx, dy) in MOORE_OFFSETS {
            let (Some(nx), Some(ny)) = (x.checked_add_signed(dx), y.checked_add_signed(dy)) else {
                continue;
            };
            if nx >= count_x || ny >= count_y {
                continue;
            }
            let neighbour = NodeCell::Surface((nx + count_x * ny) as u32);
            let Some(target) = graph.node_at(neighbour) else {
                continue;
            };
            let distance = match (dx, dy) {
                (_, 0) => step_x,
                (0, _) => step_y,
                _ => step_xy,
            };
            graph.add_link(position, target, distance as f32, Classification::NONE);
        }
    }
}

const MOORE_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

// =============================================================================
// CSV
// =============================================================================

pub fn read_csv<R: BufRead>(reader: R, source: &str) -> Result<GraphData, CodecError> {
    let mut lines = CsvLines::new(reader);
    // Column header
    lines.next_line()?;

    let mut builder = GraphBuilder::new();
    while let Some(line) = lines.next_line()? {
        let line_no = lines.line_number();
        let cells = csv::split_cells(&line);
        let cell = |i: usize| cells.get(i).copied();

        let distance: f32 = csv::parse_cell(cell(0), line_no, "distance")?;
        let source_id: i64 = csv::parse_cell(cell(1), line_no, "source id")?;
        let target_id: i64 = csv::parse_cell(cell(2), line_no, "target id")?;
        let x1: f64 = csv::parse_cell(cell(3), line_no, "x1")?;
        let y1: f64 = csv::parse_cell(cell(4), line_no, "y1")?;
        let x2: f64 = csv::parse_cell(cell(5), line_no, "x2")?;
        let y2: f64 = csv::parse_cell(cell(6), line_no, "y2")?;
        let classification: u32 = csv::parse_cell(cell(7), line_no, "classification")?;

        builder.add_edge(
            source_id,
            target_id,
            (x1, y1),
            (x2, y2),
            distance,
            Classification::from_bits(classification),
        );
    }

    builder.build(source).map(|(graph, _)| graph)
}

/// Writes the road edges as an edge list, using node positions as ids.
/// Potential links are left out; reading the list back rebuilds them.
pub fn write_csv<W: Write>(w: &mut W, graph: &GraphData) -> Result<(), CodecError> {
    writeln!(w, "distance,source,target,x1,y1,x2,y2,classification")?;
    for (a, b, link) in graph.edges().filter(|(_, _, l)| !l.classification.is_empty()) {
        let (na, nb) = (&graph.nodes[a], &graph.nodes[b]);
        writeln!(
            w,
            "{},{},{},{},{},{},{},{}",
            link.distance,
            a,
            b,
            na.lon,
            na.lat,
            nb.lon,
            nb.lat,
            link.classification.bits()
        )?;
    }
    Ok(())
}

// =============================================================================
// Binary
// =============================================================================

pub fn write_bin<W: Write>(w: &mut W, graph: &GraphData) -> Result<(), CodecError> {
    binary::write_version(w)?;
    binary::write_bounds(w, &graph.bounds)?;
    w.write_f64::<LE>(graph.cell_size_x)?;
    w.write_f64::<LE>(graph.cell_size_y)?;
    write_count(w, graph.count_x)?;
    write_count(w, graph.count_y)?;
    binary::write_metadata(w, &graph.metadata)?;

    write_count(w, graph.nodes.len())?;
    for node in &graph.nodes {
        w.write_f64::<LE>(node.lon)?;
        w.write_f64::<LE>(node.lat)?;
        w.write_u8(node.classification.bits())?;
        w.write_u8(node.cell.is_highway() as u8)?;
        w.write_u32::<LE>(node.cell.index())?;
    }

    write_count(w, graph.edge_count())?;
    for (a, b, link) in graph.edges() {
        w.write_u32::<LE>(a as u32)?;
        w.write_u32::<LE>(b as u32)?;
        w.write_f32::<LE>(link.distance)?;
        w.write_u8(link.classification.bits())?;
    }
    Ok(())
}

/// Reads bounds and raster geometry only. The returned graph is unloaded.
pub fn read_bin_header<R: Read>(r: &mut R) -> Result<GraphData, CodecError> {
    binary::read_version(r)?;
    let bounds = binary::read_bounds(r)?;
    let cell_size_x = r.read_f64::<LE>()?;
    let cell_size_y = r.read_f64::<LE>()?;
    let mut graph = GraphData::new(bounds, cell_size_x, cell_size_y);
    graph.count_x = read_count(r)?;
    graph.count_y = read_count(r)?;
    graph.metadata = binary::read_metadata(r)?;
    Ok(graph)
}

pub fn read_bin<R: Read>(r: &mut R) -> Result<GraphData, CodecError> {
    let mut graph = read_bin_header(r)?;

    let node_count = read_count(r)?;
    graph.nodes.reserve(node_count.min(1 << 20));
    for _ in 0..node_count {
        let lon = r.read_f64::<LE>()?;
        let lat = r.read_f64::<LE>()?;
        let classification = Classification::from_bits(r.read_u8()? as u32);
        let highway = r.read_u8()? != 0;
        let index = r.read_u32::<LE>()?;
        let cell = if highway {
            NodeCell::Highway(index)
        } else {
            NodeCell::Surface(index)
        };
        graph.push_node(GraphNode::new(lon, lat, classification, cell));
    }

    let edge_count = read_count(r)?;
    for _ in 0..edge_count {
        let a = r.read_u32::<LE>()? as usize;
        let b = r.read_u32::<LE>()? as usize;
        let distance = r.read_f32::<LE>()?;
        let classification = Classification::from_bits(r.read_u8()? as u32);
        if a >= node_count || b >= node_count {
            return Err(CodecError::invalid(format!(
                "edge {}-{} refers to a missing node",
                a, b
            )));
        }
        graph.add_link(a, b, distance, classification);
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const P: Classification = Classification::PRIMARY;

    /// Nodes on a unit lattice: id = x + 10 * y, position (x, -y).
    fn at(id: i64) -> (f64, f64) {
        ((id % 10) as f64, -((id / 10) as f64))
    }

    fn edge(builder: &mut GraphBuilder, a: i64, b: i64, distance: f32, c: Classification) {
        builder.add_edge(a, b, at(a), at(b), distance, c);
    }

    fn road_nodes(graph: &GraphData) -> usize {
        graph
            .nodes
            .iter()
            .filter(|n| !n.classification.is_empty())
            .count()
    }

    fn road_edges(graph: &GraphData) -> usize {
        graph
            .edges()
            .filter(|(_, _, l)| !l.classification.is_empty())
            .count()
    }

    #[test]
    fn test_duplicate_edges_merge_with_shorter_distance() {
        let mut builder = GraphBuilder::new();
        edge(&mut builder, 0, 1, 10.0, P);
        edge(&mut builder, 0, 1, 4.0, P);
        edge(&mut builder, 1, 0, 6.0, P);
        let (graph, _) = builder.build("test").unwrap();

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.nodes[0].links[0].distance, 4.0);
    }

    #[test]
    fn test_multi_bit_edge_is_split_per_bit() {
        let mut builder = GraphBuilder::new();
        edge(
            &mut builder,
            0,
            1,
            1.0,
            Classification::PRIMARY | Classification::SECONDARY,
        );
        let (graph, _) = builder.build("test").unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(
            graph.nodes[0].classification,
            Classification::PRIMARY | Classification::SECONDARY
        );
    }

    #[test]
    fn test_cell_size_and_indices() {
        let mut builder = GraphBuilder::new();
        edge(&mut builder, 0, 1, 1.0, P);
        edge(&mut builder, 1, 11, 1.0, P);
        let (graph, _) = builder.build("test").unwrap();

        assert_eq!(graph.cell_size_x, 1.0);
        assert_eq!(graph.cell_size_y, 1.0);
        assert_eq!(graph.bounds, Bounds::new(-0.5, 1.5, 0.5, -1.5));
        assert_eq!((graph.count_x, graph.count_y), (2, 2));
        let cells: Vec<_> = graph.nodes.iter().map(|n| n.cell).collect();
        // The empty cell 2 is filled last
        assert_eq!(
            cells,
            vec![
                NodeCell::Surface(0),
                NodeCell::Surface(1),
                NodeCell::Surface(3),
                NodeCell::Surface(2)
            ]
        );
    }

    #[test]
    fn test_near_zero_deltas_are_ignored() {
        let mut builder = GraphBuilder::new();
        builder.add_edge(1, 2, (0.0, 0.0), (0.5, 0.000001), 1.0, P);
        builder.add_edge(2, 3, (0.5, 0.000001), (1.0, 0.25), 1.0, P);
        let (graph, _) = builder.build("test").unwrap();
        assert_eq!(graph.cell_size_x, 0.5);
        assert!((graph.cell_size_y - 0.249999).abs() < 1e-9);
    }

    #[test]
    fn test_long_edges_are_pruned() {
        let mut builder = GraphBuilder::new();
        edge(&mut builder, 0, 1, 1.0, P);
        edge(&mut builder, 1, 2, 1.0, P);
        edge(&mut builder, 2, 3, 1.0, P);
        // Spans three cells
        edge(&mut builder, 0, 3, 1.0, Classification::OTHER);
        // Only connected through a long edge
        edge(&mut builder, 3, 6, 1.0, Classification::SECONDARY);
        let (graph, report) = builder.build("test").unwrap();

        assert_eq!(report.pruned_edges, 2);
        assert_eq!(report.pruned_nodes, 1);
        assert_eq!(road_nodes(&graph), 4);
        assert_eq!(road_edges(&graph), 3);
        for (a, b, _) in graph.edges() {
            assert!(is_moore_neighbour(&graph, graph.nodes[a].cell, graph.nodes[b].cell));
        }
        // The isolated node's cell now holds a potential node
        assert_eq!(report.potential_nodes, 3);
        let far = graph.cell_index(6.0, 0.0);
        let filler = graph.node_at(NodeCell::Surface(far)).unwrap();
        assert!(graph.nodes[filler].classification.is_empty());
    }

    #[test]
    fn test_diagonal_edges_survive_pruning() {
        let mut builder = GraphBuilder::new();
        edge(&mut builder, 0, 11, 1.4, P);
        edge(&mut builder, 11, 2, 1.4, P);
        let (graph, report) = builder.build("test").unwrap();
        assert_eq!(report.pruned_edges, 0);
        assert_eq!(road_edges(&graph), 2);
    }

    #[test]
    fn test_row_wrap_edge_is_pruned() {
        let mut builder = GraphBuilder::new();
        edge(&mut builder, 0, 1, 1.0, P);
        edge(&mut builder, 1, 2, 1.0, P);
        // Last cell of row 0 to first cell of row 1: index delta of 1
        edge(&mut builder, 2, 10, 1.0, Classification::OTHER);
        let (graph, report) = builder.build("test").unwrap();

        assert_eq!(graph.count_x, 3);
        let wrap = (graph.cell_index(2.0, 0.0), graph.cell_index(0.0, -1.0));
        assert_eq!(wrap.1 - wrap.0, 1);
        assert_eq!(report.pruned_edges, 1);
        assert_eq!(road_edges(&graph), 2);
    }

    #[test]
    fn test_potential_network_fills_empty_cells() {
        let mut builder = GraphBuilder::new();
        // One diagonal road across a 3x3 raster
        edge(&mut builder, 0, 11, 1.4, P);
        edge(&mut builder, 11, 22, 1.4, P);
        let (graph, report) = builder.build("test").unwrap();

        assert_eq!((graph.count_x, graph.count_y), (3, 3));
        assert_eq!(report.potential_nodes, 6);
        assert_eq!(graph.nodes.len(), 9);
        for cell in 0..9 {
            assert!(graph.node_at(NodeCell::Surface(cell)).is_some());
        }

        // Top middle cell: centred, linked to all five cells around it
        let top = graph.node_at(NodeCell::Surface(1)).unwrap();
        let node = &graph.nodes[top];
        assert!(node.classification.is_empty());
        assert_eq!((node.lon, node.lat), (1.0, 0.0));
        assert_eq!(node.links.len(), 5);
        assert!(node
            .links
            .iter()
            .all(|l| l.classification == Classification::NONE));

        let road = graph.node_at(NodeCell::Surface(0)).unwrap();
        let across = node.links.iter().find(|l| l.node == road).unwrap();
        assert!((across.distance - 111_319.49).abs() < 1.0);
        let below = graph.node_at(NodeCell::Surface(4)).unwrap();
        let down = node.links.iter().find(|l| l.node == below).unwrap();
        assert!(down.distance > 111_000.0 && down.distance < across.distance * 1.01);
        let diagonal = graph.node_at(NodeCell::Surface(3)).unwrap();
        let corner = node.links.iter().find(|l| l.node == diagonal).unwrap();
        assert!(corner.distance > across.distance * 1.4);

        // Road links are untouched and every link joins adjacent cells
        assert_eq!(road_edges(&graph), 2);
        for (a, b, _) in graph.edges() {
            assert!(is_moore_neighbour(&graph, graph.nodes[a].cell, graph.nodes[b].cell));
        }
    }

    #[test]
    fn test_full_raster_has_no_potential_nodes() {
        let mut builder = GraphBuilder::new();
        edge(&mut builder, 0, 1, 1.0, P);
        let (graph, report) = builder.build("test").unwrap();
        assert_eq!(report.potential_nodes, 0);
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn test_highway_link_rehomed_and_node_deleted() {
        let mut builder = GraphBuilder::new();
        // Highway 0-1-2 and a ramp node at the position of 1
        edge(&mut builder, 0, 1, 1.0, Classification::HIGHWAY);
        edge(&mut builder, 1, 2, 1.0, Classification::HIGHWAY);
        edge(&mut builder, 1, 11, 1.0, Classification::HIGHWAY_LINK);
        let (graph, report) = builder.build("test").unwrap();

        assert_eq!(report.rehomed_links, 1);
        assert_eq!(report.merged_nodes, 1);
        // Three highway nodes plus the ramp end at 11
        assert_eq!(road_nodes(&graph), 4);

        let cell = graph.cell_index(1.0, 0.0);
        let hub = graph.node_at(NodeCell::Highway(cell)).unwrap();
        assert!(graph.node_at(NodeCell::Surface(cell)).is_none());
        assert!(graph.nodes[hub]
            .classification
            .contains(Classification::HIGHWAY_LINK));
        assert!(graph.nodes[hub]
            .links
            .iter()
            .any(|l| l.classification == Classification::HIGHWAY_LINK));
    }

    #[test]
    fn test_highway_link_bit_cleared_when_edges_remain() {
        let mut builder = GraphBuilder::new();
        edge(&mut builder, 0, 1, 1.0, Classification::HIGHWAY);
        edge(&mut builder, 1, 11, 1.0, Classification::HIGHWAY_LINK);
        edge(&mut builder, 1, 2, 1.0, Classification::OTHER);
        let (graph, _) = builder.build("test").unwrap();

        let cell = graph.cell_index(1.0, 0.0);
        let surface = graph.node_at(NodeCell::Surface(cell)).unwrap();
        let node = &graph.nodes[surface];
        assert!(!node.classification.contains(Classification::HIGHWAY_LINK));
        assert!(node.classification.contains(Classification::OTHER));
        let road_links = node.links.iter().filter(|l| !l.classification.is_empty());
        assert_eq!(road_links.count(), 1);
    }

    #[test]
    fn test_highway_split_uses_separate_network() {
        let mut builder = GraphBuilder::new();
        edge(
            &mut builder,
            0,
            1,
            2.0,
            Classification::HIGHWAY | Classification::PRIMARY,
        );
        let (graph, _) = builder.build("test").unwrap();
        assert_eq!(graph.nodes.len(), 4);
        let highway_nodes = graph.nodes.iter().filter(|n| n.cell.is_highway()).count();
        assert_eq!(highway_nodes, 2);
    }

    #[test]
    fn test_empty_graph_is_error() {
        let builder = GraphBuilder::new();
        assert!(matches!(builder.build("empty"), Err(CodecError::InvalidData(_))));
    }

    #[test]
    fn test_read_csv_skips_header_and_self_loops() {
        let text = "\
distance,source,target,x1,y1,x2,y2,classification
10,1,2,103.80,1.30,103.81,1.30,4
5,2,2,103.81,1.30,103.81,1.30,4
7,2,3,103.81,1.30,103.81,1.31,2
";
        let graph = read_csv(Cursor::new(text), "roads").unwrap();
        assert_eq!(road_nodes(&graph), 3);
        assert_eq!(road_edges(&graph), 2);
    }

    #[test]
    fn test_csv_export_leaves_out_potential_links() {
        let mut builder = GraphBuilder::new();
        edge(&mut builder, 0, 11, 1.4, P);
        let (graph, report) = builder.build("test").unwrap();
        assert_eq!(report.potential_nodes, 2);

        let mut buf = Vec::new();
        write_csv(&mut buf, &graph).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);

        let reread = read_csv(Cursor::new(text), "export").unwrap();
        assert_eq!(reread.nodes.len(), graph.nodes.len());
        assert_eq!(reread.edge_count(), graph.edge_count());
    }

    #[test]
    fn test_binary_round_trip() {
        let mut builder = GraphBuilder::new();
        edge(&mut builder, 0, 1, 1.0, Classification::HIGHWAY | P);
        edge(&mut builder, 1, 11, 2.5, Classification::OTHER);
        let (mut graph, _) = builder.build("test").unwrap();
        graph.metadata.add("Source", "OSM").unwrap();

        let mut buf = Vec::new();
        write_bin(&mut buf, &graph).unwrap();
        let decoded = read_bin(&mut Cursor::new(&buf)).unwrap();

        assert_eq!(decoded.bounds, graph.bounds);
        assert_eq!(decoded.nodes, graph.nodes);
        assert_eq!(decoded.metadata, graph.metadata);
        assert_eq!(decoded.count_x, graph.count_x);

        let header = read_bin_header(&mut Cursor::new(&buf)).unwrap();
        assert!(!header.is_loaded());
        assert_eq!(header.cell_size_x, graph.cell_size_x);
    }
}

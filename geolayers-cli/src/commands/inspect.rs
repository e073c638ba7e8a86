//! `inspect` - print a patch file summary as JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use geolayers::data::{Bounds, Coloring, PatchData, PatchKind};
use geolayers::filename::PatchFilename;
use geolayers::io::{self, PatchFormat};

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct PatchReport {
    pub file: PathBuf,
    pub format: &'static str,
    pub kind: PatchKind,
    pub layer: String,
    pub level: char,
    pub site: String,
    pub patch_index: u32,
    pub date: String,
    pub bounds: Bounds,
    pub metadata: BTreeMap<String, String>,
    pub summary: KindSummary,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum KindSummary {
    Grid {
        count_x: usize,
        count_y: usize,
        valid_cells: usize,
        min_value: f32,
        max_value: f32,
        units: String,
        coloring: Coloring,
        categories: Vec<String>,
    },
    Point {
        count: usize,
        min_value: f32,
        max_value: f32,
        units: String,
        categories: Vec<String>,
    },
    Graph {
        nodes: usize,
        edges: usize,
        count_x: usize,
        count_y: usize,
    },
    MultiGrid {
        coloring: Coloring,
        grids: Vec<String>,
    },
}

pub fn run(path: &Path) -> Result<(), CliError> {
    let report = inspect(path)?;
    let json = serde_json::to_string_pretty(&report).map_err(|e| CliError::Output(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

pub fn inspect(path: &Path) -> Result<PatchReport, CliError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (filename, format) =
        PatchFilename::parse_with_format(&name).map_err(|error| CliError::Filename {
            path: path.to_path_buf(),
            error,
        })?;
    let data = io::read_file(filename.kind, path).map_err(|error| CliError::Codec {
        path: path.to_path_buf(),
        error,
    })?;

    Ok(PatchReport {
        file: path.to_path_buf(),
        format: match format {
            PatchFormat::Csv => "csv",
            PatchFormat::Bin => "bin",
        },
        kind: data.kind(),
        layer: filename.layer.clone(),
        level: filename.level_letter(),
        site: filename.site.clone(),
        patch_index: filename.patch_index,
        date: filename.date.to_string(),
        bounds: data.bounds(),
        metadata: data
            .metadata()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        summary: summarize(&data),
    })
}

fn summarize(data: &PatchData) -> KindSummary {
    match data {
        PatchData::Grid(grid) => KindSummary::Grid {
            count_x: grid.count_x,
            count_y: grid.count_y,
            valid_cells: grid.valid_values().count(),
            min_value: grid.min_value,
            max_value: grid.max_value,
            units: grid.units.clone(),
            coloring: grid.coloring,
            categories: grid.categories.iter().map(|c| c.name.clone()).collect(),
        },
        PatchData::Point(points) => KindSummary::Point {
            count: points.count,
            min_value: points.min_value,
            max_value: points.max_value,
            units: points.units.clone(),
            categories: points.categories.iter().map(|c| c.name.clone()).collect(),
        },
        PatchData::Graph(graph) => KindSummary::Graph {
            nodes: graph.nodes.len(),
            edges: graph.edge_count(),
            count_x: graph.count_x,
            count_y: graph.count_y,
        },
        PatchData::MultiGrid(multi) => KindSummary::MultiGrid {
            coloring: multi.coloring,
            grids: multi.categories.iter().map(|c| c.name.clone()).collect(),
        },
    }
}

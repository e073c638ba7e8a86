//! Layer groups and colors from `layers.csv`.
//!
//! ```text
//! Type,Name,R,G,B
//! Group,Demographics,200,120,40
//! Layer,Population,255,0,0
//! Layer,Households,,,        <- inherits the group color
//! Layer,Schools,0,0,255,Amenities   <- explicit group
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::ConfigError;
use crate::category::Color;
use crate::model::{Catalog, LayerId, DEFAULT_GROUP};

/// File name of the layer config in the data root.
pub const LAYERS_FILE: &str = "layers.csv";

const DEFAULT_GROUP_COLOR: Color = Color::from_rgb(128, 128, 128);

#[derive(Debug, Clone, PartialEq)]
pub struct LayerEntry {
    pub name: String,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerGroup {
    pub name: String,
    pub color: Color,
    pub layers: Vec<LayerEntry>,
}

/// Ordered layer groups. Empty groups are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerConfig {
    pub groups: Vec<LayerGroup>,
}

impl LayerConfig {
    /// Reads `layers.csv` from the data root. A missing file gives an empty
    /// config.
    pub fn load_from_dir(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(LAYERS_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No layer config");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parses layer config text. `path` is used in error messages only.
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut groups: Vec<LayerGroup> = Vec::new();
        let mut current = LayerGroup {
            name: DEFAULT_GROUP.to_string(),
            color: DEFAULT_GROUP_COLOR,
            layers: Vec::new(),
        };

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            match cells[0] {
                "Group" => {
                    let name = required_name(&cells, path, line_no)?;
                    let color = read_color(&cells).unwrap_or(DEFAULT_GROUP_COLOR);
                    let previous = std::mem::replace(
                        &mut current,
                        LayerGroup {
                            name: name.to_string(),
                            color,
                            layers: Vec::new(),
                        },
                    );
                    push_group(&mut groups, previous);
                }
                "Layer" => {
                    let name = required_name(&cells, path, line_no)?;
                    let entry = LayerEntry {
                        name: name.to_string(),
                        color: read_color(&cells).unwrap_or(current.color),
                    };
                    match cells.get(5).filter(|g| !g.is_empty()) {
                        Some(&group) if group != current.name => {
                            add_to_named(&mut groups, group, entry);
                        }
                        _ => current.layers.push(entry),
                    }
                }
                // Header row
                "Type" if line_no == 1 => {}
                other => warn!(
                    file = %path.display(),
                    line = line_no,
                    kind = other,
                    "Unsupported layer config row"
                ),
            }
        }
        push_group(&mut groups, current);

        Ok(Self { groups })
    }

    pub fn layer_count(&self) -> usize {
        self.groups.iter().map(|g| g.layers.len()).sum()
    }

    /// Creates every configured layer in the catalog, in file order. A layer
    /// listed twice keeps its first entry.
    pub fn apply(&self, catalog: &mut Catalog) -> Vec<LayerId> {
        let mut ids = Vec::with_capacity(self.layer_count());
        for group in &self.groups {
            for entry in &group.layers {
                if catalog.layer_by_name(&entry.name).is_some() {
                    warn!(layer = %entry.name, "Duplicate layer in layer config");
                    continue;
                }
                ids.push(catalog.add_layer(&entry.name, entry.color, &group.name));
            }
        }
        ids
    }
}

fn required_name<'a>(cells: &[&'a str], path: &Path, line: usize) -> Result<&'a str, ConfigError> {
    match cells.get(1) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(ConfigError::InvalidRow {
            file: PathBuf::from(path),
            line,
            reason: format!("{} row has no name", cells[0]),
        }),
    }
}

fn read_color(cells: &[&str]) -> Option<Color> {
    let channel = |i: usize| cells.get(i)?.parse::<u8>().ok();
    Some(Color::from_rgb(channel(2)?, channel(3)?, channel(4)?))
}

fn push_group(groups: &mut Vec<LayerGroup>, group: LayerGroup) {
    if group.layers.is_empty() {
        return;
    }
    match groups.iter_mut().find(|g| g.name == group.name) {
        Some(existing) => existing.layers.extend(group.layers),
        None => groups.push(group),
    }
}

fn add_to_named(groups: &mut Vec<LayerGroup>, name: &str, entry: LayerEntry) {
    match groups.iter_mut().find(|g| g.name == name) {
        Some(group) => group.layers.push(entry),
        None => groups.push(LayerGroup {
            name: name.to_string(),
            color: DEFAULT_GROUP_COLOR,
            layers: vec![entry],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Type,Name,R,G,B
Group,Demographics,200,120,40
Layer,Population,255,0,0
Layer,Households,,,
# comment

Group,Empty,1,2,3
Group,Transport,0,0,0
Layer,Roads,10,10,10
Layer,Schools,0,0,255,Amenities
Layer,Ungrouped,0,0,0,Demographics
Bogus,x
";

    fn parse(text: &str) -> LayerConfig {
        LayerConfig::parse(text, Path::new("layers.csv")).unwrap()
    }

    #[test]
    fn test_groups_in_order_and_empty_dropped() {
        let config = parse(SAMPLE);
        let names: Vec<&str> = config.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Demographics", "Amenities", "Transport"]);
        assert_eq!(config.layer_count(), 5);
    }

    #[test]
    fn test_layer_inherits_group_color() {
        let config = parse(SAMPLE);
        let demographics = &config.groups[0];
        assert_eq!(demographics.layers[0].color, Color::from_rgb(255, 0, 0));
        assert_eq!(demographics.layers[1].color, Color::from_rgb(200, 120, 40));
        assert_eq!(demographics.layers[2].name, "Ungrouped");
    }

    #[test]
    fn test_layers_before_any_group_use_default_group() {
        let config = parse("Layer,Loose,1,1,1\n");
        assert_eq!(config.groups[0].name, DEFAULT_GROUP);
    }

    #[test]
    fn test_row_without_name_fails() {
        let err = LayerConfig::parse("Layer,,1,2,3\n", Path::new("layers.csv")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRow { line: 1, .. }));
    }

    #[test]
    fn test_apply_creates_layers_once() {
        let config = parse("Group,G,0,0,0\nLayer,pop,1,2,3\nLayer,POP,4,5,6\n");
        let mut catalog = Catalog::new();
        let ids = config.apply(&mut catalog);
        assert_eq!(ids.len(), 1);
        let layer = catalog.layer(ids[0]);
        assert_eq!(layer.group, "G");
        assert_eq!(layer.color, Color::from_rgb(1, 2, 3));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = LayerConfig::load_from_dir(temp_dir.path()).unwrap();
        assert!(config.groups.is_empty());
    }
}

//! File loaders for the CLI: sample network, label raster, observation
//! table and export rates.

pub(crate) mod observations;
mod raster;

pub use observations::ObservationTable;
pub use raster::{load_label_raster, parse_label_raster};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::network::{NodeRecord, SampleNetwork};
use crate::ElementData;

/// On-disk network description.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkFile {
    /// Sentinel receiver name marking outlets.
    pub root: String,
    pub nodes: Vec<NodeRecord>,
}

impl NetworkFile {
    pub fn into_network(self) -> Result<SampleNetwork> {
        let count = self.nodes.len();
        let network = SampleNetwork::from_records(self.nodes, &self.root)
            .with_context(|| format!("invalid sample network ({count} nodes)"))?;
        Ok(network)
    }
}

pub fn parse_network(text: &str) -> Result<SampleNetwork> {
    let file: NetworkFile = serde_json::from_str(text).context("malformed network JSON")?;
    file.into_network()
}

pub fn load_network(path: impl AsRef<Path>) -> Result<SampleNetwork> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read network file {}", path.display()))?;
    parse_network(&text).with_context(|| format!("in {}", path.display()))
}

/// Export rates as a JSON object of site name to rate.
pub fn load_export_rates(path: impl AsRef<Path>) -> Result<ElementData> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read export rates {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("malformed export rates in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_network_json() {
        let text = r###"{
            "root": "##",
            "nodes": [
                {"name": "up", "area": 2.0, "downstream": "down", "label": 1},
                {"name": "down", "area": 6.0, "downstream": "##", "label": 2}
            ]
        }"###;
        let network = parse_network(text).unwrap();
        assert_eq!(network.len(), 2);
        let up = network.index_of("up").unwrap();
        assert_eq!(network.downstream(up), network.index_of("down"));
    }

    #[test]
    fn test_topology_errors_carry_context() {
        let text = r###"{"root": "##", "nodes": [
            {"name": "a", "area": 1.0, "downstream": "nowhere", "label": 1}
        ]}"###;
        let err = parse_network(text).unwrap_err();
        assert!(format!("{err:#}").contains("nowhere"));
    }
}

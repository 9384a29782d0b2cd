//! # Sample Network
//!
//! A drainage network of sampled sub-catchments. Every node drains into at
//! most one downstream receiver; nodes without a receiver are outlets. The
//! topology is validated once at construction and never changes afterwards.
//!
//! ## Components
//!
//! - **SampleNetwork**: immutable DAG with a precomputed topological order
//! - **accumulate**: pure upstream-to-downstream flux accumulation
//! - **mixing**: forward model mixing source concentrations downstream

pub mod accumulate;
pub mod mixing;
mod topology;

pub use accumulate::{accumulate, accumulate_fluxes, Flux};
pub use mixing::{mix_concentration_map, mix_downstream, unique_upstream_areas, upstream_concentration_map};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::TopologyError;

/// Position of a node in the network's backing storage.
pub type NodeIndex = usize;

/// Node description handed over by the flow-routing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    /// Area of the sub-catchment draining uniquely to this site
    pub area: f64,
    /// Receiving node, or the synthetic root name for outlets
    pub downstream: String,
    /// Value marking this catchment in the label raster
    pub label: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleNode {
    pub name: String,
    pub area: f64,
    pub label: u32,
    /// Area divided by the mean area over all nodes, for numeric conditioning
    pub relative_area: f64,
}

#[derive(Debug, Clone)]
pub struct SampleNetwork {
    nodes: Vec<SampleNode>,
    index: HashMap<String, NodeIndex>,
    downstream: Vec<Option<NodeIndex>>,
    order: Vec<NodeIndex>,
}

impl SampleNetwork {
    /// Build a network from routing-engine records. The record named `root`
    /// (if present) is skipped, and edges into it mark outlets.
    pub fn from_records<I>(records: I, root: &str) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = NodeRecord>,
    {
        let mut builder = SampleNetworkBuilder::default();
        for record in records {
            if record.name == root {
                continue;
            }
            if record.downstream != root {
                builder.add_edge(&record.name, &record.downstream);
            }
            builder.add_node(record.name, record.area, record.label);
        }
        builder.build()
    }

    pub fn builder() -> SampleNetworkBuilder {
        SampleNetworkBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[SampleNode] {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> &SampleNode {
        &self.nodes[index]
    }

    pub fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The unique receiver of `index`, or `None` at an outlet.
    pub fn downstream(&self, index: NodeIndex) -> Option<NodeIndex> {
        self.downstream[index]
    }

    /// Every node precedes its downstream receiver in this order.
    pub fn topological_order(&self) -> &[NodeIndex] {
        &self.order
    }

    pub fn outlets(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        (0..self.nodes.len()).filter(move |&i| self.downstream[i].is_none())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Map from raster label to the node owning it.
    pub fn label_index(&self) -> HashMap<u32, NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.label, i))
            .collect()
    }

    /// `index` together with every node whose drainage passes through it.
    pub fn upstream_closure(&self, index: NodeIndex) -> Vec<NodeIndex> {
        (0..self.nodes.len())
            .filter(|&start| {
                let mut cursor = Some(start);
                while let Some(current) = cursor {
                    if current == index {
                        return true;
                    }
                    cursor = self.downstream[current];
                }
                false
            })
            .collect()
    }
}

/// Incremental construction of a [`SampleNetwork`] from nodes and edges.
#[derive(Debug, Clone, Default)]
pub struct SampleNetworkBuilder {
    nodes: Vec<(String, f64, u32)>,
    edges: Vec<(String, String)>,
}

impl SampleNetworkBuilder {
    pub fn add_node(&mut self, name: impl Into<String>, area: f64, label: u32) -> &mut Self {
        self.nodes.push((name.into(), area, label));
        self
    }

    /// Declare that `from` drains into `to`.
    pub fn add_edge(&mut self, from: &str, to: &str) -> &mut Self {
        self.edges.push((from.to_string(), to.to_string()));
        self
    }

    pub fn build(&self) -> Result<SampleNetwork, TopologyError> {
        if self.nodes.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut index = HashMap::with_capacity(self.nodes.len());
        let mut labels: HashMap<u32, &str> = HashMap::with_capacity(self.nodes.len());
        for (i, (name, area, label)) in self.nodes.iter().enumerate() {
            if !(area.is_finite() && *area > 0.0) {
                return Err(TopologyError::InvalidArea {
                    node: name.clone(),
                    area: *area,
                });
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(TopologyError::DuplicateNode(name.clone()));
            }
            if let Some(first) = labels.insert(*label, name) {
                return Err(TopologyError::DuplicateLabel {
                    label: *label,
                    first: first.to_string(),
                    second: name.clone(),
                });
            }
        }

        let mut receivers: Vec<Vec<NodeIndex>> = vec![Vec::new(); self.nodes.len()];
        for (from, to) in &self.edges {
            let f = *index
                .get(from)
                .ok_or_else(|| TopologyError::UnknownNode(from.clone()))?;
            let t = *index
                .get(to)
                .ok_or_else(|| TopologyError::UnknownNode(to.clone()))?;
            if !receivers[f].contains(&t) {
                receivers[f].push(t);
            }
        }

        let mut downstream = Vec::with_capacity(self.nodes.len());
        for (i, targets) in receivers.iter().enumerate() {
            match targets.as_slice() {
                [] => downstream.push(None),
                [t] => downstream.push(Some(*t)),
                many => {
                    let mut names: Vec<String> =
                        many.iter().map(|&t| self.nodes[t].0.clone()).collect();
                    names.sort();
                    return Err(TopologyError::MultipleDownstream {
                        node: self.nodes[i].0.clone(),
                        receivers: names,
                    });
                }
            }
        }

        let order = topology::topological_order(&downstream)
            .map_err(|i| TopologyError::Cycle(self.nodes[i].0.clone()))?;

        let mean_area =
            self.nodes.iter().map(|(_, a, _)| a).sum::<f64>() / self.nodes.len() as f64;
        let nodes = self
            .nodes
            .iter()
            .map(|(name, area, label)| SampleNode {
                name: name.clone(),
                area: *area,
                label: *label,
                relative_area: area / mean_area,
            })
            .collect();

        Ok(SampleNetwork {
            nodes,
            index,
            downstream,
            order,
        })
    }
}

//! Forward model: mix known source concentrations down the network.
//!
//! Used to build synthetic observations and to turn per-site predictions
//! back into rasters.

use ndarray::Array2;
use std::collections::BTreeMap;

use super::{accumulate, Flux, SampleNetwork};
use crate::error::ConfigError;
use crate::ElementData;

/// Predict the downstream concentration at every site from per-site upstream
/// concentrations. Export rates default to 1 everywhere when omitted.
pub fn mix_downstream(
    network: &SampleNetwork,
    upstream: &ElementData,
    export_rates: Option<&ElementData>,
) -> Result<ElementData, ConfigError> {
    let mut tracer = Vec::with_capacity(network.len());
    let mut rates = Vec::with_capacity(network.len());
    for node in network.nodes() {
        let value = upstream
            .get(&node.name)
            .copied()
            .ok_or_else(|| ConfigError::MissingUpstream(node.name.clone()))?;
        tracer.push(value);

        let rate = match export_rates {
            Some(map) => map
                .get(&node.name)
                .copied()
                .ok_or_else(|| ConfigError::MissingExportRate(node.name.clone()))?,
            None => 1.0,
        };
        rates.push(rate);
    }

    let totals = accumulate(network, |i, node| {
        let flux = node.area * rates[i];
        Flux::new(flux, flux * tracer[i])
    });

    Ok(network
        .names()
        .map(str::to_string)
        .zip(totals.iter().map(Flux::concentration))
        .collect())
}

/// Mix a concentration raster: each site's source value is the mean of the
/// raster over its unique upstream area. Returns `(downstream, upstream)`.
pub fn mix_concentration_map(
    network: &SampleNetwork,
    areas: &BTreeMap<String, Array2<bool>>,
    concentration_map: &Array2<f64>,
    export_rates: Option<&ElementData>,
) -> Result<(ElementData, ElementData), ConfigError> {
    let mut upstream = ElementData::new();
    for node in network.nodes() {
        let mask = areas
            .get(&node.name)
            .ok_or_else(|| ConfigError::MissingUpstream(node.name.clone()))?;
        let (sum, count) = mask
            .iter()
            .zip(concentration_map.iter())
            .filter(|(inside, _)| **inside)
            .fold((0.0, 0usize), |(s, c), (_, v)| (s + v, c + 1));
        let mean = if count == 0 { f64::NAN } else { sum / count as f64 };
        upstream.insert(node.name.clone(), mean);
    }

    let downstream = mix_downstream(network, &upstream, export_rates)?;
    Ok((downstream, upstream))
}

/// Boolean mask of the pixels draining uniquely to each site.
pub fn unique_upstream_areas(
    network: &SampleNetwork,
    labels: &Array2<u32>,
) -> BTreeMap<String, Array2<bool>> {
    network
        .nodes()
        .iter()
        .map(|node| (node.name.clone(), labels.mapv(|l| l == node.label)))
        .collect()
}

/// Paint per-site values onto their upstream areas. Unclaimed pixels are 0.
pub fn upstream_concentration_map(
    areas: &BTreeMap<String, Array2<bool>>,
    predictions: &ElementData,
) -> Result<Array2<f64>, ConfigError> {
    let shape = match areas.values().next() {
        Some(mask) => mask.raw_dim(),
        None => return Ok(Array2::zeros((0, 0))),
    };
    let mut out = Array2::<f64>::zeros(shape);

    for (site, value) in predictions {
        let mask = areas.get(site).ok_or_else(|| ConfigError::UnknownSite {
            site: site.clone(),
            input: "upstream predictions",
        })?;
        out.zip_mut_with(mask, |o, &inside| {
            if inside {
                *o += value;
            }
        });
    }
    Ok(out)
}

use anyhow::{bail, Context, Result};
use catchment_unmix::{config, input, telemetry, unmix};
use catchment_unmix::{ElementData, MixingProblem, SolverChoice, UpstreamPrediction};
use config::Config;
use input::ObservationTable;
use serde::Serialize;
use std::collections::BTreeMap;
use telemetry::init_tracing;
use tracing::{info, warn};
use unmix::{ElementResult, RegularizationTrial, SampleSummary};

#[derive(Debug, Serialize)]
struct ElementReport {
    element: String,
    observed: ElementData,
    downstream: ElementData,
    /// Per-site upstream values; absent for the continuous formulation
    upstream: Option<ElementData>,
    misfit: f64,
    roughness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    monte_carlo: Option<MonteCarloReport>,
}

#[derive(Debug, Serialize)]
struct MonteCarloReport {
    failed_repeats: usize,
    downstream: BTreeMap<String, SampleSummary>,
    upstream: Option<BTreeMap<String, SampleSummary>>,
}

#[derive(Debug, Serialize)]
struct Report {
    solver: String,
    elements: Vec<ElementReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    regularization_sweep: Option<Vec<RegularizationTrial>>,
}

fn build_problem(cfg: &Config) -> Result<MixingProblem> {
    let network = input::load_network(&cfg.input.network)?;
    let mut builder = MixingProblem::builder(network).regularized(cfg.problem.regularize);

    if cfg.problem.continuous {
        let path = cfg
            .input
            .labels
            .as_ref()
            .context("continuous formulation needs input.labels")?;
        let labels = input::load_label_raster(path)?;
        let (Some(nx), Some(ny)) = (cfg.problem.nx, cfg.problem.ny) else {
            bail!("continuous formulation needs problem.nx and problem.ny");
        };
        builder = builder.continuous(labels, nx, ny);
    }

    Ok(builder.build()?)
}

fn report_element(
    cfg: &Config,
    problem: &MixingProblem,
    export_rates: Option<&ElementData>,
    result: ElementResult,
) -> Result<ElementReport> {
    let monte_carlo = if cfg.monte_carlo.enabled {
        let samples = problem.solve_monte_carlo(
            &result.observed,
            export_rates,
            cfg.problem.regularization_strength,
            &cfg.monte_carlo.settings,
            &cfg.solver,
        )?;
        Some(MonteCarloReport {
            failed_repeats: samples.failed_repeats,
            downstream: samples.downstream_summary(),
            upstream: samples.upstream_summary(),
        })
    } else {
        None
    };

    let upstream = match result.solution.upstream {
        UpstreamPrediction::Sites(sites) => Some(sites),
        UpstreamPrediction::Map(_) => None,
    };

    Ok(ElementReport {
        element: result.element,
        observed: result.observed,
        downstream: result.solution.downstream,
        upstream,
        misfit: result.solution.misfit,
        roughness: result.solution.roughness,
        monte_carlo,
    })
}

fn main() -> Result<()> {
    init_tracing();

    let mut cfg = Config::load()?;
    if let Some(choice) = std::env::args().nth(1) {
        cfg.solver.choice = choice
            .parse::<SolverChoice>()
            .with_context(|| format!("unknown solver '{choice}'"))?;
    }

    let problem = build_problem(&cfg)?;
    let mut table = ObservationTable::from_path(
        &cfg.input.observations,
        cfg.input.delimiter,
        &cfg.input.sample_column,
    )?;
    table.exclude(&cfg.input.excluded_elements);
    let export_rates = cfg
        .input
        .export_rates
        .as_ref()
        .map(input::load_export_rates)
        .transpose()?;

    info!(
        solver = %cfg.solver.choice,
        sites = problem.network().len(),
        continuous = problem.is_continuous(),
        "starting catchment unmixing"
    );

    let results = unmix::sweep_elements(
        &problem,
        &table,
        export_rates.as_ref(),
        cfg.problem.regularization_strength,
        &cfg.solver,
    )?;

    let mut elements = Vec::with_capacity(results.len());
    for result in results {
        elements.push(report_element(&cfg, &problem, export_rates.as_ref(), result)?);
    }

    let regularization_sweep = match &cfg.regularization_sweep {
        Some(sweep) => {
            let observed = table
                .element(&sweep.element)
                .with_context(|| format!("sweep element '{}' not in table", sweep.element))?;
            let strengths = unmix::log_spaced(sweep.min_exponent, sweep.max_exponent, sweep.trials);
            Some(unmix::sweep_regularization(
                &problem,
                &observed,
                export_rates.as_ref(),
                &strengths,
                &cfg.solver,
            )?)
        }
        None => None,
    };

    if elements.is_empty() {
        warn!("no element produced a solution");
    }

    let report = Report {
        solver: cfg.solver.choice.to_string(),
        elements,
        regularization_sweep,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

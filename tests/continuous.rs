//! Spatially continuous formulation over a small label raster.

use catchment_unmix::network::NodeRecord;
use catchment_unmix::{
    ElementData, GridError, MixingProblem, SampleNetwork, SolverChoice, SolverError,
    SolverSettings, UnmixError,
};
use ndarray::{array, Array2};

fn network() -> SampleNetwork {
    let records = vec![
        NodeRecord { name: "west".into(), area: 8.0, downstream: "east".into(), label: 1 },
        NodeRecord { name: "east".into(), area: 8.0, downstream: "##".into(), label: 2 },
    ];
    SampleNetwork::from_records(records, "##").unwrap()
}

fn labels() -> Array2<u32> {
    array![
        [1, 1, 2, 2],
        [1, 1, 2, 2],
        [1, 1, 2, 2],
        [1, 1, 2, 2],
        [0, 0, 0, 0],
    ]
}

fn uniform(value: f64) -> ElementData {
    [("west".to_string(), value), ("east".to_string(), value)]
        .into_iter()
        .collect()
}

#[test]
fn test_uniform_observations_give_uniform_map() {
    let problem = MixingProblem::builder(network())
        .continuous(labels(), 4, 5)
        .regularized(true)
        .build()
        .unwrap();

    let solution = problem
        .solve(&uniform(7.0), None, Some(1.0), &SolverSettings::default())
        .unwrap();
    let map = solution.upstream.as_map().unwrap();

    assert_eq!(map.dim(), (5, 4));
    for x in 0..4 {
        for y in 0..4 {
            assert!((map[[y, x]] - 7.0).abs() < 1e-4, "cell ({x}, {y}) = {}", map[[y, x]]);
        }
        assert!(map[[4, x]].is_nan());
    }
    assert!(solution.roughness.unwrap() < 1e-4);
    for value in solution.downstream.values() {
        assert!((value - 7.0).abs() < 1e-4);
    }
}

#[test]
fn test_coarse_grid_blocks_cover_raster() {
    let problem = MixingProblem::builder(network())
        .continuous(labels(), 2, 1)
        .build()
        .unwrap();

    let solution = problem
        .solve(&uniform(3.0), None, None, &SolverSettings::default())
        .unwrap();
    let map = solution.upstream.as_map().unwrap();

    // One cell per catchment, each spanning the full raster height
    assert!((map[[0, 0]] - 3.0).abs() < 1e-5);
    assert!((map[[4, 3]] - 3.0).abs() < 1e-5);
}

#[test]
fn test_under_resolved_grid_rejected() {
    let err = MixingProblem::builder(network())
        .continuous(labels(), 1, 5)
        .build()
        .unwrap_err();
    assert_eq!(err, GridError::UnderResolved(vec!["west".into()]));
}

#[test]
fn test_fine_grid_solves_with_default_backend() {
    let labels = Array2::from_shape_fn((48, 48), |(_, x)| if x < 24 { 1 } else { 2 });
    let problem = MixingProblem::builder(network())
        .continuous(labels, 24, 24)
        .regularized(true)
        .build()
        .unwrap();

    let solution = problem
        .solve(&uniform(7.0), None, Some(0.1), &SolverSettings::default())
        .unwrap();
    let map = solution.upstream.as_map().unwrap();

    assert_eq!(map.dim(), (48, 48));
    assert!(map.iter().all(|v| (v - 7.0).abs() < 1e-4));

    // The dense barrier is kept to small discrete problems
    let err = problem
        .solve(&uniform(7.0), None, Some(0.1), &SolverSettings::with_choice(SolverChoice::Barrier))
        .unwrap_err();
    assert!(matches!(err, UnmixError::Solver(SolverError::Unsupported(_))));
}

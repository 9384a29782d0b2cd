//! # Inversion Grid
//!
//! A regular `nx × ny` grid laid over the catchment-label raster for the
//! spatially continuous formulation. Each cell covers a rectangle of pixels
//! and belongs to the catchment found at the pixel under its centre.
//!
//! Cells straddling two catchments are assigned wholly to the one under the
//! centre pixel. This is a resolution-dependent approximation: the share of
//! misassigned area shrinks as the grid is refined.

use ndarray::Array2;
use std::collections::BTreeSet;

use crate::error::GridError;
use crate::network::{NodeIndex, SampleNetwork};

/// One rectangle of the inversion grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
    /// Index of the cell to the left, if any
    pub left: Option<usize>,
    /// Index of the cell above, if any
    pub top: Option<usize>,
    /// Owning sample site, `None` when the centre lies outside every catchment
    pub site: Option<NodeIndex>,
}

impl GridCell {
    pub fn is_inside(&self) -> bool {
        self.site.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct InverseGrid {
    nx: usize,
    ny: usize,
    width: usize,
    height: usize,
    /// Row-major, `ny` rows of `nx` cells
    cells: Vec<GridCell>,
    site_cells: Vec<Vec<usize>>,
}

impl InverseGrid {
    pub fn new(
        nx: usize,
        ny: usize,
        labels: &Array2<u32>,
        network: &SampleNetwork,
    ) -> Result<Self, GridError> {
        if nx == 0 || ny == 0 {
            return Err(GridError::NonPositiveResolution { nx, ny });
        }
        let (height, width) = labels.dim();
        if nx > width || ny > height {
            return Err(GridError::ExceedsRaster { nx, ny, width, height });
        }

        let label_index = network.label_index();
        let xstep = width as f64 / nx as f64;
        let ystep = height as f64 / ny as f64;

        let mut cells = Vec::with_capacity(nx * ny);
        let mut site_cells = vec![Vec::new(); network.len()];
        for j in 0..ny {
            let y = ((j as f64 + 0.5) * ystep) as usize;
            for i in 0..nx {
                let x = ((i as f64 + 0.5) * xstep) as usize;
                let label = labels[[y.min(height - 1), x.min(width - 1)]];
                let site = match label {
                    0 => None,
                    l => Some(*label_index.get(&l).ok_or(GridError::UnknownLabel(l))?),
                };

                let index = j * nx + i;
                if let Some(s) = site {
                    site_cells[s].push(index);
                }
                cells.push(GridCell {
                    left: (i > 0).then(|| index - 1),
                    top: (j > 0).then(|| index - nx),
                    site,
                });
            }
        }

        // Any claimed label must resolve to a node, even if no centre hit it
        let raster_labels: BTreeSet<u32> = labels.iter().copied().filter(|&l| l != 0).collect();
        if let Some(&unknown) = raster_labels.iter().find(|l| !label_index.contains_key(l)) {
            return Err(GridError::UnknownLabel(unknown));
        }

        let missing: Vec<String> = site_cells
            .iter()
            .enumerate()
            .filter(|(_, owned)| owned.is_empty())
            .map(|(s, _)| network.node(s).name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(GridError::UnderResolved(missing));
        }

        Ok(Self {
            nx,
            ny,
            width,
            height,
            cells,
            site_cells,
        })
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Raster shape as `(height, width)`.
    pub fn raster_dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn cell(&self, i: usize, j: usize) -> &GridCell {
        &self.cells[j * self.nx + i]
    }

    /// Cells owned by the site at `site`.
    pub fn site_cells(&self, site: NodeIndex) -> &[usize] {
        &self.site_cells[site]
    }

    /// Pairs of adjacent cells (cell, left or top neighbour) that both lie
    /// inside a catchment.
    pub fn inside_neighbour_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (index, cell) in self.cells.iter().enumerate() {
            if !cell.is_inside() {
                continue;
            }
            for neighbour in [cell.left, cell.top].into_iter().flatten() {
                if self.cells[neighbour].is_inside() {
                    pairs.push((index, neighbour));
                }
            }
        }
        pairs
    }

    /// Pixel block `(x_start..x_end, y_start..y_end)` covered by cell `(i, j)`.
    pub fn block_bounds(&self, i: usize, j: usize) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let xstep = self.width as f64 / self.nx as f64;
        let ystep = self.height as f64 / self.ny as f64;
        let x = (i as f64 * xstep) as usize..((i + 1) as f64 * xstep) as usize;
        let y = (j as f64 * ystep) as usize..((j + 1) as f64 * ystep) as usize;
        (x, y)
    }

    /// Expand per-cell values to a raster of the label grid's shape.
    /// `value` returns `None` for cells with nothing to show, painted as NaN.
    pub fn rasterize<F>(&self, mut value: F) -> Array2<f64>
    where
        F: FnMut(usize) -> Option<f64>,
    {
        let mut out = Array2::from_elem((self.height, self.width), f64::NAN);
        for j in 0..self.ny {
            for i in 0..self.nx {
                let v = value(j * self.nx + i).unwrap_or(f64::NAN);
                let (xs, ys) = self.block_bounds(i, j);
                for y in ys {
                    for x in xs.clone() {
                        out[[y, x]] = v;
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::network::NodeRecord;
    use ndarray::array;
    use rstest::rstest;

    /// Two catchments side by side, `L` draining into `R`.
    pub(crate) fn two_catchment_network() -> SampleNetwork {
        let records = vec![
            NodeRecord { name: "L".into(), area: 8.0, downstream: "R".into(), label: 1 },
            NodeRecord { name: "R".into(), area: 8.0, downstream: "##".into(), label: 2 },
        ];
        SampleNetwork::from_records(records, "##").unwrap()
    }

    pub(crate) fn two_catchment_labels() -> Array2<u32> {
        array![
            [1, 1, 2, 2],
            [1, 1, 2, 2],
            [1, 1, 2, 2],
            [1, 1, 2, 2],
            [0, 0, 0, 0],
        ]
    }

    #[rstest]
    #[case(0, 2)]
    #[case(2, 0)]
    fn test_zero_resolution_fails(#[case] nx: usize, #[case] ny: usize) {
        let network = two_catchment_network();
        let err = InverseGrid::new(nx, ny, &two_catchment_labels(), &network).unwrap_err();
        assert_eq!(err, GridError::NonPositiveResolution { nx, ny });
    }

    #[rstest]
    #[case(5, 2)]
    #[case(2, 6)]
    fn test_resolution_above_raster_fails(#[case] nx: usize, #[case] ny: usize) {
        let network = two_catchment_network();
        let err = InverseGrid::new(nx, ny, &two_catchment_labels(), &network).unwrap_err();
        assert!(matches!(err, GridError::ExceedsRaster { width: 4, height: 5, .. }));
    }

    #[test]
    fn test_under_resolved_catchment_fails() {
        // A single column centred on x=2 only ever sees catchment R
        let network = two_catchment_network();
        let err = InverseGrid::new(1, 5, &two_catchment_labels(), &network).unwrap_err();
        assert_eq!(err, GridError::UnderResolved(vec!["L".into()]));
    }

    #[test]
    fn test_unknown_label_fails() {
        let network = two_catchment_network();
        let mut labels = two_catchment_labels();
        labels[[4, 0]] = 9;
        let err = InverseGrid::new(4, 5, &labels, &network).unwrap_err();
        assert_eq!(err, GridError::UnknownLabel(9));
    }

    #[test]
    fn test_cells_and_neighbours() {
        let network = two_catchment_network();
        let grid = InverseGrid::new(4, 5, &two_catchment_labels(), &network).unwrap();

        assert_eq!(grid.cells().len(), 20);
        assert_eq!(grid.cell(0, 0).site, Some(0));
        assert_eq!(grid.cell(3, 0).site, Some(1));
        assert_eq!(grid.cell(2, 4).site, None);
        assert_eq!(grid.cell(0, 0).left, None);
        assert_eq!(grid.cell(1, 1).left, Some(4));
        assert_eq!(grid.cell(1, 1).top, Some(1));
        assert_eq!(grid.site_cells(0).len(), 8);

        // 4 rows x 3 horizontal pairs + 3 rows x 4 vertical pairs
        assert_eq!(grid.inside_neighbour_pairs().len(), 24);
    }

    #[test]
    fn test_rasterize_fills_blocks() {
        let network = two_catchment_network();
        let grid = InverseGrid::new(2, 1, &two_catchment_labels(), &network).unwrap();
        let raster = grid.rasterize(|cell| (cell == 0).then_some(3.0));

        assert_eq!(raster.dim(), (5, 4));
        assert_eq!(raster[[4, 1]], 3.0);
        assert!(raster[[0, 2]].is_nan());
    }
}

use std::sync::Arc;

use parcomm::prelude::*;
use tracing::trace;

const LEFTWARD: i32 = 10;
const RIGHTWARD: i32 = 11;

/// One participant's segment of a periodic rod.
///
/// The rod is a one-dimensional periodic Cartesian grid; every step swaps
/// boundary cells with both neighbors and replaces each cell by the mean of
/// itself and its two neighbors, which conserves the total heat.
#[derive(Debug)]
pub struct Rod {
    grid: Communicator,
    left: i32,
    right: i32,
    cells: Vec<f64>,
}

impl Rod {
    /// Lay the participants of `world` out along a periodic rod, this one
    /// owning `cells`.
    ///
    /// # Errors
    ///
    /// Fails if `cells` is empty, besides any communication failure.
    pub fn new(world: &Communicator, cells: Vec<f64>) -> Result<Self> {
        if cells.is_empty() {
            return Err(Error::misuse("a rod segment needs at least one cell"));
        }
        let grid = world.cartesian_create(&[world.size()?], &[true], false)?;
        let position = grid.topology()?.coords[0];
        let left = grid.rank_from_coordinates(&[position - 1])?;
        let right = grid.rank_from_coordinates(&[position + 1])?;
        Ok(Self { grid, left, right, cells })
    }

    /// The cells this participant owns.
    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    /// Advance the rod by one time step.
    pub fn step(&mut self) -> Result<()> {
        let first = [self.cells[0]];
        let last = [self.cells[self.cells.len() - 1]];
        let (mut from_left, mut from_right) = ([0.0], [0.0]);
        {
            let mut requests = [
                self.grid.isend(&first, self.left, LEFTWARD)?,
                self.grid.isend(&last, self.right, RIGHTWARD)?,
                self.grid.irecv(&mut from_left, self.left, RIGHTWARD)?,
                self.grid.irecv(&mut from_right, self.right, LEFTWARD)?,
            ];
            wait_all(&mut requests)?;
        }
        trace!(left = from_left[0], right = from_right[0], "exchanged halo");

        let mut padded = Vec::with_capacity(self.cells.len() + 2);
        padded.push(from_left[0]);
        padded.extend_from_slice(&self.cells);
        padded.push(from_right[0]);
        self.cells = padded.windows(3).map(|window| window.iter().sum::<f64>() / 3.0).collect();
        Ok(())
    }

    /// Sum of every cell of the rod.
    pub fn total_heat(&self) -> Result<f64> {
        let mut total = [0.0];
        let local = [self.cells.iter().sum::<f64>()];
        let sum = Op::sum(Arc::clone(self.grid.native()));
        self.grid.iallreduce(&local, &mut total, &sum)?.wait()?;
        Ok(total[0])
    }
}

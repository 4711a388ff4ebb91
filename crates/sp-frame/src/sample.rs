use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

use crate::{Axis, FrameError, SparseFrame};

/// How many rows or columns to draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleSize {
    N(usize),
    /// Fraction of the axis length, rounded to the nearest count.
    Frac(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleOptions {
    pub size: SampleSize,
    pub axis: Axis,
    /// Draw with replacement. Only rows may repeat; column labels must
    /// stay unique.
    pub replace: bool,
    /// Fixed seed for reproducible draws; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl SampleOptions {
    #[must_use]
    pub fn n(n: usize) -> Self {
        Self {
            size: SampleSize::N(n),
            axis: Axis::Index,
            replace: false,
            seed: None,
        }
    }

    #[must_use]
    pub fn frac(frac: f64) -> Self {
        Self {
            size: SampleSize::Frac(frac),
            ..Self::n(0)
        }
    }
}

fn sample_count(size: SampleSize, len: usize, replace: bool) -> Result<usize, FrameError> {
    let count = match size {
        SampleSize::N(n) => n,
        SampleSize::Frac(frac) => {
            if !frac.is_finite() || frac < 0.0 {
                return Err(FrameError::InvalidArgument(format!(
                    "sample fraction must be a non-negative number, got {frac}"
                )));
            }
            (frac * len as f64).round() as usize
        }
    };
    if !replace && count > len {
        return Err(FrameError::InvalidArgument(format!(
            "cannot draw {count} of {len} without replacement"
        )));
    }
    Ok(count)
}

impl SparseFrame {
    /// Random rows (`Axis::Index`) or columns (`Axis::Columns`) in draw order.
    pub fn sample(&self, options: &SampleOptions) -> Result<Self, FrameError> {
        let len = match options.axis {
            Axis::Index => self.nrows(),
            Axis::Columns => self.ncols(),
        };
        if options.replace && options.axis == Axis::Columns {
            return Err(FrameError::InvalidArgument(
                "columns cannot be sampled with replacement".to_owned(),
            ));
        }
        let count = sample_count(options.size, len, options.replace)?;

        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let positions: Vec<usize> = if count == 0 {
            Vec::new()
        } else if options.replace {
            (0..count).map(|_| rng.gen_range(0..len)).collect()
        } else {
            index::sample(&mut rng, len, count).into_vec()
        };

        match options.axis {
            Axis::Index => self.iloc(&positions),
            Axis::Columns => {
                let cols: Vec<Option<usize>> = positions.iter().copied().map(Some).collect();
                let matrix = self.data.take_cols(&cols)?;
                Ok(Self::from_parts(
                    self.index.clone(),
                    self.columns.take(&positions),
                    matrix,
                ))
            }
        }
    }
}

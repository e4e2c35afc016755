//! Common reductions on arrays that `ndarray` does not provide for floats.

use ndarray::{Array, ArrayView, ArrayView1, Axis, Dimension, RemoveAxis};

use crate::Float;

pub(crate) fn norm_axis<F, D, Di>(arr: ArrayView<F, Di>, axis: Axis) -> Array<F, D>
where
    F: Float,
    D: Dimension,
    Di: RemoveAxis<Smaller = D>,
{
    let norm_sq = arr.map(|x| (*x * *x)).sum_axis(axis);
    norm_sq.map(|x| x.sqrt())
}

pub(crate) fn min_axis<F, D, Di>(arr: ArrayView<'_, F, Di>, axis: Axis) -> Array<F, D>
where
    F: Float,
    D: Dimension,
    Di: RemoveAxis<Smaller = D>,
{
    arr.map_axis(axis, |a| {
        a.iter()
            .copied()
            .reduce(|f1, f2| if f2 < f1 { f2 } else { f1 })
            .expect("empty axis")
    })
}

pub(crate) fn max_axis<F, D, Di>(arr: ArrayView<'_, F, Di>, axis: Axis) -> Array<F, D>
where
    F: Float,
    D: Dimension,
    Di: RemoveAxis<Smaller = D>,
{
    arr.map_axis(axis, |a| {
        a.iter()
            .copied()
            .reduce(|f1, f2| if f2 > f1 { f2 } else { f1 })
            .expect("empty axis")
    })
}

/// Index of the first maximum.
pub(crate) fn argmax<F>(arr: ArrayView1<'_, F>) -> usize
where
    F: Float,
{
    arr.indexed_iter()
        .reduce(|acc, f| if acc.1 >= f.1 { acc } else { f })
        .expect("empty array")
        .0
}

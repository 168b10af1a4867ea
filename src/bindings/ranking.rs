use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;

use crate::config::{DegeneratePolicy, RankingLossConfig};
use crate::loss::RankingLoss;

fn ranking(degenerate: &str) -> PyResult<RankingLoss> {
    let config = RankingLossConfig::new(degenerate.parse::<DegeneratePolicy>()?);
    Ok(RankingLoss::with_config(config))
}

#[pyfunction]
#[pyo3(signature = (x, y, degenerate = "propagate"))]
pub fn ranking_loss(
    x: PyReadonlyArray2<f32>,
    y: PyReadonlyArray2<f32>,
    degenerate: &str,
) -> PyResult<f32> {
    let x_arr = x.as_array();
    let y_arr = y.as_array();
    Ok(ranking(degenerate)?.forward(&x_arr, &y_arr)?)
}

#[pyfunction]
#[pyo3(signature = (x, y, degenerate = "propagate"))]
pub fn ranking_loss_backward<'py>(
    py: Python<'py>,
    x: PyReadonlyArray2<f32>,
    y: PyReadonlyArray2<f32>,
    degenerate: &str,
) -> PyResult<(&'py PyArray2<f32>, &'py PyArray2<f32>)> {
    let x_arr = x.as_array();
    let y_arr = y.as_array();
    let (grad_x, grad_y) = ranking(degenerate)?.backward(&x_arr, &y_arr)?;
    Ok((grad_x.into_pyarray(py), grad_y.into_pyarray(py)))
}

pub fn register(m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(ranking_loss, m)?)?;
    m.add_function(wrap_pyfunction!(ranking_loss_backward, m)?)?;
    Ok(())
}

use numpy::{IntoPyArray, PyArray1, PyArray3, PyReadonlyArray1, PyReadonlyArray2, PyReadonlyArray3};
use pyo3::prelude::*;

use crate::config::{AutoRegressiveLossConfig, DegeneratePolicy, ReductionOrder};
use crate::loss::AutoRegressiveLoss;

/// Python view of the masked autoregressive loss. Calling it returns one loss
/// per batch example.
#[pyclass(name = "AutoRegressiveLoss", module = "pairseq_loss")]
pub struct PyAutoRegressiveLoss {
    inner: AutoRegressiveLoss,
}

#[pymethods]
impl PyAutoRegressiveLoss {
    #[new]
    #[pyo3(signature = (stop_token, reduction = "per_position", degenerate = "propagate"))]
    fn new(stop_token: i64, reduction: &str, degenerate: &str) -> PyResult<Self> {
        let config = AutoRegressiveLossConfig::new(
            reduction.parse::<ReductionOrder>()?,
            degenerate.parse::<DegeneratePolicy>()?,
        );
        Ok(PyAutoRegressiveLoss {
            inner: AutoRegressiveLoss::with_config(stop_token, config),
        })
    }

    #[getter]
    fn stop_token(&self) -> i64 {
        self.inner.stop_token()
    }

    fn __call__<'py>(
        &self,
        py: Python<'py>,
        scores: PyReadonlyArray3<'py, f32>,
        targets: PyReadonlyArray2<'py, i64>,
    ) -> PyResult<&'py PyArray1<f32>> {
        let losses = self.inner.forward(&scores.as_array(), &targets.as_array())?;
        Ok(losses.into_pyarray(py))
    }

    fn backward<'py>(
        &self,
        py: Python<'py>,
        scores: PyReadonlyArray3<'py, f32>,
        targets: PyReadonlyArray2<'py, i64>,
        grad_output: PyReadonlyArray1<'py, f32>,
    ) -> PyResult<&'py PyArray3<f32>> {
        let grad = self.inner.backward(
            &scores.as_array(),
            &targets.as_array(),
            &grad_output.as_array(),
        )?;
        Ok(grad.into_pyarray(py))
    }

    fn __repr__(&self) -> String {
        let config = self.inner.config();
        format!(
            "AutoRegressiveLoss(stop_token={}, reduction={:?}, degenerate={:?})",
            self.inner.stop_token(),
            config.reduction,
            config.degenerate
        )
    }
}

pub fn register(m: &PyModule) -> PyResult<()> {
    m.add_class::<PyAutoRegressiveLoss>()?;
    Ok(())
}

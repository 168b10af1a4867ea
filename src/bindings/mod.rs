mod autoregressive;
mod ranking;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyModule;

use crate::error::LossError;

impl From<LossError> for PyErr {
    fn from(err: LossError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

/// Ranking and masked autoregressive losses for numpy arrays
#[pymodule]
pub fn pairseq_loss(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    // Pairwise ranking loss
    ranking::register(m)?;
    // Masked autoregressive loss
    autoregressive::register(m)?;
    Ok(())
}

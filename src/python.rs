use crate::config::{SchedulerConfig, SchedulerKind, SorterKind};
use crate::core::particle::DIM;
use crate::core::Simulation;
use numpy::ndarray::Array2;
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

fn py_err<E: ToString>(e: E) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn to_array(rows: &[[f64; DIM]]) -> Array2<f64> {
    let mut arr = Array2::<f64>::zeros((rows.len(), DIM));
    for (i, row) in rows.iter().enumerate() {
        for k in 0..DIM {
            arr[[i, k]] = row[k];
        }
    }
    arr
}

fn from_array(arr: &PyReadonlyArray2<'_, f64>, n: usize, what: &str) -> PyResult<Vec<[f64; DIM]>> {
    let view = arr.as_array();
    if view.shape()[0] != n || view.shape()[1] != DIM {
        return Err(py_err(format!(
            "{what} must have shape ({n}, {DIM}), got {:?}",
            view.shape()
        )));
    }
    Ok(view
        .rows()
        .into_iter()
        .map(|row| [row[0], row[1], row[2]])
        .collect())
}

/// Python-facing wrapper around a periodic hard-sphere [`Simulation`].
///
/// API:
/// - __new__(num_particles, box_size, diameter=1.0, mass=1.0, seed=None, sorter="BoundedPQ", scheduler="NeighbourList")
/// - advance_to(time), run_events(n)
/// - get_positions() / get_velocities() -> np.ndarray, shape (N, 3)
/// - set_positions(arr) / set_velocities(arr)
#[pyclass]
pub struct EdmdSim {
    sim: Simulation,
}

#[pymethods]
impl EdmdSim {
    /// Errors: raises ValueError on invalid parameters or an unknown sorter or scheduler name.
    #[new]
    #[pyo3(signature = (num_particles, box_size, diameter=1.0, mass=1.0, seed=None, sorter="BoundedPQ", scheduler="NeighbourList"))]
    fn new(
        num_particles: usize,
        box_size: Vec<f64>,
        diameter: f64,
        mass: f64,
        seed: Option<u64>,
        sorter: &str,
        scheduler: &str,
    ) -> PyResult<Self> {
        let bs: [f64; DIM] = box_size
            .try_into()
            .map_err(|_| py_err(format!("box_size must have length {DIM}")))?;
        let config = SchedulerConfig {
            scheduler: scheduler.parse::<SchedulerKind>().map_err(py_err)?,
            sorter: sorter.parse::<SorterKind>().map_err(py_err)?,
            ..Default::default()
        };
        let sim = Simulation::hard_sphere_gas(num_particles, bs, diameter, mass, seed, config)
            .map_err(py_err)?;
        Ok(Self { sim })
    }

    /// Advance to the given absolute time (releases the GIL during computation).
    fn advance_to(&mut self, py: Python<'_>, target_time: f64) -> PyResult<()> {
        py.detach(|| self.sim.advance_to(target_time))
            .map_err(py_err)
    }

    /// Run `n` events; returns how many ran before the queue was exhausted.
    fn run_events(&mut self, py: Python<'_>, n: u64) -> PyResult<u64> {
        py.detach(|| self.sim.run_events(n)).map_err(py_err)
    }

    fn get_positions(&self, py: Python<'_>) -> Py<PyArray2<f64>> {
        to_array(&self.sim.positions()).into_pyarray(py).unbind()
    }

    fn get_velocities(&self, py: Python<'_>) -> Py<PyArray2<f64>> {
        to_array(&self.sim.velocities()).into_pyarray(py).unbind()
    }

    /// Values must be finite; overlaps are not checked.
    fn set_positions(&mut self, positions: PyReadonlyArray2<'_, f64>) -> PyResult<()> {
        let rows = from_array(&positions, self.sim.num_particles(), "positions")?;
        self.sim.set_positions(&rows).map_err(py_err)
    }

    fn set_velocities(&mut self, velocities: PyReadonlyArray2<'_, f64>) -> PyResult<()> {
        let rows = from_array(&velocities, self.sim.num_particles(), "velocities")?;
        self.sim.set_velocities(&rows).map_err(py_err)
    }

    fn kinetic_energy(&self) -> f64 {
        self.sim.kinetic_energy()
    }

    fn time(&self) -> f64 {
        self.sim.time()
    }

    fn event_count(&self) -> u64 {
        self.sim.event_count()
    }
}

/// The edmd Python module entry point.
#[pymodule]
fn edmd(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<EdmdSim>()?;
    Ok(())
}

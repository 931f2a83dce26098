//! Error kinds surfaced by mesh assembly, configuration validation, and the
//! time loop. Every variant is fatal to the current invocation: the
//! solver never retries or recovers mid-run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// A configuration field is out of range, an inlet/outlet patch is
    /// undefined, or `n_pics` could not be coerced into `[4, 100]`.
    #[error("invalid configuration field `{field}`: {message}")]
    ConfigInvalid {
        field: &'static str,
        message: String,
    },

    /// A missing node reference, a zero-area triangle, an edge shared by
    /// three or more triangles, or a cell with more than ten neighbors.
    #[error("mesh is degenerate: {reason}")]
    MeshDegenerate { reason: String },

    /// The mesh source or restart snapshot could not be found.
    #[error("mesh or restart source not found: {path}")]
    MeshMissing { path: String },

    /// A cell's density, velocity, pressure, or fill fraction became
    /// non-finite after an update. Clamping `rho >= 0` / `gamma in [0,1]` is
    /// a local correction and never raises this; only non-finite values do.
    #[error("numerical instability in cell {cell}: {field} became non-finite")]
    NumericalInstability { cell: usize, field: &'static str },

    /// Snapshot I/O failed; the run is wasted without a snapshot to resume
    /// from, so this terminates the invocation.
    #[error("snapshot I/O failed: {0}")]
    SnapshotIo(#[from] std::io::Error),

    /// A snapshot file could not be parsed back into a `Snapshot`.
    #[error("snapshot could not be decoded: {0}")]
    SnapshotDecode(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimError>;

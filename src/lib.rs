//! Construction and shell classification of diffusion-weighted MRI
//! acquisition schemes, including the per-shell spherical harmonics
//! observation matrices that microstructure model fitting consumes.

use thiserror::Error;

pub mod gradient_conversions;
pub mod gradient_table;
pub mod scheme;
pub mod sh;
pub mod shells;

pub use gradient_table::{read_bvals, read_bvecs, GradientTable};
pub use scheme::{AcquisitionScheme, PulseTiming, SchemeOptions, Shell};
pub use sh::ShOrderTable;
pub use shells::classify_shells;

#[derive(Debug, Error)]
pub enum SchemeError {
    /// the raw acquisition arrays failed a structural or physical check;
    /// fatal to construction
    #[error("invalid acquisition: {0}")]
    InvalidAcquisition(String),
    /// an external gradient table or text table did not have the expected
    /// shape
    #[error("unsupported input: {0}")]
    UnsupportedInputType(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

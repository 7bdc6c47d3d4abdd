//! Error types for solver operations.

use thiserror::Error;

/// Result type alias using the crate Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or solving a model.
///
/// Convergence failures are not errors: the Newton core reports them through
/// [`NewtonOutcome`](crate::newton::NewtonOutcome) so the step controller can
/// retry. Only the numerical variants (see [`Error::is_numerical`]) are
/// converted into such outcomes when they surface inside an iteration.
#[derive(Error, Debug)]
pub enum Error {
    /// Initialization errors (bad parameters, invalid references).
    #[error("initialization error: {0}")]
    Init(String),

    /// Mesh-related errors.
    #[error("mesh error: {0}")]
    Mesh(String),

    /// Assembly errors.
    #[error("assembly error: {0}")]
    Assembly(String),

    /// Linear solver errors.
    #[error("solver error: {0}")]
    Solver(String),

    /// Matrix singularity or conditioning issues.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    /// Invalid material properties.
    #[error("invalid material: {0}")]
    InvalidMaterial(String),

    /// Equation numbering produced an empty system.
    #[error("no free equations: the model has nothing to solve")]
    NoEquations,

    /// An element was inverted by the trial solution.
    #[error("negative jacobian {jacobian:.3e} in element {element}")]
    NegativeJacobian { element: usize, jacobian: f64 },

    /// A norm or solution entry became NaN or infinite.
    #[error("non-finite value encountered: {0}")]
    NonFinite(String),

    /// Restart stream encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A type tag had no registered constructor.
    #[error("unknown {kind} type \"{tag}\"")]
    UnknownType { kind: &'static str, tag: String },

    /// I/O errors (restart files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures an iteration can recover from by cutting back or
    /// reforming, as opposed to setup or contract errors.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Error::NegativeJacobian { .. } | Error::SingularMatrix(_) | Error::NonFinite(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numerical_classification() {
        assert!(Error::NegativeJacobian { element: 3, jacobian: -0.2 }.is_numerical());
        assert!(Error::SingularMatrix("pivot 4".into()).is_numerical());
        assert!(!Error::NoEquations.is_numerical());
        assert!(!Error::Init("bad".into()).is_numerical());
    }

    #[test]
    fn test_display_messages() {
        let e = Error::UnknownType { kind: "material", tag: "foam".into() };
        assert_eq!(e.to_string(), "unknown material type \"foam\"");
    }
}

use bincode::config::{Fixint, LittleEndian};
use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

pub(crate) const BINCODE_CONFIG: bincode::config::Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_little_endian().with_fixed_int_encoding();

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("error saving state: {source}")]
    Serialization {
        #[from]
        source: EncodeError,
    },
    #[error("error loading state: {source}")]
    Deserialization {
        #[from]
        source: DecodeError,
    },
    #[error("state has {actual} {kind} entries, bus is configured with {expected}")]
    ConfigurationMismatch { kind: &'static str, expected: usize, actual: usize },
    #[error("error loading state for {kind} {index}: {source}")]
    Component {
        kind: &'static str,
        index: usize,
        #[source]
        source: DecodeError,
    },
}

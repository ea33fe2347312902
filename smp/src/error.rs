use coherence::{AccessError, ConfigError, ProtocolViolation};
use pipeline::EncodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("core {core} does not exist, the simulation has {cores}")]
    NoSuchCore { core: usize, cores: usize },
    #[error("register r{reg} does not exist")]
    NoSuchRegister { reg: usize },
    #[error("program for core {core} can't be encoded: {source}")]
    InvalidProgram {
        core: usize,
        #[source]
        source: EncodeError,
    },
    #[error("core {core} has no fault to acknowledge")]
    NoFault { core: usize },
    #[error(transparent)]
    Access(#[from] AccessError),
    /// Fatal. The simulation refuses to step again afterwards.
    #[error("{violation}\n{dump}")]
    CoherenceProtocolViolation {
        violation: ProtocolViolation,
        dump: String,
    },
    #[error("simulation halted after a coherence protocol violation")]
    Halted,
}

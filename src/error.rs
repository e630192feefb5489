#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("the entry pool must hold at least one entry")]
    ZeroEntries,

    #[error("the hash table must have at least one bucket")]
    ZeroBuckets,

    #[error("length limit {0} does not fit an IP datagram")]
    LengthLimitTooLarge(usize),

    #[error("out of range integral type conversion attempted")]
    TryFromIntError,
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Self::TryFromIntError
    }
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = ::std::result::Result<T, E>;

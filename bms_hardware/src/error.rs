use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("bus error: {0}")]
    Bus(String),
    #[error("monitor timeout")]
    Timeout,
    #[error("module {module} did not respond")]
    NoResponse { module: usize },
    #[error("channel out of range: module {module}, brick {brick}")]
    OutOfRange { module: usize, brick: usize },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;

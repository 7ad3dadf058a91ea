use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Invalid authority {0:?}: expected `ip` or `ip:port`")]
    InvalidAuthority(String),

    #[error("Invalid address {0:?}")]
    InvalidAddress(String),
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PgnError {
    #[error("PGN contains no moves")]
    NoMoves,

    #[error("Game does not start from the standard position: {0}")]
    NonStandardStart(String),
}

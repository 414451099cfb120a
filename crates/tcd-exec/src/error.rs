use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("non-zero exit code: {code}")]
    NonZeroExit { code: i32 },
    #[error("spawn of '{program}' failed: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("killed by signal")]
    KilledBySignal,
    #[error("missing program")]
    MissingProgram,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ExecResult<T> = Result<T, ExecError>;

mod error;
pub use error::{ExecError, ExecResult};

pub mod proc;
pub use proc::{CommandOutput, ProcConfig, run_command, submit_command};

mod util;

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::proc::{CommandOutput, ProcConfig, run_command, submit_command};
}

pub mod block;
pub mod builtins;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod modules;
pub mod program;
pub mod reload;
pub mod runtime_value;
pub mod scheduler;

pub use block::{BlockState, RestartPolicy};
pub use error::{DiagnosticError, RuntimeError, Unwind};
pub use modules::{HostModules, ModuleResolver};
pub use reload::ReloadReport;
pub use runtime_value::RuntimeValue;
pub use scheduler::{RunOutcome, RunReport, Scheduler, SchedulerConfig, Step, execute_program, execute_program_with};

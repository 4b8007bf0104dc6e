//! The grading-step library: compilation, evaluation, trusted admin-code
//! execution, the checker invocation convention, and the whitediff
//! shortcut. All steps drive an already-prepared `Sandbox`; none of them
//! know about task types or jobs.

mod common;
mod compilation;
mod evaluation;
mod checker;
mod messages;
mod trusted;
mod whitediff_step;

pub use common::{generic_execution, generic_step};
pub use compilation::compilation_step;
pub use evaluation::{evaluation_step, evaluation_step_after_run, evaluation_step_before_run};
pub use checker::checker_step;
pub use messages::{default_messages, HumanMessage, MessageCollection};
pub use trusted::trusted_step;
pub use whitediff_step::white_diff_step;

//! Safety-gated process termination.

mod confirm;
mod terminator;

pub use confirm::{Confirmation, ConfirmationPrompt, Confirmer, StdinConfirmer};
pub use terminator::{
    AbortReason, BlockReason, CallerContext, KillOutcome, KillReport, KillRequest, KillState, Terminator,
};

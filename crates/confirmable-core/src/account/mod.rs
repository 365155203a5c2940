//! Account management module.
//!
//! Provides the account record and its confirmation state.

mod model;

pub use model::{Account, AccountId, ConfirmationState};
pub use crate::token::ConfirmationToken;

//! Common types shared by the dispatch workspace
//!
//! Credentials are opaque secrets; everything outside the call site that
//! actually talks to the generative service refers to them by `Credential::id`.

mod credential;
mod error;
mod secret;

pub use credential::Credential;
pub use error::{Error, Result};
pub use secret::Secret;

//! Process plumbing shared by the binaries.

pub mod bootstrap;
pub mod retry;
#[cfg(feature = "sqlite")]
pub mod service;

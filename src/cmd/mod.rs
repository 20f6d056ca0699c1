pub mod group;
pub mod login;
pub mod mfa;
pub mod password;
pub mod progress;
pub mod run;
pub mod tenant;

pub use run::{RunArgs, RunStatus};

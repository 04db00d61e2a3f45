// firmware-ci: deploy published firmware builds onto an attached device

pub mod artifact;
pub mod config;
pub mod deploy;
pub mod event;
pub mod flash;
pub mod notify;
pub mod orchestrator;
pub mod serial;
pub mod verify;

pub use deploy::{DeployError, DeployReport, Deployer};
pub use event::DeployEvent;
pub use orchestrator::{Orchestrator, RunExit};

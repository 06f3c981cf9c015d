//! Otto - pull request babysitter.
//!
//! Tracks PRs on Azure DevOps and GitHub, polls their CI and review threads,
//! fixes failing builds through an LLM agent and triages reviewer comments.
//! State lives in one locked document per PR so a restarted daemon resumes
//! where it left off.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod services;

pub use error::AppError;

//! Client for remote generation providers.
//!
//! This crate provides:
//! - An HTTP client for queue-style inference endpoints (`/run`,
//!   `/runsync`, `/status/{id}`) with bearer authentication
//! - Per-job-type handlers that validate parameters, build the provider
//!   input and normalize the output
//! - A polling loop with a time-based progress estimate

pub mod client;
pub mod error;
pub mod handler;
pub mod poller;
pub mod progress;
pub mod text_to_image;
pub mod text_to_video;
pub mod types;
pub mod workflow;

pub use client::{ProviderClient, ProviderConfig, RemoteGeneration};
pub use error::{ProviderError, ProviderResult};
pub use handler::{GenerationHandler, HandlerRegistry};
pub use poller::{wait_for_completion, NoProgress, PollPolicy, ProgressReporter};
pub use progress::estimate_progress;
pub use text_to_image::TextToImageHandler;
pub use text_to_video::TextToVideoHandler;
pub use types::{RemoteStatus, StatusResponse, SubmitResponse};
pub use workflow::{SubmissionMode, Workflow};

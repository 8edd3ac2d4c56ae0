//! Mediarelay - Link-to-Media Relay Pipeline
//!
//! Turns links posted in chat groups into de-duplicated tasks, downloads the
//! media with yt-dlp under bounded concurrency, and delivers the result to
//! every group that asked for it.

pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod task;

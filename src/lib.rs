//! AutoKR - translated subtitles for video files
//!
//! A four-stage pipeline (extract, recognize, translate, encode) that keeps
//! every intermediate result on disk so an interrupted run picks up where it
//! stopped. Recognition and translation run in separate worker processes.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod subtitle;
pub mod worker;

#![forbid(unsafe_code)]

pub mod app;
pub mod cli;
pub(crate) mod fs_util;
pub mod imagery;
pub mod logging;
pub mod model;
pub mod narration;
pub mod publish;
pub mod settings;
pub mod source;
pub mod subtitle;
pub mod text;
pub mod video;

pub mod auth;
pub mod ffmpeg;
pub mod file;

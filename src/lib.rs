pub mod config;
pub mod downloads;
pub mod errors;
pub mod localization;
pub mod media;
pub mod security;
pub mod thumbnail;
pub mod uploader;

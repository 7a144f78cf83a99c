//! Render a stream of Twitter events as colorized, wrapped terminal text
//! with inline images, after mute and NG-word filtering.

pub mod config;
pub mod feeds;
pub mod filter;
pub mod twitter_message;
pub mod twitter_parser;
pub mod ui;

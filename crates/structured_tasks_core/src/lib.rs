pub mod config;
pub mod decisions;
pub mod document;
pub mod events;
pub mod fragments;
pub mod insertion;
pub mod marker;
pub mod matcher;
pub mod navigator;
pub mod page;
pub mod runtime;
pub mod submission;
pub mod suggestions;
pub mod task;
pub mod wikitext;

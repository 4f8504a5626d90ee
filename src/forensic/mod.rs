pub mod analyzer;
pub mod audit;
pub mod chats;
pub mod config;
pub mod filter;
pub mod locations;
pub mod media;
pub mod pages;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod segment;
pub mod store;
pub mod structured;
pub mod summarize;
pub mod util;

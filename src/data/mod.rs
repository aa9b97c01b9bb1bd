pub mod cache;
pub mod fetcher;
pub mod llm;
pub mod parser;

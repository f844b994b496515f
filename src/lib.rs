pub mod batch;
pub mod classifier;
pub mod config;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod package;
pub mod server;
pub mod workbook;

#[cfg(test)]
mod test_support;

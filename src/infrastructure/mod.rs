pub mod analysis_history_repository;
pub mod candidate_repository;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod gemini_client;
pub mod gmail_client;
pub mod logging;
pub mod oauth_client;
pub mod storage;

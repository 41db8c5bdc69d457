pub mod datetime;
pub mod heuristic;
pub mod models;
pub mod normalizer;
pub mod prompt;
pub mod response_parser;

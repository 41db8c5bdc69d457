pub mod bootstrap;
pub mod commands;
pub mod email_analysis;
pub mod extraction;
pub mod oauth;

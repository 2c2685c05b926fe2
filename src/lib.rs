pub mod agent;
pub mod application;
pub mod domain;
pub mod interfaces;
pub mod protocol;
pub mod relay;
pub mod rpc;
pub mod security;

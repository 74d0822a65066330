// Threatdesk
//
// Server-rendered chat front-end and webhook endpoint on top of
// threatdesk-core.

pub mod cli;
pub mod config;
pub mod page;
pub mod request;
pub mod server;

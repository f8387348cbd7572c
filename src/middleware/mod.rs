//! HTTP middleware for the edge

pub mod auth;
pub mod host;

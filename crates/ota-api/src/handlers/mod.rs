//! HTTP request handlers for the OTA API

pub mod check;
pub mod download;
pub mod firmware;
pub mod upload;

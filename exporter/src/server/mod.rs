//! HTTP surface of the exporter

pub mod http;

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod api;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod pipeline;
pub mod server;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod telemetry;

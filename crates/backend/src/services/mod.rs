//! Service-layer collaborators used by the scan loop.

pub mod generator;

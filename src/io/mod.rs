//! On-disk formats: split record files, their compression, and raw-item manifests.

pub mod compression;
pub mod manifest;
pub mod record;

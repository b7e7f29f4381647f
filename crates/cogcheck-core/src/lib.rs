//! Verification engine for converted Cloud-Optimized GeoTIFF artifacts:
//! raster readers, comparators, the conversion service client and the
//! scenario runner.

pub mod compare;
pub mod config;
pub mod domain;
pub mod raster;
pub mod service;
pub mod suite;
pub mod test_fixtures;

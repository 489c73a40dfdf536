//! Tabular input and output for enrichment runs.
//!
//! This crate provides:
//! - [`read_dataset`] / [`parse_dataset`]: delimited text → [`Dataset`] with stable positions
//! - [`write_dataset`] / [`write_to`]: [`Dataset`] → CSV with the added `zip_code` column
//!
//! [`Dataset`]: geozip_shared::Dataset

mod reader;
mod writer;

pub use reader::{
    InputFormat, LATITUDE_COLUMN, LONGITUDE_COLUMN, parse_coordinate, parse_dataset, read_dataset,
};
pub use writer::{OutputFormat, write_dataset, write_to};

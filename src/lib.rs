//! Discovery, search and retrieval of the curated single-cell RNA-seq
//! datasets published on the gypsum backend.
//!
//! ```no_run
//! use scrnaseq::app::{FetchOptions, ListOptions, ScRnaSeq};
//! use scrnaseq::config::ConfigLoader;
//! use scrnaseq::query::define_text_query;
//!
//! # fn main() -> Result<(), scrnaseq::error::ScrnaError> {
//! let client = ScRnaSeq::from_config(ConfigLoader::resolve(None)?)?;
//! let query = define_text_query("brain", None, false)
//!     & define_text_query("10090", Some("taxonomy_id"), false);
//! let hits = client.search_datasets(query, &ListOptions::default())?;
//! if let Some(hit) = hits.first() {
//!     let options = FetchOptions {
//!         path: hit.path.clone(),
//!         ..FetchOptions::default()
//!     };
//!     let experiment = client.fetch_dataset(&hit.name, &hit.version, &options)?;
//!     println!("{:?}", experiment.shape());
//! }
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod array;
pub mod config;
pub mod domain;
pub mod error;
pub mod experiment;
pub mod frame;
pub mod fs_util;
pub mod gypsum;
pub mod index;
pub mod manifest;
pub mod output;
pub mod polish;
pub mod query;
pub mod reader;
pub mod store;

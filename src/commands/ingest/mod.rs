mod archive;
mod catalog;
mod consensus;
mod formula;
mod merge;
mod parser;
mod pipeline;
mod run;
#[cfg(test)]
mod tests;

pub use catalog::{CatalogSources, build_catalog};
pub use run::run;

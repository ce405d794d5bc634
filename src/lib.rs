//! # bundle-forge
//!
//! Turns a compiled Java archive into an OSGi bundle by computing its manifest
//! headers from the class files it contains.
//!
//! ## Architecture
//!
//! - **task**: Build orchestration for one archive, from staging to the written bundle
//! - **builder**: Descriptor directives, manifest assembly and health checkpoints
//! - **analyzer**: Package analysis seam and the built-in class-file analyzer
//! - **properties**: Property sets, descriptor parsing and attribute merging
//! - **classpath**: Filtering of classpath and sourcepath candidates
//! - **visitor**: Exhaustive class walk over a list of archives
//! - **jar**: Memory-mapped archive reading and bundle writing
//! - **manifest**: JAR manifest parsing and serialization
//! - **clazz**: JVM class-file parsing
//! - **header**: OSGi header clauses and instruction matching
//! - **version**: OSGi versions and Maven version normalization
//! - **diagnostics**: Warnings, errors and message fixups
//! - **error**: Caller-facing build failures
//! - **config**: Work directory and task file resolution
//! - **cli**: Command-line definition

pub mod analyzer;
pub mod builder;
pub mod classpath;
pub mod clazz;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod header;
pub mod jar;
pub mod manifest;
pub mod properties;
pub mod task;
pub mod version;
pub mod visitor;

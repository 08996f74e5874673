//! `fsfs` is an append-only, content-addressed revision filesystem in the
//! style of Subversion's FSFS backend: every commit produces a new,
//! immutable revision built out of shared node-revisions and delta-
//! compressed representations, never mutating anything already on disk.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use fsfs::fs::Filesystem;
//! use std::collections::BTreeMap;
//!
//! fn run() -> fsfs::error::CResult<()> {
//!     let fs = Filesystem::create("./repo")?;
//!
//!     let mut txn = fs.begin_txn()?;
//!     txn.add_file("/hello.txt", b"hello\n".to_vec(), BTreeMap::new(), None)?;
//!     let revision = fs.commit(txn)?;
//!
//!     let body = fs.read_file_contents(revision, "/hello.txt")?;
//!     assert_eq!(body, b"hello\n");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dir;
pub mod error;
pub mod format;
pub mod fs;
pub mod id;
pub mod lock;
pub mod node_origins;
pub mod noderev;
pub mod pack;
pub mod rep;
pub mod revision;
pub mod revprops;
pub mod txn;
pub mod paths;

pub use fs::Filesystem;

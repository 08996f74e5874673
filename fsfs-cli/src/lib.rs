//! `fsfs-cli` drives the FSFS revision filesystem directly, the way
//! `svnadmin`/`svnlook` drive `libsvn_fs_fs` — a thin wrapper for manual
//! testing and operational use, not a replacement for embedding the core
//! crate.
//!
//! ## Getting started
//!
//! ```doc
//! $ fsfs init ./repo
//! created repository at ./repo (uuid ...)
//!
//! $ fsfs commit ./repo --add /hello.txt=./hello.txt --author alice --log initial
//! committed revision 1
//!
//! $ fsfs cat ./repo 1 /hello.txt
//! hello
//! ```

pub mod command;
pub mod trace;

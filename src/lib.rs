//! notecrit — distributed code review stored in git notes.
//!
//! Review requests, threaded comments, votes and CI results live as JSON
//! lines in git notes under dedicated namespace refs, travel with clones,
//! and merge between replicas with a commutative line union. No server.

pub mod cli;
pub mod config;
pub mod error;
pub mod gpg;
pub mod output;
pub mod records;
pub mod review;
pub mod scm;
pub mod sync;

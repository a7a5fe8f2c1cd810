//! strata-batch: run the scheduler and the ciphers over directory trees
//!
//! Encryption plans the tree, generates one run key, routes each file to the
//! single-shot or chunked cipher by size and reports timings back to the
//! scheduler. Decryption routes on each sidecar's mode. One file failing
//! never stops the rest of the batch.

pub mod engine;
pub mod walk;

pub use engine::{
    run_decrypt, run_encrypt, run_key_id, BatchOptions, BatchReport, FileFailure, ProgressFn,
    RUN_ID_NONCE_SIZE,
};
pub use walk::collect_files;

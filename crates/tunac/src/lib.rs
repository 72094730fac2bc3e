pub mod compile;
pub mod diagnostics;
pub mod fingerprint;
pub mod ir;
pub mod locks;
pub mod logging;
pub mod lower;
pub mod ops;
pub mod program;
pub mod rewrite;
pub mod scope;
pub mod summarize;

mod emit;
mod emit_store;

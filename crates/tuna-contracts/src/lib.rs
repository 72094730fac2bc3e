//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings that
//! appear in machine-readable I/O: the program documents `tunac` ingests and the
//! procedure bundles and reports it emits.

pub const TUNA_AST_SCHEMA_VERSION: &str = "tuna.ast@0.1.0";
pub const TUNA_OPS_SCHEMA_VERSION: &str = "tuna.ops@0.1.0";
pub const TUNA_DIAG_SCHEMA_VERSION: &str = "tuna.diag@0.1.0";
pub const TUNAC_REPORT_SCHEMA_VERSION: &str = "tunac.report@0.1.0";

pub const TUNA_AST_SCHEMA_VERSIONS_SUPPORTED: &[&str] = &[TUNA_AST_SCHEMA_VERSION];

/// Lock advisory emitted for a function whose action sequence needs coordination.
pub const DIAG_CODE_LOCK_REQUIRED: &str = "TUNA-LOCK-0001";

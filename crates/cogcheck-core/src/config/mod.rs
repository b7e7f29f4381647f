//! Run configuration: environment table, oracle table and verification policy.

pub mod environment;
pub mod oracle;
pub mod policy;

pub use environment::{
    ENVIRONMENT_VAR, Environment, EnvironmentResolution, RunContext, resolve_environment,
};
pub use oracle::{
    CaseFilter, ConversionCase, ORACLE_TABLE_PATH, OracleError, OracleTable, RejectionCase,
    load_oracle_table,
};
pub use policy::{
    PolicyError, VERIFICATION_POLICY_PATH, VerificationPolicy, load_verification_policy,
};

pub mod codegen;
pub mod externals;
pub mod models;
pub mod provisioning;

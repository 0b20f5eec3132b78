//! Bindings generated by `build.rs` from the P4Runtime and `google.rpc` protos.
//!
//! The generated files refer to one another as `super::<file>`, so they all
//! live side by side in this one module.

pub mod code;
pub mod p4data;
pub mod p4info;
pub mod p4runtime;
pub mod p4runtime_grpc;
pub mod p4types;
pub mod status;

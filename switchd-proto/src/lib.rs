#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Generated message and client/server bindings for `switchd.v1.SwitchControl`.

tonic::include_proto!("switchd.v1");

/// The encoded `FileDescriptorSet` for `switchd.v1`, used to register the
/// gRPC reflection service alongside the real one.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/switchd_descriptor.bin"));

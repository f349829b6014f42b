//! Generated protobuf types and tonic stubs for the estafeta wire
//! protocol, plus conversions to and from the core domain types.

include!(concat!(env!("OUT_DIR"), "/estafeta.v1.rs"));

pub mod convert;

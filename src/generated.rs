//! Protocol types and gRPC stubs generated from `proto/provider.proto`.

tonic::include_proto!("provider.v1");

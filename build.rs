//! Build script for the plugin protocol.
//!
//! `proto/provider.proto` is parsed with `protox` (no `protoc` binary needed)
//! and handed to `tonic-prost-build`, which writes the message types and the
//! server/client stubs into `OUT_DIR`. `src/generated.rs` includes them.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let descriptors = protox::compile(["proto/provider.proto"], ["proto"])?;

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_fds(descriptors)?;

    println!("cargo:rerun-if-changed=proto/provider.proto");

    Ok(())
}

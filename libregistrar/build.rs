fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")?;
    let proto_dir = format!("{manifest_dir}/proto");

    // The registrar serves this API; the client is used to drive it in tests.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[format!("{proto_dir}/pluginregistration.proto")],
            &[proto_dir.clone()],
        )?;

    let mut config = prost_build::Config::new();
    config.btree_map([".csi.v0.GetPluginInfoResponse.manifest"]);
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos_with_config(config, &[format!("{proto_dir}/csi_v0.proto")], &[proto_dir])?;
    Ok(())
}

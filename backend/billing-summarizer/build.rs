fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tenant directory client only; this service exposes no gRPC server
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile(&["proto/tenant_directory.proto"], &["proto"])?;
    Ok(())
}

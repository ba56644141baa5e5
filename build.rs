fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Supply a protoc binary when the host has none on PATH. Pure build-tool
    // provisioning — does not affect generated code or runtime behavior.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc);
        }
    }
    tonic_build::compile_protos("proto/ffmpeg.proto")?;
    Ok(())
}

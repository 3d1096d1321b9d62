use std::path::PathBuf;

fn main() {
    // Use the vendored protoc so fixture compilation needs no system install
    let protoc_path = protoc_bin_vendored::protoc_bin_path().unwrap();
    std::env::set_var("PROTOC", protoc_path);
    let include_path = protoc_bin_vendored::include_path().unwrap();
    std::env::set_var("PROTOC_INCLUDE", &include_path);

    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap());
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap());
    let proto_dir = manifest_dir.join("proto");

    let protos = [
        proto_dir.join("route_guide.proto"),
        proto_dir.join("hello.proto"),
    ];
    for proto in &protos {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    // Typed clients and the encoded descriptor set back the test suites.
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("stub_fixtures.bin"))
        .compile_protos(&protos, &[proto_dir, include_path])
        .unwrap();
}

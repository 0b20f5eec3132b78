extern crate protoc_grpcio;

use std::path::Path;

// (include root, file) pairs.  The include roots are git submodules:
//   p4runtime  -> https://github.com/p4lang/p4runtime
//   googleapis -> https://github.com/googleapis/googleapis
const PROTOS: [(&str, &str); 6] = [
    ("p4runtime/proto", "p4/v1/p4runtime.proto"),
    ("p4runtime/proto", "p4/v1/p4data.proto"),
    ("p4runtime/proto", "p4/config/v1/p4info.proto"),
    ("p4runtime/proto", "p4/config/v1/p4types.proto"),
    ("googleapis", "google/rpc/status.proto"),
    ("googleapis", "google/rpc/code.proto"),
];

fn main() {
    for (root, file) in &PROTOS {
        let path = Path::new(root).join(file);
        if !path.exists() {
            panic!(
                "{}: missing; run `git submodule update --init` in proto/",
                path.display()
            );
        }
        println!("cargo:rerun-if-changed={}", path.display());
    }

    let mut roots: Vec<&str> = PROTOS.iter().map(|x| x.0).collect();
    roots.dedup();
    protoc_grpcio::compile_grpc_protos(
        &PROTOS.iter().map(|x| x.1).collect::<Vec<&str>>(),
        &roots,
        "src/",
        None,
    )
    .expect("Failed to compile gRPC definitions!");
}

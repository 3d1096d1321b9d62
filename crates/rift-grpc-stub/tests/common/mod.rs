#![allow(dead_code)]

use rift_grpc_stub::StubServer;

pub mod routeguide {
    tonic::include_proto!("routeguide");
}

pub mod hello {
    tonic::include_proto!("hello");
}

pub use hello::grpc_test_service_client::GrpcTestServiceClient;
pub use routeguide::route_guide_client::RouteGuideClient;

pub const DESCRIPTOR_SET: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/stub_fixtures.bin"));

pub const CERT: &[u8] = include_bytes!("../testdata/cert.pem");
pub const KEY: &[u8] = include_bytes!("../testdata/key.pem");
pub const CA_CERT: &[u8] = include_bytes!("../testdata/cacert.pem");

/// Plaintext server over the fixture descriptors.
pub async fn start() -> StubServer {
    StubServer::builder()
        .descriptor_set(DESCRIPTOR_SET)
        .start()
        .await
        .unwrap()
}

pub fn route_guide(server: &StubServer) -> RouteGuideClient<tonic::transport::Channel> {
    RouteGuideClient::new(server.conn().unwrap())
}

pub fn hello_client(server: &StubServer) -> GrpcTestServiceClient<tonic::transport::Channel> {
    GrpcTestServiceClient::new(server.conn().unwrap())
}

pub fn point(latitude: i32, longitude: i32) -> routeguide::Point {
    routeguide::Point {
        latitude,
        longitude,
    }
}

/// Wire-compatible with `routeguide.Point` except that field 1 carries a
/// string where the schema expects an int32.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MislabeledPoint {
    #[prost(string, tag = "1")]
    pub latitude: String,
}

/// Untyped client for sending messages the generated stubs cannot express.
pub async fn raw_client(server: &StubServer) -> tonic::client::Grpc<tonic::transport::Channel> {
    let mut grpc = tonic::client::Grpc::new(server.conn().unwrap());
    grpc.ready().await.unwrap();
    grpc
}

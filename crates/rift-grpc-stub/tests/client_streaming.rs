mod common;

use common::routeguide::RouteSummary;
use common::{point, raw_client, route_guide, MislabeledPoint};
use serde_json::json;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::Code;

#[tokio::test]
async fn test_client_streaming_answers_once_for_all_messages() {
    let server = common::start().await;
    let matcher = server
        .method("RecordRoute")
        .header("session", "XXX")
        .trailer("points", "2")
        .response(json!({"point_count": 2, "distance": 100}));

    let outbound = tokio_stream::iter(vec![point(1, 2), point(3, 4)]);
    let response = route_guide(&server).record_route(outbound).await.unwrap();

    let metadata = response.metadata();
    assert_eq!(metadata.get("session").unwrap().to_str().unwrap(), "XXX");
    assert_eq!(metadata.get("points").unwrap().to_str().unwrap(), "2");

    let summary = response.into_inner();
    assert_eq!(summary.point_count, 2);
    assert_eq!(summary.distance, 100);

    let requests = matcher.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].message.get("/latitude"), Some(&json!(1)));
    assert_eq!(requests[1].message.get("/latitude"), Some(&json!(3)));
    assert_eq!(server.requests().len(), 2);
    server.close().await;
}

#[tokio::test]
async fn test_client_streaming_predicates_apply_to_every_message() {
    let server = common::start().await;
    let picky = server
        .method("RecordRoute")
        .matches(|r| r.message.get("/latitude") == Some(&json!(3)))
        .response(json!({"point_count": 99}));
    server
        .method("RecordRoute")
        .response(json!({"point_count": 1}));

    let outbound = tokio_stream::iter(vec![point(1, 2), point(3, 4)]);
    let summary = route_guide(&server)
        .record_route(outbound)
        .await
        .unwrap()
        .into_inner();
    assert_eq!(summary.point_count, 1);
    assert!(picky.requests().is_empty());
    server.close().await;
}

#[tokio::test]
async fn test_client_streaming_unmatched_is_not_found() {
    let server = common::start().await;
    server.method("RecordRoute").matches(|_| false);

    let outbound = tokio_stream::iter(vec![point(1, 2), point(3, 4)]);
    let status = route_guide(&server)
        .record_route(outbound)
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    assert!(server.requests().is_empty());
    assert_eq!(server.unmatched_requests().len(), 2);
    server.close().await;
}

#[tokio::test]
async fn test_client_streaming_without_messages_is_not_found() {
    let server = common::start().await;
    server.method("RecordRoute").response(json!({"point_count": 1}));

    let outbound = tokio_stream::iter(Vec::<common::routeguide::Point>::new());
    let status = route_guide(&server)
        .record_route(outbound)
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert!(server.requests().is_empty());
    assert!(server.unmatched_requests().is_empty());
    server.close().await;
}

#[tokio::test]
async fn test_client_streaming_undecodable_message_is_internal() {
    let server = common::start().await;
    let matcher = server
        .method("RecordRoute")
        .response(json!({"point_count": 1}));

    // An empty string is not encoded, so the first message decodes as a
    // default Point. The second one has the wrong wire type for latitude.
    let outbound = tokio_stream::iter(vec![
        MislabeledPoint {
            latitude: String::new(),
        },
        MislabeledPoint {
            latitude: "north".to_string(),
        },
    ]);
    let status = raw_client(&server)
        .await
        .client_streaming(
            tonic::Request::new(outbound),
            PathAndQuery::from_static("/routeguide.RouteGuide/RecordRoute"),
            ProstCodec::<MislabeledPoint, RouteSummary>::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("routeguide.Point"), "{}", status.message());

    assert!(matcher.requests().is_empty());
    assert!(server.requests().is_empty());
    let unmatched = server.unmatched_requests();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].message.get("/latitude"), Some(&json!(0)));
    server.close().await;
}

mod common;

use common::hello::{HelloRequest, HelloResponse};
use common::hello_client;
use rift_grpc_stub::Generator;
use serde_json::json;

fn hello(name: &str) -> HelloRequest {
    HelloRequest {
        name: name.to_string(),
        num: 7,
        request_time: None,
    }
}

#[tokio::test]
async fn test_dynamic_unary_response() {
    let server = common::start().await;
    server.response_dynamic(Vec::<Generator>::new());

    let response = hello_client(&server)
        .hello(hello("bob"))
        .await
        .unwrap()
        .into_inner();
    assert!(!response.message.is_empty());
    assert!((1..=5).contains(&response.hellos.len()));
    assert!(response.create_time.is_some());
    assert_eq!(response.mood, 0);

    let request: HelloRequest = server.requests()[0].message_as().unwrap().unwrap();
    assert_eq!(request.name, "bob");
    assert_eq!(request.num, 7);
    server.close().await;
}

#[tokio::test]
async fn test_dynamic_server_streaming_sends_one_to_five() {
    let server = common::start().await;
    server.response_dynamic(Vec::<Generator>::new());

    for _ in 0..5 {
        let mut stream = hello_client(&server)
            .list_hello(hello("bob"))
            .await
            .unwrap()
            .into_inner();
        let mut responses: Vec<HelloResponse> = Vec::new();
        while let Some(response) = stream.message().await.unwrap() {
            responses.push(response);
        }
        assert!((1..=5).contains(&responses.len()), "{}", responses.len());
    }
    server.close().await;
}

#[tokio::test]
async fn test_generators_override_matching_fields() {
    let server = common::start().await;
    server.response_dynamic([
        Generator::new("*_time", |_| json!("2001-02-03T04:05:06Z")),
        Generator::new("message", |r| {
            json!(format!("hi {}", r.message["name"].as_str().unwrap_or_default()))
        }),
    ]);

    let response = hello_client(&server)
        .hello(hello("alice"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.message, "hi alice");
    assert_eq!(response.create_time.unwrap().seconds, 981_173_106);
    server.close().await;
}

#[tokio::test]
async fn test_dynamic_matcher_with_predicate() {
    let server = common::start().await;
    server
        .method("Hello")
        .matches(|r| r.message.get("/name") == Some(&json!("carol")))
        .response_dynamic([Generator::new("num", |_| json!(99))]);
    server.method("Hello").response(json!({"message": "fallback"}));

    let mut client = hello_client(&server);
    let carol = client.hello(hello("carol")).await.unwrap().into_inner();
    let dave = client.hello(hello("dave")).await.unwrap().into_inner();
    assert_eq!(carol.num, 99);
    assert_eq!(dave.message, "fallback");
    server.close().await;
}

//! Integration tests for rpcwire.
//!
//! These tests register the greeter handlers on an app, bind it to the
//! in-memory test server and call every method the way a client would.

use std::time::Duration;

use futures::StreamExt;
use prost_reflect::{DescriptorPool, DynamicMessage};
use serde_json::{json, Value};
use tonic::{Code, Status};

use rpcwire::codec::reply_channel;
use rpcwire::contract::encode_record;
use rpcwire::testing::{greeter_pool, hello_request, reply_message, TestServer, GREETER};
use rpcwire::{App, AppConfig, Args, Context, RpcwireError, Service};

const SAY_HELLO: &str = "/helloworld.Greeter/SayHello";
const SAY_HELLO_GROUP: &str = "/helloworld.Greeter/SayHelloGroup";
const HELLO_EVERYONE: &str = "/helloworld.Greeter/HelloEveryone";
const SAY_HELLO_ONE_BY_ONE: &str = "/helloworld.Greeter/SayHelloOneByOne";

const GROUP: [&str; 4] = ["a", "b", "c", "d"];

fn hello(name: &str) -> Value {
    json!({ "message": format!("Hello {name}!") })
}

/// `Hello everyone ['tom','sam']!`
fn hello_everyone(names: &[String]) -> Value {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    json!({ "message": format!("Hello everyone [{}]!", quoted.join(",")) })
}

fn name_of(args: &Args) -> String {
    args.str("name").unwrap_or_default().to_string()
}

/// Greeter with blocking handlers.
fn blocking_greeter(pool: &DescriptorPool) -> Service {
    let mut greeter = Service::from_pool(pool, GREETER).unwrap();

    greeter
        .method("SayHello")
        .unwrap()
        .bind(["name"])
        .unwrap()
        .unary(|args: Args, _ctx: Context| Ok::<_, Status>(hello(&name_of(&args))))
        .unwrap();

    greeter
        .method("SayHelloGroup")
        .unwrap()
        .server_streaming(|_args: Args, _ctx: Context| {
            Ok(GROUP.map(|name| Ok::<_, Status>(hello(name))))
        })
        .unwrap();

    greeter
        .method("HelloEveryone")
        .unwrap()
        .client_streaming(|requests, _ctx| {
            let mut names = Vec::new();
            for request in requests {
                names.push(request?.str("name").unwrap_or_default().to_string());
            }
            Ok::<_, Status>(hello_everyone(&names))
        })
        .unwrap();

    greeter
        .method("SayHelloOneByOne")
        .unwrap()
        .streaming(|requests, _ctx| {
            Ok(requests.map(|request| {
                let request = request?;
                Ok::<_, Status>(hello(request.str("name").unwrap_or_default()))
            }))
        })
        .unwrap();

    greeter
}

/// Greeter with async handlers.
fn async_greeter(pool: &DescriptorPool) -> Service {
    let mut greeter = Service::from_pool(pool, GREETER).unwrap();

    greeter
        .method("SayHello")
        .unwrap()
        .unary_async(|args: Args, _ctx: Context| async move {
            tokio::task::yield_now().await;
            Ok::<_, Status>(hello(&name_of(&args)))
        })
        .unwrap();

    greeter
        .method("SayHelloGroup")
        .unwrap()
        .server_streaming_async(|_args: Args, _ctx: Context| async move {
            let (tx, rx) = reply_channel(1);
            tokio::spawn(async move {
                for name in GROUP {
                    if tx.send(hello(name)).await.is_err() {
                        break;
                    }
                }
            });
            Ok::<_, Status>(rx)
        })
        .unwrap();

    greeter
        .method("HelloEveryone")
        .unwrap()
        .client_streaming_async(|mut requests, _ctx| async move {
            let mut names = Vec::new();
            while let Some(request) = requests.next().await {
                names.push(request?.str("name").unwrap_or_default().to_string());
            }
            Ok::<_, Status>(hello_everyone(&names))
        })
        .unwrap();

    greeter
        .method("SayHelloOneByOne")
        .unwrap()
        .streaming_async(|requests, _ctx| async move {
            Ok::<_, Status>(requests.map(|request| {
                let request = request?;
                Ok::<_, Status>(hello(request.str("name").unwrap_or_default()))
            }))
        })
        .unwrap();

    greeter
}

fn serve(service: Service) -> TestServer {
    let mut app = App::new();
    app.add_service(service).unwrap();

    let mut server = TestServer::new();
    app.bind_to_transport(&mut server).unwrap();
    server
}

fn messages(replies: &[DynamicMessage]) -> Vec<String> {
    replies.iter().filter_map(reply_message).collect()
}

fn requests(pool: &DescriptorPool, names: &[&str]) -> Vec<DynamicMessage> {
    names.iter().map(|name| hello_request(pool, name)).collect()
}

async fn check_greeter(server: &TestServer, pool: &DescriptorPool) {
    let reply = server.unary(SAY_HELLO, hello_request(pool, "tom")).await.unwrap();
    assert_eq!(reply_message(&reply).unwrap(), "Hello tom!");

    let replies = server
        .server_streaming(SAY_HELLO_GROUP, hello_request(pool, "groupA"))
        .await
        .unwrap();
    assert_eq!(
        messages(&replies),
        vec!["Hello a!", "Hello b!", "Hello c!", "Hello d!"]
    );

    let names = ["tom", "sam", "wony", "homi"];
    let reply = server
        .client_streaming(HELLO_EVERYONE, requests(pool, &names))
        .await
        .unwrap();
    assert_eq!(
        reply_message(&reply).unwrap(),
        "Hello everyone ['tom','sam','wony','homi']!"
    );

    let replies = server
        .streaming(SAY_HELLO_ONE_BY_ONE, requests(pool, &names))
        .await
        .unwrap();
    assert_eq!(
        messages(&replies),
        vec!["Hello tom!", "Hello sam!", "Hello wony!", "Hello homi!"]
    );
}

#[tokio::test]
async fn test_greeter_blocking_handlers() {
    let pool = greeter_pool().unwrap();
    let server = serve(blocking_greeter(&pool));
    check_greeter(&server, &pool).await;
}

#[tokio::test]
async fn test_greeter_async_handlers() {
    let pool = greeter_pool().unwrap();
    let server = serve(async_greeter(&pool));
    check_greeter(&server, &pool).await;
}

#[tokio::test]
async fn test_empty_client_stream() {
    let pool = greeter_pool().unwrap();
    let server = serve(blocking_greeter(&pool));

    let reply = server.client_streaming(HELLO_EVERYONE, Vec::new()).await.unwrap();
    assert_eq!(reply_message(&reply).unwrap(), "Hello everyone []!");

    let replies = server.streaming(SAY_HELLO_ONE_BY_ONE, Vec::new()).await.unwrap();
    assert!(replies.is_empty());
}

#[tokio::test]
async fn test_unimplemented_method_does_not_disturb_others() {
    let pool = greeter_pool().unwrap();
    let mut greeter = Service::from_pool(&pool, GREETER).unwrap();
    greeter
        .method("SayHello")
        .unwrap()
        .unary(|args: Args, _ctx: Context| Ok::<_, Status>(hello(&name_of(&args))))
        .unwrap();
    let server = serve(greeter);

    let err = server
        .server_streaming(SAY_HELLO_GROUP, hello_request(&pool, "groupA"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);
    assert_eq!(err.message(), "Method not implemented!");

    let reply = server.unary(SAY_HELLO, hello_request(&pool, "sam")).await.unwrap();
    assert_eq!(reply_message(&reply).unwrap(), "Hello sam!");
}

#[tokio::test]
async fn test_handler_failure_is_per_call() {
    let pool = greeter_pool().unwrap();
    let mut greeter = Service::from_pool(&pool, GREETER).unwrap();
    greeter
        .method("SayHello")
        .unwrap()
        .unary(|args: Args, ctx: Context| {
            let name = name_of(&args);
            match name.as_str() {
                "panic" => panic!("handler bug"),
                "" => {
                    ctx.fail(Code::InvalidArgument, "name is required");
                    Ok(json!({}))
                }
                _ => Ok::<_, Status>(hello(&name)),
            }
        })
        .unwrap();
    let server = serve(greeter);

    let err = server.unary(SAY_HELLO, hello_request(&pool, "panic")).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);

    let err = server.unary(SAY_HELLO, hello_request(&pool, "")).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "name is required");

    let reply = server.unary(SAY_HELLO, hello_request(&pool, "wony")).await.unwrap();
    assert_eq!(reply_message(&reply).unwrap(), "Hello wony!");
}

#[tokio::test]
async fn test_raw_record_available() {
    let pool = greeter_pool().unwrap();
    let mut greeter = Service::from_pool(&pool, GREETER).unwrap();
    greeter
        .method("SayHello")
        .unwrap()
        .unary(|args: Args, _ctx: Context| {
            let raw = args.raw().get_field_by_name("name").unwrap();
            Ok::<_, Status>(hello(&format!("raw {}", raw.as_str().unwrap_or_default())))
        })
        .unwrap();
    let server = serve(greeter);

    let reply = server.unary(SAY_HELLO, hello_request(&pool, "tom")).await.unwrap();
    assert_eq!(reply_message(&reply).unwrap(), "Hello raw tom!");
}

#[tokio::test]
async fn test_cancelled_stream_stops() {
    let pool = greeter_pool().unwrap();
    let mut greeter = Service::from_pool(&pool, GREETER).unwrap();
    greeter
        .method("SayHelloGroup")
        .unwrap()
        .server_streaming_async(|_args: Args, _ctx: Context| async move {
            Ok::<_, Status>(futures::stream::repeat_with(|| Ok::<_, Status>(hello("again"))).then(
                |item| async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    item
                },
            ))
        })
        .unwrap();
    let server = serve(greeter);

    let ctx = Context::with_timeout(SAY_HELLO_GROUP, Duration::from_millis(20));
    let err = server
        .call(SAY_HELLO_GROUP, vec![hello_request(&pool, "x")], ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn test_wire_bytes_round_trip() {
    let pool = greeter_pool().unwrap();
    let server = serve(blocking_greeter(&pool));

    let request = encode_record(&hello_request(&pool, "tom"));
    let replies = server.call_bytes(SAY_HELLO, vec![request]).await.unwrap();
    assert_eq!(replies.len(), 1);

    let reply_type = pool.get_message_by_name("helloworld.HelloReply").unwrap();
    let reply = DynamicMessage::decode(reply_type, replies[0].clone()).unwrap();
    assert_eq!(reply_message(&reply).unwrap(), "Hello tom!");

    let err = server
        .call_bytes(SAY_HELLO, vec![bytes::Bytes::from_static(b"\xff\xff")])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_config_merged_into_service() {
    let pool = greeter_pool().unwrap();
    let app_config = AppConfig::from_json_str(
        r#"{"helloworld.Greeter": {"ignore": ["x"]}, "server": {"workers": 2}}"#,
    )
    .unwrap();
    let mut app = App::with_config(app_config);

    let greeter = Service::from_pool(&pool, GREETER)
        .unwrap()
        .with_defaults(json!({"enable": true, "ignore": []}).as_object().unwrap().clone());
    let greeter = app.add_service(greeter).unwrap();
    assert_eq!(
        Value::Object(greeter.config().clone()),
        json!({"enable": true, "ignore": ["x"]})
    );

    let server_config = app.config().server().unwrap();
    assert_eq!(server_config.workers, 2);

    let mut server = TestServer::with_config(&server_config);
    app.bind_to_transport(&mut server).unwrap();
    assert_eq!(server.routes().count(), 4);
}

#[test]
fn test_lookup_errors_list_candidates() {
    let pool = greeter_pool().unwrap();
    let mut app = App::new();
    app.add_from_pool(&pool, GREETER).unwrap();

    let err = app.method(GREETER, "SayBye").unwrap_err();
    assert!(matches!(err, RpcwireError::MethodNotFound { .. }));
    for method in ["SayHello", "SayHelloGroup", "HelloEveryone", "SayHelloOneByOne"] {
        assert!(err.to_string().contains(method));
    }

    let err = app.service("helloworld.Missing").unwrap_err();
    assert!(matches!(err, RpcwireError::ServiceNotFound { .. }));
    assert!(err.to_string().contains(GREETER));
}

//! Greeter demo.
//!
//! Registers the four greeter handlers, binds them to the in-memory test
//! server and calls each method once.
//!
//! ```text
//! RUST_LOG=rpcwire=debug cargo run --example greeter
//! ```

use futures::StreamExt;
use serde_json::json;
use tonic::Status;
use tracing_subscriber::EnvFilter;

use rpcwire::codec::reply_channel;
use rpcwire::testing::{greeter_pool, hello_request, reply_message, TestServer, GREETER};
use rpcwire::{App, AppConfig, Args, Context};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let pool = greeter_pool()?;
    let mut app = App::with_config(AppConfig::from_json_str(
        r#"{"helloworld.Greeter": {"greeting": "Hello"}, "server": {"workers": 4}}"#,
    )?);

    let greeter = app.add_from_pool(&pool, GREETER)?;
    let greeting = greeter
        .config()
        .get("greeting")
        .and_then(|v| v.as_str())
        .unwrap_or("Hello")
        .to_string();

    greeter
        .method("SayHello")?
        .bind(["name"])?
        .unary(move |args: Args, _ctx: Context| {
            Ok::<_, Status>(json!({ "message": format!("{greeting} {}!", args.str("name").unwrap_or_default()) }))
        })?;

    greeter
        .method("SayHelloGroup")?
        .server_streaming_async(|_args: Args, _ctx: Context| async move {
            let (tx, rx) = reply_channel(2);
            tokio::spawn(async move {
                for name in ["a", "b", "c", "d"] {
                    if tx.send(json!({ "message": format!("Hello {name}!") })).await.is_err() {
                        break;
                    }
                }
            });
            Ok::<_, Status>(rx)
        })?;

    greeter.method("HelloEveryone")?.client_streaming(|requests, _ctx| {
        let names = requests
            .map(|r| r.map(|r| format!("'{}'", r.str("name").unwrap_or_default())))
            .collect::<Result<Vec<_>, Status>>()?;
        Ok::<_, Status>(json!({ "message": format!("Hello everyone [{}]!", names.join(",")) }))
    })?;

    greeter
        .method("SayHelloOneByOne")?
        .streaming_async(|requests, _ctx| async move {
            Ok::<_, Status>(requests.map(|r| {
                let r = r?;
                Ok::<_, Status>(json!({ "message": format!("Hello {}!", r.str("name").unwrap_or_default()) }))
            }))
        })?;

    let mut server = TestServer::with_config(&app.config().server()?);
    app.bind_to_transport(&mut server)?;

    let reply = server
        .unary("/helloworld.Greeter/SayHello", hello_request(&pool, "tom"))
        .await?;
    println!("SayHello: {:?}", reply_message(&reply));

    let replies = server
        .server_streaming("/helloworld.Greeter/SayHelloGroup", hello_request(&pool, "groupA"))
        .await?;
    for reply in &replies {
        println!("SayHelloGroup: {:?}", reply_message(reply));
    }

    let names = ["tom", "sam", "wony", "homi"];
    let requests: Vec<_> = names.iter().map(|n| hello_request(&pool, n)).collect();

    let reply = server
        .client_streaming("/helloworld.Greeter/HelloEveryone", requests.clone())
        .await?;
    println!("HelloEveryone: {:?}", reply_message(&reply));

    let replies = server
        .streaming("/helloworld.Greeter/SayHelloOneByOne", requests)
        .await?;
    for reply in &replies {
        println!("SayHelloOneByOne: {:?}", reply_message(reply));
    }

    Ok(())
}

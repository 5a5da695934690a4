use mcp_duplex::protocol::json_rpc::error_codes;
use mcp_duplex::protocol::{
    parse_message, CallToolResult, GetPromptResult, JSONRPCMessage, Prompt, PromptMessage, ReadResourceResult,
    Resource, Role, Tool,
};
use mcp_duplex::server::{ConnectionHandle, DetachedPeer, DispatchOutcome};
use mcp_duplex::{Error, HandlerContext, HttpConfig, HttpTransport, LineTransport, Server};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

fn add_tool() -> Tool {
    Tool::new("add", "Add two numbers")
        .with_property("a", json!({"type": "number"}), true)
        .with_property("b", json!({"type": "number"}), true)
}

fn calculator() -> Server {
    Server::builder()
        .with_implementation("calculator", "1.0.0")
        .with_tool(add_tool(), |args: Value, _ctx: HandlerContext| async move {
            let a = args["a"].as_f64().ok_or_else(|| Error::InvalidParams("a must be a number".into()))?;
            let b = args["b"].as_f64().ok_or_else(|| Error::InvalidParams("b must be a number".into()))?;
            Ok(CallToolResult::text(format!("{}", a + b)))
        })
        .with_resource(
            Resource::new("memo://today", "today"),
            |uri: String, _vars: HashMap<String, String>, _ctx: HandlerContext| async move {
                Ok(ReadResourceResult::text(uri, "nothing planned"))
            },
        )
        .with_prompt(Prompt::new("greet"), |_args: Value, _ctx: HandlerContext| async move {
            Ok(GetPromptResult::new(vec![PromptMessage::text(Role::User, "hello")]))
        })
        .build()
        .unwrap()
}

fn connect(server: &Server) -> ConnectionHandle {
    server.open_connection("client", Arc::new(DetachedPeer))
}

async fn call(server: &Server, connection: &ConnectionHandle, id: i64, method: &str, params: Value) -> JSONRPCMessage {
    let frame = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string();
    match server.handle_raw(connection, &frame).await {
        DispatchOutcome::Response(reply) => reply,
        DispatchOutcome::None => panic!("{} produced no reply", method),
    }
}

fn result(message: JSONRPCMessage) -> Value {
    match message {
        JSONRPCMessage::Response(response) => response.result,
        other => panic!("expected a result, got {:?}", other),
    }
}

fn error_code(message: JSONRPCMessage) -> i32 {
    match message {
        JSONRPCMessage::Error(error) => error.error.code,
        other => panic!("expected an error, got {:?}", other),
    }
}

fn initialize_params() -> Value {
    json!({
        "protocolVersion": "2025-06-18",
        "capabilities": {},
        "clientInfo": {"name": "e2e", "version": "0.0.1"}
    })
}

#[tokio::test]
async fn calculator_session() {
    let empty = Server::builder().with_implementation("empty", "0.0.1").build().unwrap();
    let connection = connect(&empty);
    let init = result(call(&empty, &connection, 1, "initialize", initialize_params()).await);
    assert_eq!(init["protocolVersion"], "2025-06-18");
    let tools = result(call(&empty, &connection, 2, "tools/list", json!({})).await);
    assert_eq!(tools["tools"], json!([]));

    let server = calculator();
    let connection = connect(&server);
    result(call(&server, &connection, 1, "initialize", initialize_params()).await);

    let tools = result(call(&server, &connection, 2, "tools/list", json!({})).await);
    assert_eq!(tools["tools"][0]["name"], "add");

    let sum = result(call(&server, &connection, 3, "tools/call", json!({"name": "add", "arguments": {"a": 2, "b": 3}})).await);
    assert_eq!(sum["content"][0]["text"], "5");
    assert!(sum.get("isError").map_or(true, |flag| flag == false));

    let missing = result(call(&server, &connection, 4, "tools/call", json!({"name": "subtract", "arguments": {"a": 2, "b": 3}})).await);
    assert_eq!(missing["isError"], true);

    let ping = result(call(&server, &connection, 5, "ping", json!({})).await);
    assert_eq!(ping, json!({}));
}

#[tokio::test]
async fn unknown_resources_and_prompts_are_errors() {
    let server = calculator();
    let connection = connect(&server);

    let memo = result(call(&server, &connection, 1, "resources/read", json!({"uri": "memo://today"})).await);
    assert_eq!(memo["contents"][0]["text"], "nothing planned");
    let code = error_code(call(&server, &connection, 2, "resources/read", json!({"uri": "x://missing"})).await);
    assert_eq!(code, error_codes::RESOURCE_NOT_FOUND);

    let greeting = result(call(&server, &connection, 3, "prompts/get", json!({"name": "greet"})).await);
    assert_eq!(greeting["messages"][0]["content"]["text"], "hello");
    let code = error_code(call(&server, &connection, 4, "prompts/get", json!({"name": "farewell"})).await);
    assert_eq!(code, error_codes::INVALID_PARAMS);

    let code = error_code(call(&server, &connection, 5, "tools/remove", json!({})).await);
    assert_eq!(code, error_codes::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn line_transport_over_a_pipe() {
    let server = Arc::new(calculator());
    let (client, transport_side) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(transport_side);
    let transport = LineTransport::new(server.clone());
    let serving = tokio::spawn(async move { transport.serve(reader, writer).await });

    let (client_read, mut client_write) = tokio::io::split(client);
    let mut lines = BufReader::new(client_read).lines();

    let frames = [
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": initialize_params()}),
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "add", "arguments": {"a": 20, "b": 22}}}),
    ];
    for frame in frames {
        client_write.write_all(format!("{}\n", frame).as_bytes()).await.unwrap();
    }

    let mut replies = HashMap::new();
    while replies.len() < 2 {
        let line = lines.next_line().await.unwrap().unwrap();
        let message = parse_message(&line).unwrap();
        let id = message.id().cloned().unwrap();
        replies.insert(id.to_string(), result(message));
    }
    assert_eq!(replies["1"]["serverInfo"]["name"], "calculator");
    assert_eq!(replies["2"]["content"][0]["text"], "42");

    client_write.shutdown().await.unwrap();
    serving.await.unwrap().unwrap();
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn http_transport_serves_health_until_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let transport = HttpTransport::new(Arc::new(calculator()), HttpConfig::default().with_request_tracing(false));
    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(async move {
        transport
            .serve(listener, async move {
                let _ = stopped.await;
            })
            .await
    });

    let mut stream = TcpStream::connect(address).await.unwrap();
    let request = format!("GET /mcp/health HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", address);
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains(r#""status":"ok""#), "{}", response);
    assert!(response.contains(r#""name":"calculator""#), "{}", response);

    stop.send(()).unwrap();
    serving.await.unwrap().unwrap();
}

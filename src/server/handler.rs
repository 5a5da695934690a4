//! Message dispatch
//!
//! Turns one parsed message into a reply (requests) or nothing
//! (notifications and stray replies). Dispatch never fails: every error a
//! handler or the router raises becomes a JSON-RPC error response, except
//! tool failures, which the protocol reports as `isError` results.

use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::context::{ConnectionHandle, HandlerContext};
use super::pagination::paginate;
use super::registry::ResourceHandler;
use super::Server;
use crate::error::{Error, Result};
use crate::middleware::{RequestInfo, RequestKind, Terminal};
use crate::protocol::completion::{CompleteParams, CompleteResult};
use crate::protocol::logging::SetLevelParams;
use crate::protocol::messages::{methods, CancelledParams, InitializeParams, InitializeResult, PaginatedParams, RequestMeta};
use crate::protocol::prompts::{GetPromptParams, ListPromptsResult};
use crate::protocol::resources::{ListResourceTemplatesResult, ListResourcesResult, ReadResourceParams, SubscribeParams};
use crate::protocol::tools::{CallToolParams, ListToolsResult};
use crate::protocol::{
    negotiate_protocol_version, parse_message, CallToolResult, JSONRPCError, JSONRPCMessage, JSONRPCNotification,
    JSONRPCRequest, JSONRPCResponse, RequestId,
};

/// What the transport should do after dispatching one message
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Send this message back
    Response(JSONRPCMessage),
    /// Nothing to send
    None,
}

impl DispatchOutcome {
    /// The reply, if there is one
    pub fn into_response(self) -> Option<JSONRPCMessage> {
        match self {
            DispatchOutcome::Response(message) => Some(message),
            DispatchOutcome::None => None,
        }
    }
}

/// Removes an in-flight entry however the request finishes
struct InFlightGuard<'a> {
    server: &'a Server,
    key: (String, RequestId),
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.server.in_flight.remove(&self.key);
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let params = params.ok_or_else(|| Error::InvalidParams("Missing params".to_string()))?;
    serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))
}

fn parse_optional_params<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(params) => serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn to_result<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

impl Server {
    /// Dispatch one parsed message received on `connection`
    pub async fn handle_message(&self, connection: &ConnectionHandle, message: JSONRPCMessage) -> DispatchOutcome {
        match message {
            JSONRPCMessage::Request(request) => {
                DispatchOutcome::Response(self.handle_request(connection, request).await)
            }
            JSONRPCMessage::Notification(notification) => {
                self.handle_notification(connection, notification);
                DispatchOutcome::None
            }
            JSONRPCMessage::Response(_) | JSONRPCMessage::Error(_) => {
                debug!(
                    "Ignoring unsolicited reply {:?} on connection {}",
                    message.id(),
                    connection.id()
                );
                DispatchOutcome::None
            }
        }
    }

    /// Parse and dispatch one raw frame. Unparseable frames get an error reply.
    pub async fn handle_raw(&self, connection: &ConnectionHandle, raw: &str) -> DispatchOutcome {
        match parse_message(raw) {
            Ok(message) => self.handle_message(connection, message).await,
            Err(failure) => {
                debug!("Rejecting frame on {}: {}", connection.id(), failure);
                DispatchOutcome::Response(failure.to_error_response())
            }
        }
    }

    async fn handle_request(&self, connection: &ConnectionHandle, request: JSONRPCRequest) -> JSONRPCMessage {
        let JSONRPCRequest { id, method, params, .. } = request;

        let cancellation = connection.cancellation().child_token();
        let key = (connection.id().to_string(), id.clone());
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => {
                let error = Error::InvalidRequest(format!("Request id {} is already in flight", id));
                debug!("Refusing {} on {}: {}", method, connection.id(), error);
                return JSONRPCMessage::Error(JSONRPCError::from_error(Some(id), &error));
            }
            Entry::Vacant(slot) => {
                slot.insert(cancellation.clone());
            }
        }
        let _guard = InFlightGuard { server: self, key };

        let log_level = self
            .connections
            .get(connection.id())
            .map(|state| state.log_level.clone())
            .unwrap_or_default();
        let meta = RequestMeta::from_params(params.as_ref());
        let ctx = HandlerContext::new(Some(id.clone()), connection, meta.progress_token, cancellation, log_level);

        let routed = AssertUnwindSafe(self.route(&method, params, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                error!("Handler for {} (id {}) panicked: {}", method, id, panic_message(panic.as_ref()));
                Err(Error::InternalError(format!("Handler for {} panicked", method)))
            });

        match routed {
            Ok(result) => JSONRPCMessage::Response(JSONRPCResponse::new(id, result)),
            Err(error) => {
                debug!("Request {} ({}) failed: {}", id, method, error);
                JSONRPCMessage::Error(JSONRPCError::from_error(Some(id), &error))
            }
        }
    }

    async fn route(&self, method: &str, params: Option<Value>, ctx: HandlerContext) -> Result<Value> {
        match method {
            methods::INITIALIZE => self.initialize(parse_params(params)?, &ctx),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => self.list_tools(parse_optional_params(params)?),
            methods::TOOLS_CALL => self.call_tool(parse_params(params)?, ctx).await,
            methods::RESOURCES_LIST => self.list_resources(parse_optional_params(params)?),
            methods::RESOURCES_TEMPLATES_LIST => self.list_resource_templates(parse_optional_params(params)?),
            methods::RESOURCES_READ => self.read_resource(parse_params(params)?, ctx).await,
            methods::RESOURCES_SUBSCRIBE => {
                let SubscribeParams { uri } = parse_params(params)?;
                self.subscriptions.subscribe(&uri, ctx.connection_id());
                Ok(json!({}))
            }
            methods::RESOURCES_UNSUBSCRIBE => {
                let SubscribeParams { uri } = parse_params(params)?;
                self.subscriptions.unsubscribe(&uri, ctx.connection_id());
                Ok(json!({}))
            }
            methods::PROMPTS_LIST => self.list_prompts(parse_optional_params(params)?),
            methods::PROMPTS_GET => self.get_prompt(parse_params(params)?, ctx).await,
            methods::COMPLETION_COMPLETE => self.complete(parse_params(params)?, ctx).await,
            methods::LOGGING_SET_LEVEL => {
                let SetLevelParams { level } = parse_params(params)?;
                if let Some(state) = self.connections.get(ctx.connection_id()) {
                    *state.log_level.lock() = Some(level);
                }
                Ok(json!({}))
            }
            _ => Err(Error::MethodNotFound(method.to_string())),
        }
    }

    fn initialize(&self, params: InitializeParams, ctx: &HandlerContext) -> Result<Value> {
        let version = negotiate_protocol_version(Some(params.protocol_version.as_str()));
        debug!(
            "Initializing connection {} for {} {} (requested {}, using {})",
            ctx.connection_id(),
            params.client_info.name,
            params.client_info.version,
            params.protocol_version,
            version
        );
        if let Some(mut state) = self.connections.get_mut(ctx.connection_id()) {
            state.set_client(params.client_info, version, params.capabilities);
        }
        to_result(InitializeResult {
            protocol_version: version.to_string(),
            capabilities: self.options.capabilities.to_wire(),
            server_info: self.options.implementation.clone(),
            instructions: self.options.instructions.clone(),
        })
    }

    fn list_tools(&self, params: PaginatedParams) -> Result<Value> {
        let tools: Vec<_> = self.registry.tools.values().map(|t| t.tool.clone()).collect();
        let (tools, next_cursor) = paginate(&tools, params.cursor.as_deref(), self.options.page_limits);
        to_result(ListToolsResult { tools, next_cursor })
    }

    fn list_resources(&self, params: PaginatedParams) -> Result<Value> {
        let resources: Vec<_> = self.registry.resources.values().map(|r| r.resource.clone()).collect();
        let (resources, next_cursor) = paginate(&resources, params.cursor.as_deref(), self.options.page_limits);
        to_result(ListResourcesResult { resources, next_cursor })
    }

    fn list_resource_templates(&self, params: PaginatedParams) -> Result<Value> {
        let templates: Vec<_> = self.registry.templates.iter().map(|t| t.template.clone()).collect();
        let (resource_templates, next_cursor) = paginate(&templates, params.cursor.as_deref(), self.options.page_limits);
        to_result(ListResourceTemplatesResult {
            resource_templates,
            next_cursor,
        })
    }

    fn list_prompts(&self, params: PaginatedParams) -> Result<Value> {
        let prompts: Vec<_> = self.registry.prompts.values().map(|p| p.prompt.clone()).collect();
        let (prompts, next_cursor) = paginate(&prompts, params.cursor.as_deref(), self.options.page_limits);
        to_result(ListPromptsResult { prompts, next_cursor })
    }

    async fn call_tool(&self, params: CallToolParams, ctx: HandlerContext) -> Result<Value> {
        let Some(entry) = self.registry.tools.get(&params.name) else {
            return to_result(CallToolResult::error(format!("Unknown tool: {}", params.name)));
        };

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let info = RequestInfo::new(RequestKind::Tool, &params.name, arguments.clone());
        let handler = entry.handler.clone();
        let terminal: Terminal = Arc::new(move |ctx: HandlerContext| {
            let handler = handler.clone();
            let arguments = arguments.clone();
            async move { to_result(handler.call(arguments, ctx).await?) }.boxed()
        });

        match self.middleware.execute(&ctx, info, terminal).await {
            Ok(result) => Ok(result),
            Err(error) if error.is_programming_error() => Err(Error::InternalError(error.to_string())),
            Err(error) => {
                warn!("Tool {} failed: {}", params.name, error);
                to_result(CallToolResult::error(error.to_string()))
            }
        }
    }

    async fn read_resource(&self, params: ReadResourceParams, ctx: HandlerContext) -> Result<Value> {
        let uri = params.uri;
        let (handler, variables): (Arc<dyn ResourceHandler>, HashMap<String, String>) = self
            .registry
            .resolve_resource(&uri)
            .ok_or_else(|| Error::ResourceNotFound(uri.clone()))?;

        let info = RequestInfo::new(RequestKind::Resource, &uri, serde_json::to_value(&variables)?);
        let terminal: Terminal = Arc::new(move |ctx: HandlerContext| {
            let handler = handler.clone();
            let uri = uri.clone();
            let variables = variables.clone();
            async move { to_result(handler.read(uri, variables, ctx).await?) }.boxed()
        });
        self.middleware.execute(&ctx, info, terminal).await.map_err(into_internal)
    }

    async fn get_prompt(&self, params: GetPromptParams, ctx: HandlerContext) -> Result<Value> {
        let entry = self
            .registry
            .prompts
            .get(&params.name)
            .ok_or_else(|| Error::PromptNotFound(params.name.clone()))?;

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let info = RequestInfo::new(RequestKind::Prompt, &params.name, arguments.clone());
        let handler = entry.handler.clone();
        let terminal: Terminal = Arc::new(move |ctx: HandlerContext| {
            let handler = handler.clone();
            let arguments = arguments.clone();
            async move { to_result(handler.get(arguments, ctx).await?) }.boxed()
        });
        self.middleware.execute(&ctx, info, terminal).await.map_err(into_internal)
    }

    async fn complete(&self, params: CompleteParams, ctx: HandlerContext) -> Result<Value> {
        match &self.registry.completion {
            Some(handler) => to_result(handler.complete(params, ctx).await?),
            None => to_result(CompleteResult::default()),
        }
    }

    fn handle_notification(&self, connection: &ConnectionHandle, notification: JSONRPCNotification) {
        match notification.method.as_str() {
            methods::NOTIFICATION_INITIALIZED => {
                if let Some(mut state) = self.connections.get_mut(connection.id()) {
                    state.initialized = true;
                }
                debug!("Connection {} initialized", connection.id());
            }
            methods::NOTIFICATION_CANCELLED => {
                match parse_params::<CancelledParams>(notification.params) {
                    Ok(params) => self.cancel_request(connection.id(), &params.request_id, params.reason.as_deref()),
                    Err(e) => debug!("Ignoring malformed cancellation on {}: {}", connection.id(), e),
                }
            }
            methods::NOTIFICATION_ROOTS_LIST_CHANGED => {
                debug!("Client {} reports its roots changed", connection.id());
            }
            other => debug!("Ignoring notification {} on {}", other, connection.id()),
        }
    }

    fn cancel_request(&self, connection_id: &str, request_id: &RequestId, reason: Option<&str>) {
        let key = (connection_id.to_string(), request_id.clone());
        match self.in_flight.get(&key) {
            Some(token) => {
                debug!(
                    "Cancelling request {} on {}: {}",
                    request_id,
                    connection_id,
                    reason.unwrap_or("no reason given")
                );
                token.cancel();
            }
            None => debug!("Cancellation for unknown request {} on {}", request_id, connection_id),
        }
    }
}

/// Middleware bugs surface as internal errors; everything else keeps its own code
fn into_internal(error: Error) -> Error {
    if error.is_programming_error() {
        Error::InternalError(error.to_string())
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::middleware::{Middleware, Next};
    use crate::protocol::completion::CompletionReference;
    use crate::protocol::json_rpc::error_codes;
    use crate::protocol::{GetPromptResult, Prompt, PromptMessage, ReadResourceResult, Resource, ResourceTemplate, Role, Tool};
    use crate::server::context::tests::RecordingPeer;
    use async_trait::async_trait;
    use std::time::Duration;

    fn add_tool() -> Tool {
        Tool::new("add", "Add two numbers")
            .with_property("a", json!({"type": "number"}), true)
            .with_property("b", json!({"type": "number"}), true)
    }

    fn demo_server() -> Server {
        Server::builder()
            .with_implementation("demo", "0.1.0")
            .with_instructions("be nice")
            .with_tool(add_tool(), |args: Value, _ctx: HandlerContext| async move {
                let a = args["a"].as_f64().ok_or_else(|| Error::InvalidParams("a".into()))?;
                let b = args["b"].as_f64().ok_or_else(|| Error::InvalidParams("b".into()))?;
                Ok(CallToolResult::text(format!("{}", a + b)))
            })
            .with_tool(Tool::new("explode", "Always fails"), |_args: Value, _ctx: HandlerContext| async move {
                Err::<CallToolResult, _>(Error::handler("disk full"))
            })
            .with_resource(
                Resource::new("config://app", "config"),
                |uri: String, _vars: HashMap<String, String>, _ctx: HandlerContext| async move {
                    Ok(ReadResourceResult::text(uri, "static"))
                },
            )
            .with_resource_template(
                ResourceTemplate::new("users://{id}", "user"),
                |uri: String, vars: HashMap<String, String>, _ctx: HandlerContext| async move {
                    Ok(ReadResourceResult::text(uri, format!("user {}", vars["id"])))
                },
            )
            .with_prompt(Prompt::new("greet"), |args: Value, _ctx: HandlerContext| async move {
                let who = args["who"].as_str().unwrap_or("world").to_string();
                Ok(GetPromptResult::new(vec![PromptMessage::text(Role::User, format!("hello {}", who))]))
            })
            .build()
            .unwrap()
    }

    async fn request(server: &Server, conn: &ConnectionHandle, method: &str, params: Value) -> JSONRPCMessage {
        let message = JSONRPCMessage::Request(JSONRPCRequest::new(1, method, Some(params)));
        server.handle_message(conn, message).await.into_response().unwrap()
    }

    fn result(message: JSONRPCMessage) -> Value {
        match message {
            JSONRPCMessage::Response(r) => r.result,
            other => panic!("expected success, got {:?}", other),
        }
    }

    fn error_code(message: JSONRPCMessage) -> i32 {
        match message {
            JSONRPCMessage::Error(e) => e.error.code,
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_negotiates_and_records_client() {
        let server = demo_server();
        let conn = server.open_connection("c1", Arc::new(RecordingPeer::new()));

        let init = result(
            request(
                &server,
                &conn,
                methods::INITIALIZE,
                json!({"protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": {"name": "host", "version": "9"}}),
            )
            .await,
        );
        assert_eq!(init["protocolVersion"], "2024-11-05");
        assert_eq!(init["serverInfo"]["name"], "demo");
        assert_eq!(init["instructions"], "be nice");
        assert!(init["capabilities"]["tools"].is_object());
        assert_eq!(init["capabilities"]["resources"]["subscribe"], true);

        let info = server.connection_info("c1").unwrap();
        assert_eq!(info.client_info.unwrap().name, "host");
        assert!(!info.initialized);

        let note = JSONRPCMessage::Notification(JSONRPCNotification::new(methods::NOTIFICATION_INITIALIZED, None));
        assert_eq!(server.handle_message(&conn, note).await, DispatchOutcome::None);
        assert!(server.connection_info("c1").unwrap().initialized);
    }

    #[tokio::test]
    async fn test_unknown_method_and_missing_params() {
        let server = demo_server();
        let conn = ConnectionHandle::detached("c");
        assert_eq!(error_code(request(&server, &conn, "tools/explode", json!({})).await), error_codes::METHOD_NOT_FOUND);

        let message = JSONRPCMessage::Request(JSONRPCRequest::new(2, methods::TOOLS_CALL, None));
        let reply = server.handle_message(&conn, message).await.into_response().unwrap();
        assert_eq!(error_code(reply), error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_tool_call_outcomes() {
        let server = demo_server();
        let conn = ConnectionHandle::detached("c");

        let ok = result(request(&server, &conn, methods::TOOLS_CALL, json!({"name": "add", "arguments": {"a": 2, "b": 3}})).await);
        assert_eq!(ok["content"][0]["text"], "5");
        assert!(ok.get("isError").is_none());

        let missing = result(request(&server, &conn, methods::TOOLS_CALL, json!({"name": "nope"})).await);
        assert_eq!(missing["isError"], true);

        let failed = result(request(&server, &conn, methods::TOOLS_CALL, json!({"name": "explode"})).await);
        assert_eq!(failed["isError"], true);
        assert_eq!(failed["content"][0]["text"], "disk full");
    }

    #[tokio::test]
    async fn test_resource_read_and_not_found() {
        let server = demo_server();
        let conn = ConnectionHandle::detached("c");

        let fixed = result(request(&server, &conn, methods::RESOURCES_READ, json!({"uri": "config://app"})).await);
        assert_eq!(fixed["contents"][0]["text"], "static");

        let templated = result(request(&server, &conn, methods::RESOURCES_READ, json!({"uri": "users://42"})).await);
        assert_eq!(templated["contents"][0]["text"], "user 42");

        let missing = request(&server, &conn, methods::RESOURCES_READ, json!({"uri": "x://missing"})).await;
        match missing {
            JSONRPCMessage::Error(e) => {
                assert_eq!(e.error.code, error_codes::RESOURCE_NOT_FOUND);
                assert_eq!(e.error.data, Some(json!({"uri": "x://missing"})));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prompt_get_and_not_found() {
        let server = demo_server();
        let conn = ConnectionHandle::detached("c");

        let got = result(request(&server, &conn, methods::PROMPTS_GET, json!({"name": "greet", "arguments": {"who": "Ada"}})).await);
        assert_eq!(got["messages"][0]["content"]["text"], "hello Ada");

        let missing = request(&server, &conn, methods::PROMPTS_GET, json!({"name": "nope"})).await;
        assert_eq!(error_code(missing), error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_lists_paginate() {
        let mut builder = Server::builder().with_page_size(3, 10);
        for i in 0..10 {
            builder = builder.with_tool(Tool::new(format!("t{}", i), "tool"), |_a: Value, _c: HandlerContext| async move {
                Ok(CallToolResult::text(""))
            });
        }
        let server = builder.build().unwrap();
        let conn = ConnectionHandle::detached("c");

        let mut names = Vec::new();
        let mut params = json!({});
        for _ in 0..4 {
            let page = result(request(&server, &conn, methods::TOOLS_LIST, params.clone()).await);
            for tool in page["tools"].as_array().unwrap() {
                names.push(tool["name"].as_str().unwrap().to_string());
            }
            match page.get("nextCursor") {
                Some(cursor) => params = json!({"cursor": cursor}),
                None => break,
            }
        }
        let expected: Vec<String> = (0..10).map(|i| format!("t{}", i)).collect();
        assert_eq!(names, expected);

        let garbage = result(request(&server, &conn, methods::TOOLS_LIST, json!({"cursor": "garbage!"})).await);
        assert_eq!(garbage["tools"][0]["name"], "t0");

        let empty = result(request(&server, &conn, methods::PROMPTS_LIST, json!({})).await);
        assert_eq!(empty, json!({"prompts": []}));
    }

    #[tokio::test]
    async fn test_notifications_never_reply() {
        let server = demo_server();
        let conn = ConnectionHandle::detached("c");
        for method in ["notifications/whatever", methods::NOTIFICATION_CANCELLED, methods::NOTIFICATION_ROOTS_LIST_CHANGED] {
            let note = JSONRPCMessage::Notification(JSONRPCNotification::new(method, Some(json!({"junk": true}))));
            assert_eq!(server.handle_message(&conn, note).await, DispatchOutcome::None);
        }
        let stray = JSONRPCMessage::Response(JSONRPCResponse::new(99, json!({})));
        assert_eq!(server.handle_message(&conn, stray).await, DispatchOutcome::None);
    }

    #[tokio::test]
    async fn test_raw_frames() {
        let server = demo_server();
        let conn = ConnectionHandle::detached("c");
        let reply = server.handle_raw(&conn, "{oops").await.into_response().unwrap();
        assert_eq!(error_code(reply), error_codes::PARSE_ERROR);

        let reply = server
            .handle_raw(&conn, r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#)
            .await
            .into_response()
            .unwrap();
        assert_eq!(result(reply), json!({}));
    }

    #[tokio::test]
    async fn test_cancellation_reaches_running_handler() {
        let server = Arc::new(
            Server::builder()
                .with_tool(Tool::new("wait", "Waits for cancellation"), |_a: Value, ctx: HandlerContext| async move {
                    ctx.cancellation_token().cancelled().await;
                    Ok(CallToolResult::text("stopped"))
                })
                .build()
                .unwrap(),
        );
        let conn = server.open_connection("c", Arc::new(RecordingPeer::new()));

        let call = JSONRPCMessage::Request(JSONRPCRequest::new(7, methods::TOOLS_CALL, Some(json!({"name": "wait"}))));
        let task = {
            let (server, conn) = (server.clone(), conn.clone());
            tokio::spawn(async move { server.handle_message(&conn, call).await })
        };

        while server.in_flight_count() == 0 {
            tokio::task::yield_now().await;
        }
        let cancel = JSONRPCMessage::Notification(JSONRPCNotification::new(
            methods::NOTIFICATION_CANCELLED,
            Some(json!({"requestId": 7, "reason": "user"})),
        ));
        server.handle_message(&conn, cancel).await;

        let reply = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(result(reply.into_response().unwrap())["content"][0]["text"], "stopped");
        assert_eq!(server.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_id_is_refused() {
        let server = Arc::new(
            Server::builder()
                .with_tool(Tool::new("wait", "Waits for cancellation"), |_a: Value, ctx: HandlerContext| async move {
                    ctx.cancellation_token().cancelled().await;
                    Ok(CallToolResult::text("stopped"))
                })
                .build()
                .unwrap(),
        );
        let conn = server.open_connection("c", Arc::new(RecordingPeer::new()));

        let call = || JSONRPCMessage::Request(JSONRPCRequest::new(7, methods::TOOLS_CALL, Some(json!({"name": "wait"}))));
        let first = {
            let (server, conn, call) = (server.clone(), conn.clone(), call());
            tokio::spawn(async move { server.handle_message(&conn, call).await })
        };
        while server.in_flight_count() == 0 {
            tokio::task::yield_now().await;
        }

        let duplicate = server.handle_message(&conn, call()).await.into_response().unwrap();
        assert_eq!(duplicate.id(), Some(&RequestId::Integer(7)));
        assert_eq!(error_code(duplicate), error_codes::INVALID_REQUEST);
        assert_eq!(server.in_flight_count(), 1);

        // the first request is still reachable by cancellation
        let cancel = JSONRPCMessage::Notification(JSONRPCNotification::new(
            methods::NOTIFICATION_CANCELLED,
            Some(json!({"requestId": 7})),
        ));
        server.handle_message(&conn, cancel).await;
        let reply = tokio::time::timeout(Duration::from_secs(5), first).await.unwrap().unwrap();
        assert_eq!(result(reply.into_response().unwrap())["content"][0]["text"], "stopped");
        assert_eq!(server.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_gets_an_error_reply() {
        let server = Server::builder()
            .with_tool(Tool::new("boom", "Panics"), |_a: Value, _ctx: HandlerContext| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(CallToolResult::text("unreachable"))
            })
            .build()
            .unwrap();
        let conn = server.open_connection("c", Arc::new(RecordingPeer::new()));

        let reply = request(&server, &conn, methods::TOOLS_CALL, json!({"name": "boom"})).await;
        assert_eq!(reply.id(), Some(&RequestId::Integer(1)));
        assert_eq!(error_code(reply), error_codes::INTERNAL_ERROR);
        assert_eq!(server.in_flight_count(), 0);

        let pong = request(&server, &conn, methods::PING, json!({})).await;
        assert_eq!(result(pong), json!({}));
    }

    #[tokio::test]
    async fn test_progress_and_log_level() {
        let peer = Arc::new(RecordingPeer::new());
        let server = Server::builder()
            .with_tool(Tool::new("work", "Reports"), |_a: Value, ctx: HandlerContext| async move {
                ctx.progress(1.0, Some(1.0), None)?;
                ctx.log(crate::protocol::logging::LoggingLevel::Debug, None, json!("chatty"))?;
                ctx.log(crate::protocol::logging::LoggingLevel::Error, None, json!("bad"))?;
                Ok(CallToolResult::text("done"))
            })
            .build()
            .unwrap();
        let conn = server.open_connection("c", peer.clone());

        result(request(&server, &conn, methods::LOGGING_SET_LEVEL, json!({"level": "warning"})).await);
        result(
            request(&server, &conn, methods::TOOLS_CALL, json!({"name": "work", "_meta": {"progressToken": "p1"}})).await,
        );

        assert_eq!(
            peer.methods(),
            vec![methods::NOTIFICATION_PROGRESS.to_string(), methods::NOTIFICATION_MESSAGE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_subscribe_and_completion() {
        let server = demo_server();
        let conn = server.open_connection("c", Arc::new(RecordingPeer::new()));

        result(request(&server, &conn, methods::RESOURCES_SUBSCRIBE, json!({"uri": "users://1"})).await);
        assert_eq!(server.subscriptions().subscribers("users://1"), vec!["c".to_string()]);
        result(request(&server, &conn, methods::RESOURCES_UNSUBSCRIBE, json!({"uri": "users://1"})).await);
        assert!(!server.subscriptions().has_subscribers("users://1"));

        let params = json!({"ref": {"type": "ref/prompt", "name": "greet"}, "argument": {"name": "who", "value": "A"}});
        let empty = result(request(&server, &conn, methods::COMPLETION_COMPLETE, params.clone()).await);
        assert_eq!(empty["completion"]["values"], json!([]));

        let completing = Server::builder()
            .with_completion(|p: CompleteParams, _ctx: HandlerContext| async move {
                assert!(matches!(p.reference, CompletionReference::Prompt { .. }));
                Ok(CompleteResult::from_values(vec![format!("{}da", p.argument.value)]))
            })
            .build()
            .unwrap();
        let values = result(request(&completing, &conn, methods::COMPLETION_COMPLETE, params).await);
        assert_eq!(values["completion"]["values"], json!(["Ada"]));
    }

    struct CallsTwice;

    #[async_trait]
    impl Middleware for CallsTwice {
        async fn handle(&self, ctx: &HandlerContext, _info: &RequestInfo, next: Next) -> Result<Value> {
            next.run(ctx).await?;
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn test_middleware_misuse_is_internal_error() {
        let server = Server::builder()
            .with_middleware(CallsTwice)
            .with_tool(add_tool(), |_a: Value, _c: HandlerContext| async move { Ok(CallToolResult::text("5")) })
            .build()
            .unwrap();
        let conn = ConnectionHandle::detached("c");
        let reply = request(&server, &conn, methods::TOOLS_CALL, json!({"name": "add", "arguments": {}})).await;
        assert_eq!(error_code(reply), error_codes::INTERNAL_ERROR);
    }
}

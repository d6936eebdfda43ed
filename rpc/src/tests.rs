use crate::prelude::*;
use ferrite_core::channel::{Channel, Receiver};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

const MAX_DEPTH: usize = 10;

#[api]
pub trait Calculator {
    fn add(&self, a: i32, b: i32) -> i32;
    fn sub(&self, a: i32, b: i32) -> i32;
    fn on_result(&self, callback: Callback<i32>);
}

#[api]
pub trait Login {
    fn get_calc(&self) -> Api<dyn Calculator>;
    fn test(&self, a: String, b: String) -> BTreeSet<String>;
}

#[api]
pub trait Optionals {
    fn foo(&self, first: String, second: Option<String>, third: Option<String>) -> String;
}

#[derive(Default)]
struct SomeCalculator {
    callback: Mutex<Option<Callback<i32>>>,
}

impl Calculator for SomeCalculator {
    fn add(&self, a: i32, b: i32) -> i32 {
        let sum = a + b;
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            let _ = callback.notify(sum);
        }
        sum
    }

    fn sub(&self, a: i32, b: i32) -> i32 {
        let difference = a - b;
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            let _ = callback.notify(difference);
        }
        difference
    }

    fn on_result(&self, callback: Callback<i32>) {
        *self.callback.lock().unwrap() = Some(callback);
    }
}

struct LoginService {
    calc: Api<dyn Calculator>,
}

impl Login for LoginService {
    fn get_calc(&self) -> Api<dyn Calculator> {
        self.calc.clone()
    }

    fn test(&self, a: String, b: String) -> BTreeSet<String> {
        [a, b].into_iter().collect()
    }
}

struct OptionalsService;

impl Optionals for OptionalsService {
    fn foo(&self, first: String, second: Option<String>, third: Option<String>) -> String {
        let slots = Variant::Array(vec![
            Variant::String(first),
            second.map(Variant::String).unwrap_or(Variant::Null),
            third.map(Variant::String).unwrap_or(Variant::Null),
        ]);
        json::to_string(&slots, json::DEFAULT_MAX_DEPTH).unwrap()
    }
}

/// Transport that records outbound frames without delivering them
/// anywhere; the peer never answers.
#[derive(Default)]
struct RecordingTransport {
    frames: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.frames.lock().unwrap())
    }
}

impl Transport for RecordingTransport {
    fn send_text(&self, text: String) -> RpcResult<()> {
        self.frames.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self, _code: u16, _reason: &str) {}

    fn remote_endpoint(&self) -> String {
        "recording".to_string()
    }
}

struct ChannelTransport {
    outbound: ferrite_core::channel::Sender<String>,
}

impl Transport for ChannelTransport {
    fn send_text(&self, text: String) -> RpcResult<()> {
        self.outbound
            .try_send(text)
            .map_err(|_| RpcError::connection_closed())
    }

    fn close(&self, _code: u16, _reason: &str) {}

    fn remote_endpoint(&self) -> String {
        "loopback".to_string()
    }
}

/// Two connections wired back to back through in-process channels,
/// with per-direction pumps so frame ordering matches a real socket.
fn loopback_pair(max_depth: usize) -> (Arc<ApiConnection>, Arc<ApiConnection>) {
    let a_to_b = Channel::<String>::unbounded();
    let b_to_a = Channel::<String>::unbounded();

    let a = ApiConnection::new(
        Arc::new(ChannelTransport {
            outbound: a_to_b.sender.clone(),
        }),
        max_depth,
    );
    let b = ApiConnection::new(
        Arc::new(ChannelTransport {
            outbound: b_to_a.sender.clone(),
        }),
        max_depth,
    );

    fn pump(receiver: Receiver<String>, connection: Arc<ApiConnection>) {
        ferrite_core::task::spawn(async move {
            while let Ok(text) = receiver.recv().await {
                connection.handle_message(&text).await;
            }
        });
    }
    pump(a_to_b.receiver.clone(), b.clone());
    pump(b_to_a.receiver.clone(), a.clone());

    (a, b)
}

async fn serve<F>(on_connection: F) -> (WebSocketApiServer, String)
where
    F: Fn(&Arc<ApiConnection>) + Send + Sync + 'static,
{
    let server = WebSocketApiServer::new(ServerOptions {
        max_depth: MAX_DEPTH,
        ..Default::default()
    })
    .unwrap();
    server.on_connection(on_connection);
    server.listen("127.0.0.1:0").await.unwrap();
    let port = server.listening_port().unwrap();
    server.start_accept().unwrap();
    (server, format!("ws://127.0.0.1:{port}"))
}

fn client_options() -> ClientOptions {
    ClientOptions {
        max_depth: MAX_DEPTH,
        ..Default::default()
    }
}

fn response_of(frame: &str) -> (u64, Result<Variant, i64>) {
    let value = json::from_string(frame, json::DEFAULT_MAX_DEPTH).unwrap();
    let object = value.as_object().unwrap();
    let id = object.get("id").unwrap().as_u64().unwrap();
    if let Some(result) = object.get("result") {
        (id, Ok(result.clone()))
    } else {
        let error = object.get("error").unwrap().as_object().unwrap();
        (id, Err(error.get("code").unwrap().as_i64().unwrap()))
    }
}

#[tokio::test]
async fn optional_tail_local() {
    let api = Api::<dyn Optionals>::local(Arc::new(OptionalsService));
    assert_eq!(
        api.foo("a".into(), None, None).await.unwrap(),
        r#"["a",null,null]"#
    );
    assert_eq!(
        api.foo("a".into(), Some("b".into()), None).await.unwrap(),
        r#"["a","b",null]"#
    );
    assert_eq!(
        api.foo("a".into(), Some("b".into()), Some("c".into()))
            .await
            .unwrap(),
        r#"["a","b","c"]"#
    );
    assert_eq!(
        api.foo("a".into(), None, Some("c".into())).await.unwrap(),
        r#"["a",null,"c"]"#
    );
}

#[tokio::test]
async fn optional_tail_over_websocket() {
    let optionals = Api::<dyn Optionals>::local(Arc::new(OptionalsService));
    let (server, url) = serve(move |connection| {
        connection.register_api(&optionals).ok();
    })
    .await;

    let client = WebSocketApiClient::connect(&url, client_options())
        .await
        .unwrap();
    let remote = client.connection().get_remote_api::<dyn Optionals>();

    assert_eq!(
        remote.foo("a".into(), None, None).await.unwrap(),
        r#"["a",null,null]"#
    );
    assert_eq!(
        remote.foo("a".into(), Some("b".into()), None).await.unwrap(),
        r#"["a","b",null]"#
    );
    assert_eq!(
        remote
            .foo("a".into(), Some("b".into()), Some("c".into()))
            .await
            .unwrap(),
        r#"["a","b","c"]"#
    );
    assert_eq!(
        remote.foo("a".into(), None, Some("c".into())).await.unwrap(),
        r#"["a",null,"c"]"#
    );

    client.synchronous_close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn trailing_optionals_are_elided_on_the_wire() {
    let transport = Arc::new(RecordingTransport::default());
    let connection = ApiConnection::new(transport.clone(), MAX_DEPTH);
    let proxy = connection.get_remote_api::<dyn Optionals>();

    let call = tokio::spawn({
        let proxy = proxy.clone();
        async move { proxy.foo("a".into(), None, Some("c".into())).await }
    });
    sleep(Duration::from_millis(20)).await;

    let frames = transport.take();
    assert_eq!(frames.len(), 1);
    let value = json::from_string(&frames[0], MAX_DEPTH).unwrap();
    let params = value
        .as_object()
        .unwrap()
        .get("params")
        .unwrap()
        .as_array()
        .unwrap();
    let args = params[2].as_array().unwrap();
    assert_eq!(args, &[Variant::String("a".into()), Variant::Null, Variant::String("c".into())]);

    // a fully elided tail shrinks to the required prefix
    let second = tokio::spawn({
        let proxy = proxy.clone();
        async move { proxy.foo("a".into(), None, None).await }
    });
    sleep(Duration::from_millis(20)).await;
    let frames = transport.take();
    let value = json::from_string(&frames[0], MAX_DEPTH).unwrap();
    let params = value
        .as_object()
        .unwrap()
        .get("params")
        .unwrap()
        .as_array()
        .unwrap();
    assert_eq!(params[2].as_array().unwrap().len(), 1);

    connection.close();
    assert_eq!(
        call.await.unwrap().unwrap_err().kind(),
        ErrorKind::ConnectionClosed
    );
    assert_eq!(
        second.await.unwrap().unwrap_err().kind(),
        ErrorKind::ConnectionClosed
    );
}

#[tokio::test]
async fn request_ids_are_unique_and_matched_out_of_order() {
    let transport = Arc::new(RecordingTransport::default());
    let connection = ApiConnection::new(transport.clone(), MAX_DEPTH);

    let first = tokio::spawn({
        let connection = connection.clone();
        async move {
            connection
                .send_call(0, OpRef::Name("one".into()), vec![])
                .await
        }
    });
    let second = tokio::spawn({
        let connection = connection.clone();
        async move {
            connection
                .send_call(0, OpRef::Name("two".into()), vec![])
                .await
        }
    });
    sleep(Duration::from_millis(20)).await;

    let frames = transport.take();
    assert_eq!(frames.len(), 2);
    let mut ids = std::collections::HashMap::new();
    for frame in &frames {
        let value = json::from_string(frame, MAX_DEPTH).unwrap();
        let object = value.as_object().unwrap();
        let id = object.get("id").unwrap().as_u64().unwrap();
        let params = object.get("params").unwrap().as_array().unwrap();
        ids.insert(params[1].as_str().unwrap().to_string(), id);
    }
    assert_ne!(ids["one"], ids["two"]);

    // responses arrive out of order and are matched by id
    connection
        .handle_message(&format!("{{\"id\":{},\"result\":2}}", ids["two"]))
        .await;
    connection
        .handle_message(&format!("{{\"id\":{},\"result\":1}}", ids["one"]))
        .await;

    assert_eq!(first.await.unwrap().unwrap(), Variant::UInt64(1));
    assert_eq!(second.await.unwrap().unwrap(), Variant::UInt64(2));
}

#[tokio::test]
async fn dispatch_paths_and_error_codes() {
    let transport = Arc::new(RecordingTransport::default());
    let connection = ApiConnection::new(transport.clone(), MAX_DEPTH);

    let calc = Api::<dyn Calculator>::local(Arc::new(SomeCalculator::default()));
    assert_eq!(connection.register_api(&calc).unwrap(), 1);
    // re-registering the same object yields the same handle
    assert_eq!(connection.register_api(&calc).unwrap(), 1);
    // a different owner gets a fresh handle
    let other = Api::<dyn Calculator>::local(Arc::new(SomeCalculator::default()));
    assert_eq!(connection.register_api(&other).unwrap(), 2);

    // handle 0 addresses the bootstrap api; operations resolve by name
    connection
        .handle_message(r#"{"method":"call","params":[0,"add",[4,5]],"id":7}"#)
        .await;
    // ... and by ordinal against an explicit handle
    connection
        .handle_message(r#"{"method":"call","params":[1,1,[9,3]],"id":8}"#)
        .await;
    connection
        .handle_message(r#"{"method":"call","params":[9,"add",[1,2]],"id":9}"#)
        .await;
    connection
        .handle_message(r#"{"method":"call","params":[1,"mul",[1,2]],"id":10}"#)
        .await;
    connection
        .handle_message(r#"{"method":"call","params":[1,"add",[1]],"id":11}"#)
        .await;
    connection
        .handle_message(r#"{"method":"call","params":[1,"add",["x",2]],"id":12}"#)
        .await;

    let frames = transport.take();
    assert_eq!(frames.len(), 6);
    let responses: Vec<_> = frames.iter().map(|frame| response_of(frame)).collect();
    assert_eq!(responses[0], (7, Ok(Variant::UInt64(9))));
    assert_eq!(responses[1], (8, Ok(Variant::UInt64(6))));
    assert_eq!(responses[2], (9, Err(-32001))); // unknown api
    assert_eq!(responses[3], (10, Err(-32601))); // unknown method
    assert_eq!(responses[4], (11, Err(-32602))); // bad arity
    assert_eq!(responses[5], (12, Err(-32002))); // bad cast
}

#[tokio::test]
async fn unknown_callback_frames_are_dropped() {
    let transport = Arc::new(RecordingTransport::default());
    let connection = ApiConnection::new(transport.clone(), MAX_DEPTH);

    connection
        .handle_message(r#"{"method":"notice","params":[42,[1]]}"#)
        .await;
    connection
        .handle_message(r#"{"method":"callback","params":[42,[1]],"id":5}"#)
        .await;

    // both frames are dropped without a response
    assert!(transport.take().is_empty());

    // the connection still dispatches normally afterwards
    let calc = Api::<dyn Calculator>::local(Arc::new(SomeCalculator::default()));
    connection.register_api(&calc).unwrap();
    connection
        .handle_message(r#"{"method":"call","params":[0,"add",[2,2]],"id":6}"#)
        .await;
    let frames = transport.take();
    assert_eq!(response_of(&frames[0]), (6, Ok(Variant::UInt64(4))));
}

#[tokio::test]
async fn callback_notice_roundtrip_over_loopback() {
    let (client, server) = loopback_pair(MAX_DEPTH);
    let calc = Api::<dyn Calculator>::local(Arc::new(SomeCalculator::default()));
    server.register_api(&calc).unwrap();

    let proxy = client.get_remote_api::<dyn Calculator>();
    let received = Arc::new(Mutex::new(Vec::<i32>::new()));
    let sink = received.clone();
    proxy
        .on_result(Callback::new(move |value: i32| {
            sink.lock().unwrap().push(value);
        }))
        .await
        .unwrap();

    // the callback fires before the call returns
    assert_eq!(proxy.add(4, 5).await.unwrap(), 9);
    assert_eq!(received.lock().unwrap().as_slice(), &[9]);

    assert_eq!(proxy.sub(9, 3).await.unwrap(), 6);
    assert_eq!(received.lock().unwrap().as_slice(), &[9, 6]);
}

#[tokio::test]
async fn distinct_ids_for_the_same_function() {
    let (client, server) = loopback_pair(MAX_DEPTH);
    let calc = Api::<dyn Calculator>::local(Arc::new(SomeCalculator::default()));
    server.register_api(&calc).unwrap();

    let proxy = client.get_remote_api::<dyn Calculator>();
    let callback = Callback::new(|_value: i32| {});
    let first = proxy.clone();
    first.on_result(callback.clone()).await.unwrap();
    proxy.on_result(callback).await.unwrap();

    // two registrations allocated two live callback ids: the second
    // registration replaced the first in the calculator, and both ids
    // remain valid on the issuing side
    assert_eq!(proxy.add(1, 1).await.unwrap(), 2);
}

#[tokio::test]
async fn reply_once_callbacks_reply_and_expire() {
    let (a, b) = loopback_pair(MAX_DEPTH);

    let callback: Callback<i32, i32> = Callback::new(|value: i32| value * 2);
    let id = callback.register_on(&a, true).unwrap();

    let reply = b
        .send_callback(id, vec![Variant::Int64(21)])
        .await
        .unwrap();
    assert_eq!(reply.as_u64(), Some(42));

    // the record is reply-once: a second invocation gets no answer
    let again = timeout(
        Duration::from_millis(100),
        b.send_callback(id, vec![Variant::Int64(1)]),
    )
    .await;
    assert!(again.is_err());
}

#[tokio::test]
async fn discarded_callbacks_become_noops() {
    let (a, b) = loopback_pair(MAX_DEPTH);

    let hits = Arc::new(Mutex::new(0));
    let counter = hits.clone();
    let callback: Callback<i32> = Callback::new(move |_value: i32| {
        *counter.lock().unwrap() += 1;
    });
    let id = callback.register_on(&a, false).unwrap();

    b.send_notice(id, vec![Variant::Int64(1)]).unwrap();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(*hits.lock().unwrap(), 1);

    a.discard_callback(id);
    b.send_notice(id, vec![Variant::Int64(2)]).unwrap();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(*hits.lock().unwrap(), 1);
}

#[tokio::test]
async fn close_fails_pending_and_refuses_sends() {
    let transport = Arc::new(RecordingTransport::default());
    let connection = ApiConnection::new(transport.clone(), MAX_DEPTH);

    let pending = tokio::spawn({
        let connection = connection.clone();
        async move {
            connection
                .send_call(0, OpRef::Name("slow".into()), vec![])
                .await
        }
    });
    sleep(Duration::from_millis(10)).await;

    connection.close();
    let err = timeout(Duration::from_millis(100), pending)
        .await
        .expect("pending call must fail promptly")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);

    let err = connection
        .send_call(0, OpRef::Name("slow".into()), vec![])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
    assert!(connection.send_notice(1, vec![]).is_err());
}

#[tokio::test]
async fn login_and_callback_over_websocket() {
    let calc = Api::<dyn Calculator>::local(Arc::new(SomeCalculator::default()));
    let (server, url) = serve(move |connection| {
        let login = Api::<dyn Login>::local(Arc::new(LoginService { calc: calc.clone() }));
        connection.register_api(&login).ok();
    })
    .await;

    let client = WebSocketApiClient::connect(&url, client_options())
        .await
        .unwrap();
    server.stop_listening().unwrap();

    let login = client.connection().get_remote_api::<dyn Login>();
    let calc = login.get_calc().await.unwrap();

    let triggered = Arc::new(AtomicBool::new(false));
    let flag = triggered.clone();
    calc.on_result(Callback::new(move |_value: i32| {
        flag.store(true, Ordering::SeqCst);
    }))
    .await
    .unwrap();

    assert_eq!(calc.add(4, 5).await.unwrap(), 9);
    assert!(triggered.load(Ordering::SeqCst));

    let names = login.test("a".into(), "b".into()).await.unwrap();
    assert_eq!(names, BTreeSet::from(["a".to_string(), "b".to_string()]));

    client.synchronous_close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn forward_header_overrides_logged_endpoint() {
    let endpoints = Channel::<String>::unbounded();
    let server = WebSocketApiServer::new(ServerOptions {
        max_depth: MAX_DEPTH,
        forward_header_key: Some("MyProxyHeaderKey".to_string()),
        ..Default::default()
    })
    .unwrap();
    let sender = endpoints.sender.clone();
    server.on_connection(move |connection| {
        let _ = sender.try_send(connection.remote_endpoint());
    });
    server.listen("127.0.0.1:0").await.unwrap();
    let port = server.listening_port().unwrap();
    server.start_accept().unwrap();
    let url = format!("ws://127.0.0.1:{port}");

    let proxied = WebSocketApiClient::connect(
        &url,
        ClientOptions {
            max_depth: MAX_DEPTH,
            headers: vec![("MyProxyHeaderKey".to_string(), "10.1.2.3:777".to_string())],
        },
    )
    .await
    .unwrap();
    assert_eq!(endpoints.recv().await.unwrap(), "10.1.2.3:777");

    let direct = WebSocketApiClient::connect(&url, client_options())
        .await
        .unwrap();
    let endpoint = endpoints.recv().await.unwrap();
    assert!(endpoint.starts_with("127.0.0.1:"), "endpoint: {endpoint}");

    proxied.synchronous_close().await.unwrap();
    direct.synchronous_close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn severed_transport_fails_pending_call() {
    struct SlowCalculator;

    impl Calculator for SlowCalculator {
        fn add(&self, a: i32, b: i32) -> i32 {
            std::thread::sleep(Duration::from_millis(500));
            a + b
        }

        fn sub(&self, a: i32, b: i32) -> i32 {
            a - b
        }

        fn on_result(&self, _callback: Callback<i32>) {}
    }

    let (server, url) = serve(|connection| {
        let calc = Api::<dyn Calculator>::local(Arc::new(SlowCalculator));
        connection.register_api(&calc).ok();
    })
    .await;

    let client = Arc::new(
        WebSocketApiClient::connect(&url, client_options())
            .await
            .unwrap(),
    );
    let proxy = client.connection().get_remote_api::<dyn Calculator>();

    let call = tokio::spawn(async move { proxy.add(1, 2).await });
    sleep(Duration::from_millis(50)).await;

    client.synchronous_close().await.unwrap();
    let err = timeout(Duration::from_millis(100), call)
        .await
        .expect("pending call must fail within the close bound")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);

    server.close().await.ok();
}

#[tokio::test]
async fn remote_errors_surface_on_the_proxy() {
    let (client, server) = loopback_pair(MAX_DEPTH);
    let calc = Api::<dyn Calculator>::local(Arc::new(SomeCalculator::default()));
    server.register_api(&calc).unwrap();

    // handle 3 was never assigned by the server
    let bogus = client.remote_api_at::<dyn Calculator>(3);
    let err = bogus.add(1, 2).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Remote(-32001)));
}

#[tokio::test]
async fn cli_executes_lines_and_formats_results() {
    let (client, server) = loopback_pair(MAX_DEPTH);
    let calc = Api::<dyn Calculator>::local(Arc::new(SomeCalculator::default()));
    server.register_api(&calc).unwrap();

    let cli = Cli::new(client.clone(), 0);

    assert_eq!(cli.execute("add 4 5").await.unwrap().unwrap(), "9");
    assert!(cli.execute("").await.unwrap().is_none());

    cli.format_result("sub", |result, args| {
        format!("{} (from {} args)", result.as_u64().unwrap(), args.len())
    });
    assert_eq!(
        cli.execute("sub 9 3").await.unwrap().unwrap(),
        "6 (from 2 args)"
    );

    let err = cli.execute("mul 1 2").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Remote(_)));
}

#[tokio::test]
async fn bootstrap_handle_is_zero_and_locals_start_at_one() {
    let (client, server) = loopback_pair(MAX_DEPTH);

    let calc = Api::<dyn Calculator>::local(Arc::new(SomeCalculator::default()));
    let handle = server.register_api(&calc).unwrap();
    assert_eq!(handle, 1);

    // the client reaches the same api both through the bootstrap
    // handle and through the explicit one
    let bootstrap = client.get_remote_api::<dyn Calculator>();
    assert_eq!(bootstrap.add(2, 3).await.unwrap(), 5);
    let explicit = client.remote_api_at::<dyn Calculator>(handle);
    assert_eq!(explicit.add(2, 3).await.unwrap(), 5);
}

#[test]
fn descriptors_reflect_declarations() {
    assert_eq!(<dyn Calculator as ApiInterface>::NAME, "calculator");
    let names: Vec<&str> = <dyn Calculator as ApiInterface>::operations()
        .iter()
        .map(|op| op.name)
        .collect();
    assert_eq!(names, ["add", "sub", "on_result"]);

    let ops = <dyn Optionals as ApiInterface>::operations();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].name, "foo");
    assert_eq!((ops[0].required, ops[0].total), (1, 3));
}

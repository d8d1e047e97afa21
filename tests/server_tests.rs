//! End-to-end tests for the serving engine over real sockets: startup
//! fan-out, routing ahead of the static fallback, sandbox rejection, the
//! completion hand-off, keep-alive, and the cooperative drain.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use common::{connect, get, read_one_response, send_get};
use shoal::{HandlerResponse, Request, RouteTable, RuntimeConfig, Server, ServerConfig};
use tempfile::TempDir;

const JSON_BODY: &str = r#"{"message":"Hello, World!"}"#;

fn json_handler(_req: &Request, res: &mut HandlerResponse) {
    res.set_header("Content-Type", "text/json ; charset=UTF-8");
    res.write_body(JSON_BODY.as_bytes());
}

fn test_runtime() -> RuntimeConfig {
    RuntimeConfig {
        reactors: 2,
        worker_threads: 6,
        queue_depth: 64,
    }
}

fn start(routes: RouteTable, static_root: Option<PathBuf>) -> Server {
    let config = ServerConfig {
        port: 0,
        static_root,
        runtime: test_runtime(),
    };
    let server = Server::start(config, routes).expect("start engine");
    server.wait_ready().expect("engine ready");
    server
}

fn json_routes() -> RouteTable {
    let mut routes = RouteTable::new();
    routes.register("/json", json_handler);
    routes
}

#[test]
fn registered_route_returns_the_handler_body() {
    let server = start(json_routes(), None);

    let res = get(server.local_addr(), "/json");
    assert_eq!(res.status, 200);
    assert_eq!(res.body_str(), JSON_BODY);
    assert_eq!(res.header("content-type"), Some("text/json ; charset=UTF-8"));
    assert_eq!(res.header("server"), Some("shoal"));
}

#[test]
fn unregistered_path_is_404_when_static_serving_is_disabled() {
    let server = start(json_routes(), None);

    let res = get(server.local_addr(), "/xml");
    assert_eq!(res.status, 404);
}

#[test]
fn every_configured_reactor_is_live_after_start() {
    let server = start(json_routes(), None);
    assert_eq!(server.reactor_count(), 2);
    assert_eq!(server.live_reactors(), 2);

    // still fully live after serving traffic
    let res = get(server.local_addr(), "/json");
    assert_eq!(res.status, 200);
    assert_eq!(server.live_reactors(), 2);
}

#[test]
fn traversal_uri_is_rejected_with_400() {
    let dir = TempDir::new().expect("tempdir");
    let server = start(json_routes(), Some(dir.path().to_path_buf()));

    let res = get(server.local_addr(), "/../etc/passwd");
    assert_eq!(res.status, 400);
}

#[test]
fn static_files_round_trip_through_the_engine() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("style.css"), "body { color: red }").expect("write fixture");
    let server = start(RouteTable::new(), Some(dir.path().to_path_buf()));

    let res = get(server.local_addr(), "/style.css");
    assert_eq!(res.status, 200);
    assert_eq!(res.header("content-type"), Some("text/css"));
    assert_eq!(res.body_str(), "body { color: red }");

    let missing = get(server.local_addr(), "/missing.css");
    assert_eq!(missing.status, 404);
}

#[test]
fn registered_route_shadows_a_static_file_of_the_same_name() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("json"), "file contents, not the handler").expect("write fixture");
    let server = start(json_routes(), Some(dir.path().to_path_buf()));

    let res = get(server.local_addr(), "/json");
    assert_eq!(res.status, 200);
    assert_eq!(res.body_str(), JSON_BODY);
}

#[test]
fn handler_panic_surfaces_as_500() {
    let mut routes = RouteTable::new();
    routes.register("/boom", |_req: &Request, _res: &mut HandlerResponse| {
        panic!("handler blew up");
    });
    let server = start(routes, None);

    let res = get(server.local_addr(), "/boom");
    assert_eq!(res.status, 500);
}

#[test]
fn keep_alive_serves_sequential_requests_on_one_connection() {
    let server = start(json_routes(), None);

    let mut stream = connect(server.local_addr());
    for _ in 0..3 {
        send_get(&mut stream, "/json");
        let res = read_one_response(&mut stream);
        assert_eq!(res.status, 200);
        assert_eq!(res.body, JSON_BODY.as_bytes());
        assert_eq!(res.header("connection"), Some("keep-alive"));
    }
}

#[test]
fn slow_handler_does_not_stall_other_requests() {
    let mut routes = json_routes();
    routes.register("/slow", |_req: &Request, res: &mut HandlerResponse| {
        thread::sleep(Duration::from_millis(300));
        res.write_body(b"slow done");
    });
    let server = start(routes, None);
    let addr = server.local_addr();

    let slow = thread::spawn(move || get(addr, "/slow"));
    // the slow handler occupies a worker thread, not a reactor
    let fast = get(addr, "/json");
    assert_eq!(fast.status, 200);

    let slow_res = slow.join().expect("join slow request");
    assert_eq!(slow_res.status, 200);
    assert_eq!(slow_res.body, b"slow done");
}

#[test]
fn stop_without_wait_is_idempotent() {
    let server = start(json_routes(), None);

    server.stop(false);
    server.stop(false);
    server.stop(true);
    assert_eq!(server.live_reactors(), 0);

    // further stops on a drained engine are harmless
    server.stop(false);
    assert_eq!(server.live_reactors(), 0);
}

#[test]
fn stop_with_wait_drains_every_reactor() {
    let server = start(json_routes(), None);
    assert_eq!(server.live_reactors(), 2);

    server.stop(true);
    assert_eq!(server.live_reactors(), 0);
}

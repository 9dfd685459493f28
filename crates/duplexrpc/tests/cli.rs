#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use duplexrpc_frame::{encode_frame, FrameReader};
use duplexrpc_host::Envelope;
use duplexrpc_registry::{Payload, TypeRegistry};
use serde_json::{json, Value};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/duplexrpc-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn bin() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_duplexrpc"));
    command
        .env_remove("DUPLEXRPC_SOCKET")
        .env_remove("DUPLEXRPC_TIMEOUT")
        .arg("--log-level")
        .arg("error");
    command
}

/// A `serve --socket` child that is killed when dropped.
struct Server {
    child: Child,
    dir: PathBuf,
    socket: PathBuf,
}

impl Server {
    fn start(tag: &str) -> Self {
        let dir = unique_temp_dir(tag);
        let socket = dir.join("serve.sock");
        let child = bin()
            .arg("serve")
            .arg("--socket")
            .arg(&socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve command should start");
        wait_for_socket(&socket, Duration::from_secs(5));
        Self { child, dir, socket }
    }

    fn call(&self, method: &str, extra: &[&str]) -> Output {
        bin()
            .arg("--format")
            .arg("json")
            .arg("call")
            .arg(&self.socket)
            .arg(method)
            .args(extra)
            .output()
            .expect("call command should run")
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("socket {} never appeared", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn reply_values(output: &Output) -> Vec<Value> {
    String::from_utf8(output.stdout.clone())
        .expect("stdout should be utf-8")
        .lines()
        .map(|line| {
            let reply: Value = serde_json::from_str(line).expect("reply line should be json");
            reply["value"].clone()
        })
        .collect()
}

#[test]
fn version_prints_package_version() {
    let output = bin().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("duplexrpc {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn call_echo_round_trips_json() {
    let server = Server::start("echo");

    let output = server.call("echo", &["--json", r#"{"a":[1,2,3]}"#]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(reply_values(&output), [json!({ "a": [1, 2, 3] })]);
}

#[test]
fn call_stream_prints_every_item() {
    let server = Server::start("stream");

    let output = server.call("count", &["--json", r#"{"upto":3}"#, "--stream"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(reply_values(&output), [json!(1), json!(2), json!(3)]);
}

#[test]
fn remote_failure_exits_one_with_message() {
    let server = Server::start("fail");

    let output = server.call("fail", &["--json", r#"{"message":"nope"}"#]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope"));

    let output = server.call("doesNotExist", &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("method not implemented: doesNotExist"));
}

#[test]
fn slow_reply_times_out() {
    let server = Server::start("timeout");

    let output = server.call("sleep", &["--json", r#"{"ms":3000}"#, "--timeout", "200ms"]);
    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn invalid_json_argument_is_usage_error() {
    let output = bin()
        .arg("call")
        .arg("/tmp/duplexrpc-unused.sock")
        .arg("echo")
        .arg("--json")
        .arg("{oops")
        .output()
        .expect("call command should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn missing_socket_is_transport_error() {
    let dir = unique_temp_dir("missing");
    let output = bin()
        .arg("call")
        .arg(dir.join("absent.sock"))
        .arg("echo")
        .output()
        .expect("call command should run");
    assert_eq!(output.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn serve_over_stdio_answers_framed_calls() {
    let registry = TypeRegistry::with_builtins();
    let mut child = bin()
        .arg("serve")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let argument = registry
        .encode_any(&Payload::message(json!("over stdio")))
        .expect("argument should encode");
    let envelope = Envelope::call(1, "echo", argument)
        .encode()
        .expect("envelope should encode");
    let mut wire = BytesMut::new();
    encode_frame(&envelope, &mut wire).expect("frame should encode");

    let mut stdin = child.stdin.take().expect("stdin should be piped");
    stdin.write_all(&wire).expect("request should be written");
    stdin.flush().expect("request should flush");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut reader = FrameReader::new(stdout);
    let frame = reader.read_frame().expect("reply frame should arrive");
    let reply = Envelope::decode(&frame).expect("reply should be an envelope");
    assert_eq!(reply.parent_id, 1);

    let value = match registry.decode_any(&reply.argument).expect("reply should decode") {
        Payload::Message(message) => message.downcast::<Value>().expect("reply should be json"),
        other => panic!("unexpected reply {}", other.kind()),
    };
    assert_eq!(value, json!("over stdio"));

    drop(stdin);
    let status = child.wait().expect("serve should exit");
    assert!(status.success());
}

#[test]
fn serve_over_stdio_finishes_replies_after_stdin_closes() {
    let registry = TypeRegistry::with_builtins();
    let mut wire = BytesMut::new();
    for (id, method, argument) in [(1, "sleep", json!({ "ms": 50 })), (2, "count", json!(2))] {
        let argument = registry
            .encode_any(&Payload::message(argument))
            .expect("argument should encode");
        let envelope = Envelope::call(id, method, argument)
            .encode()
            .expect("envelope should encode");
        encode_frame(&envelope, &mut wire).expect("frame should encode");
    }

    let mut child = bin()
        .arg("serve")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");
    let mut stdin = child.stdin.take().expect("stdin should be piped");
    stdin.write_all(&wire).expect("requests should be written");
    drop(stdin);

    let output = child.wait_with_output().expect("serve should exit");
    assert!(output.status.success());

    let mut reader = FrameReader::new(output.stdout.as_slice());
    let mut replies = Vec::new();
    while let Some(frame) = reader.try_read_frame().expect("stdout should hold whole frames") {
        let reply = Envelope::decode(&frame).expect("reply should be an envelope");
        let kind = registry
            .decode_any(&reply.argument)
            .expect("reply should decode")
            .kind();
        replies.push((reply.parent_id, kind));
    }
    assert!(replies.contains(&(1, "message")), "replies were {replies:?}");
    assert!(replies.contains(&(2, "close")), "replies were {replies:?}");
    assert_eq!(replies.len(), 4, "replies were {replies:?}");
}

#[test]
fn inspect_decodes_dump_from_stdin() {
    let registry = TypeRegistry::with_builtins();
    let argument = registry
        .encode_any(&Payload::message(json!({ "upto": 2 })))
        .expect("argument should encode");
    let close = registry
        .encode_any(&Payload::Close)
        .expect("close should encode");

    let mut wire = BytesMut::new();
    for envelope in [
        Envelope::call(1, "count", argument),
        Envelope::callback(2, 1, close),
    ] {
        let payload = envelope.encode().expect("envelope should encode");
        encode_frame(&payload, &mut wire).expect("frame should encode");
    }

    let mut child = bin()
        .arg("--format")
        .arg("json")
        .arg("inspect")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("inspect should start");
    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(&wire)
        .expect("dump should be written");
    let output = child.wait_with_output().expect("inspect should finish");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let rows: Vec<Value> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("row should be json"))
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["method"], "count");
    assert_eq!(rows[0]["type_name"], "duplexrpc.v1.Json");
    assert_eq!(rows[1]["parent_id"], 1);
    assert_eq!(rows[1]["type_name"], "duplexrpc.v1.Close");
}

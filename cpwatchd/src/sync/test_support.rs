use std::path::Path;

use cpwatch_core::{RetryPolicy, WebWorkflowClient};
use filetime::FileTime;
use serde_json::{Value, json};
use wiremock::{MockServer, ResponseTemplate};

use super::times::system_time_to_ms;

/// 2023-11-14T22:13:20Z
pub const T_MS: i64 = 1_700_000_000_000;

pub fn client(server: &MockServer) -> WebWorkflowClient {
    WebWorkflowClient::new(&server.uri(), "pwd")
        .unwrap()
        .with_retry(RetryPolicy::none())
}

pub fn file_entry(name: &str, modified_ns: i64, size: i64) -> Value {
    json!({"name": name, "directory": false, "modified_ns": modified_ns, "file_size": size})
}

pub fn dir_entry(name: &str) -> Value {
    json!({"name": name, "directory": true, "modified_ns": 0, "file_size": 0})
}

pub fn listing(files: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "free": 1000,
        "total": 2000,
        "block_size": 512,
        "writable": true,
        "files": files,
    }))
}

pub fn disk(writable: bool) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!([
        {"root": "/", "free": 1000, "total": 2000, "block_size": 512, "writable": writable}
    ]))
}

/// Request paths received for `verb`, in arrival order.
pub async fn requests(server: &MockServer, verb: &str) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.method.as_str() == verb)
        .map(|request| request.url.path().to_string())
        .collect()
}

pub fn set_mtime_ms(path: &Path, ms: i64) {
    let mtime = FileTime::from_unix_time(ms.div_euclid(1000), (ms.rem_euclid(1000) * 1_000_000) as u32);
    filetime::set_file_mtime(path, mtime).unwrap();
}

pub fn mtime_ms(path: &Path) -> i64 {
    system_time_to_ms(std::fs::metadata(path).unwrap().modified().unwrap())
}

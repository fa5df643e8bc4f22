use std::collections::HashMap;

use bytes::Bytes;
use datastore::object_client::{AzureRestClient, ClientError, ObjectClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A request as seen by the scripted blob service.
#[derive(Debug)]
struct Recorded {
    method: String,
    target: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

fn response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
    if !headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("content-length"))
    {
        out.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out.push_str(body);
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Answer one connection per scripted response, recording each request.
async fn serve(listener: TcpListener, responses: Vec<String>) -> Vec<Recorded> {
    let mut recorded = Vec::new();
    for reply in responses {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the request head");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = find(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next().unwrap_or_default().split(' ');
        let method = request_line.next().unwrap_or_default().to_string();
        let target = request_line.next().unwrap_or_default().to_string();
        let headers: HashMap<String, String> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        let body_len: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        while buf.len() < head_end + body_len {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the request body");
            buf.extend_from_slice(&chunk[..n]);
        }
        let body = buf[head_end..head_end + body_len].to_vec();

        stream.write_all(reply.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();

        recorded.push(Recorded {
            method,
            target,
            headers,
            body,
        });
    }
    recorded
}

async fn blob_service(responses: Vec<String>) -> (AzureRestClient, JoinHandle<Vec<Recorded>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = AzureRestClient::from_connection_string(&format!(
        "BlobEndpoint=http://{addr}/acct;AccountName=acct;AccountKey=a2V5"
    ))
    .unwrap();
    (client, tokio::spawn(serve(listener, responses)))
}

#[tokio::test]
async fn test_upload_is_create_only_and_signed() {
    let (client, server) = blob_service(vec![
        response("201 Created", &[], ""),
        response(
            "409 Conflict",
            &[("x-ms-error-code", "BlobAlreadyExists")],
            "",
        ),
    ])
    .await;

    let handle = client.object_handle("data", "a/b.txt");
    client
        .upload_object(&handle, Bytes::from("hello"), false)
        .await
        .unwrap();
    let err = client
        .upload_object(&handle, Bytes::from("again"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::AlreadyExists(_)));

    let requests = server.await.unwrap();
    let put = &requests[0];
    assert_eq!(put.method, "PUT");
    assert_eq!(put.target, "/acct/data/a/b.txt");
    assert_eq!(put.body, b"hello");
    assert_eq!(put.headers["if-none-match"], "*");
    assert_eq!(put.headers["x-ms-blob-type"], "BlockBlob");
    assert_eq!(put.headers["content-type"], "text/plain");
    assert_eq!(put.headers["x-ms-version"], "2021-08-06");
    assert!(put.headers["authorization"].starts_with("SharedKey acct:"));
}

#[tokio::test]
async fn test_upload_precondition_failure_is_already_exists() {
    let (client, server) = blob_service(vec![response(
        "412 Precondition Failed",
        &[("x-ms-error-code", "ConditionNotMet")],
        "",
    )])
    .await;

    let handle = client.object_handle("data", "k.bin");
    let err = client
        .upload_object(&handle, Bytes::from("x"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::AlreadyExists(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn test_overwrite_upload_sends_no_condition() {
    let (client, server) = blob_service(vec![response("201 Created", &[], "")]).await;

    let handle = client.object_handle("data", "k.bin");
    client
        .upload_object(&handle, Bytes::from("x"), true)
        .await
        .unwrap();

    let requests = server.await.unwrap();
    assert!(!requests[0].headers.contains_key("if-none-match"));
}

#[tokio::test]
async fn test_download_range_headers() {
    let (client, server) = blob_service(vec![
        response("206 Partial Content", &[], "el"),
        response("206 Partial Content", &[], "ello"),
        response("200 OK", &[], "hello"),
    ])
    .await;

    let handle = client.object_handle("data", "a/b.txt");
    assert_eq!(
        client.download_range(&handle, 1, Some(2)).await.unwrap(),
        Bytes::from("el")
    );
    // a range end past u64::MAX is sent open-ended
    assert_eq!(
        client
            .download_range(&handle, 1, Some(u64::MAX))
            .await
            .unwrap(),
        Bytes::from("ello")
    );
    assert_eq!(
        client.download_range(&handle, 0, None).await.unwrap(),
        Bytes::from("hello")
    );

    let requests = server.await.unwrap();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].target, "/acct/data/a/b.txt");
    assert_eq!(requests[0].headers["x-ms-range"], "bytes=1-2");
    assert_eq!(requests[1].headers["x-ms-range"], "bytes=1-");
    assert!(!requests[2].headers.contains_key("x-ms-range"));
}

#[tokio::test]
async fn test_missing_blob_is_not_found() {
    let (client, server) = blob_service(vec![
        response("404 Not Found", &[("x-ms-error-code", "BlobNotFound")], ""),
        response(
            "404 Not Found",
            &[("x-ms-error-code", "BlobNotFound"), ("Content-Length", "0")],
            "",
        ),
        response(
            "404 Not Found",
            &[("x-ms-error-code", "ContainerNotFound")],
            "",
        ),
    ])
    .await;

    let handle = client.object_handle("data", "missing.txt");
    assert!(matches!(
        client.download_range(&handle, 0, None).await,
        Err(ClientError::NotFound(_))
    ));
    assert!(matches!(
        client.properties(&handle).await,
        Err(ClientError::NotFound(_))
    ));
    assert!(matches!(
        client.list_objects("data", "").await,
        Err(ClientError::NotFound(_))
    ));

    let requests = server.await.unwrap();
    assert_eq!(requests[1].method, "HEAD");
}

#[tokio::test]
async fn test_other_failures_keep_status_and_code() {
    let (client, server) = blob_service(vec![response(
        "403 Forbidden",
        &[("x-ms-error-code", "AuthenticationFailed")],
        "signature mismatch",
    )])
    .await;

    let handle = client.object_handle("data", "k.bin");
    match client.download_range(&handle, 0, None).await {
        Err(ClientError::Http {
            status,
            code,
            message,
        }) => {
            assert_eq!(status, 403);
            assert_eq!(code.as_deref(), Some("AuthenticationFailed"));
            assert!(message.contains("signature mismatch"));
        }
        other => panic!("expected an HTTP error, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn test_properties_reads_size_and_last_modified() {
    let (client, server) = blob_service(vec![response(
        "200 OK",
        &[
            ("Content-Length", "5"),
            ("Last-Modified", "Fri, 01 Mar 2024 12:00:00 GMT"),
        ],
        "",
    )])
    .await;

    let handle = client.object_handle("data", "a/b.txt");
    let props = client.properties(&handle).await.unwrap();
    assert_eq!(props.size, 5);
    assert_eq!(props.last_modified.timestamp(), 1_709_294_400);
    server.await.unwrap();
}

#[tokio::test]
async fn test_list_objects_follows_next_marker() {
    let first = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
        <EnumerationResults ContainerName=\"data\"><Prefix>a/</Prefix><Blobs>\
        <Blob><Name>a/one.txt</Name></Blob>\
        <Blob><Name>a/sub/two.txt</Name></Blob>\
        </Blobs><NextMarker>page2</NextMarker></EnumerationResults>";
    let second = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
        <EnumerationResults ContainerName=\"data\"><Prefix>a/</Prefix><Blobs>\
        <Blob><Name>a/three.txt</Name></Blob>\
        </Blobs><NextMarker /></EnumerationResults>";

    let (client, server) = blob_service(vec![
        response("200 OK", &[("Content-Type", "application/xml")], first),
        response("200 OK", &[("Content-Type", "application/xml")], second),
    ])
    .await;

    let names: Vec<String> = client
        .list_objects("data", "a/")
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.name)
        .collect();
    assert_eq!(names, vec!["a/one.txt", "a/sub/two.txt", "a/three.txt"]);

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request.method, "GET");
        assert!(request.target.starts_with("/acct/data?"));
        assert!(request.target.contains("restype=container"));
        assert!(request.target.contains("comp=list"));
        assert!(request.target.contains("prefix=a%2F"));
    }
    assert!(!requests[0].target.contains("marker="));
    assert!(requests[1].target.contains("marker=page2"));
}

//! S3 Sink Integration Tests
//!
//! Points the sink at a wiremock server speaking the S3 REST API (path-style
//! addressing) and checks which requests are made for each body size and
//! failure mode.

use bytes::Bytes;
use futures::{stream, StreamExt};
use std::time::Duration;
use video_uploadr::config::{Config, StorageConfig};
use video_uploadr::storage::s3::MIN_PART_SIZE;
use video_uploadr::storage::{
    build_sink, ByteStream, S3Sink, StorageFailureKind, StorageSink,
};
use video_uploadr::upload::{RejectionReason, UploadError};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BUCKET: &str = "test-bucket";

async fn create_test_sink(mock_server: &MockServer) -> S3Sink {
    let config = StorageConfig {
        bucket: BUCKET.to_string(),
        region: "us-east-1".to_string(),
        endpoint: Some(mock_server.uri()),
        access_key: Some("test-access".to_string()),
        secret_key: Some("test-secret".to_string()),
        max_attempts: 1,
        ..Default::default()
    };
    S3Sink::new(&config).await.unwrap()
}

/// Body of `total` bytes delivered in 1 MiB chunks
fn body_of(total: usize) -> ByteStream {
    let chunk = 1024 * 1024;
    let mut chunks = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        let n = remaining.min(chunk);
        chunks.push(Ok(Bytes::from(vec![b'v'; n])));
        remaining -= n;
    }
    stream::iter(chunks).boxed()
}

fn create_multipart_response(key: &str, upload_id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <Bucket>{}</Bucket>
    <Key>{}</Key>
    <UploadId>{}</UploadId>
</InitiateMultipartUploadResult>"#,
        BUCKET, key, upload_id
    ))
}

async fn count_deletes(mock_server: &MockServer) -> usize {
    mock_server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.to_string() == "DELETE")
        .count()
}

fn s3_error(status: u16, code: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_string(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>{}</Code><Message>test failure</Message><RequestId>req-1</RequestId></Error>"#,
        code
    ))
}

#[tokio::test]
async fn test_small_body_uses_single_put() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/test-bucket/videos/1-small.mp4"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"small-etag\""))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sink = create_test_sink(&mock_server).await;
    let stored = sink
        .put(body_of(1024), "videos/1-small.mp4", "video/mp4")
        .await
        .unwrap();

    assert_eq!(stored.bytes_written, 1024);
    assert_eq!(stored.etag.as_deref(), Some("\"small-etag\""));
    assert_eq!(
        stored.url,
        format!("{}/test-bucket/videos/1-small.mp4", mock_server.uri())
    );
}

#[tokio::test]
async fn test_large_body_uses_multipart_upload() {
    let mock_server = MockServer::start().await;
    let key = "videos/2-large.mp4";
    let object_path = format!("/{}/{}", BUCKET, key);

    Mock::given(method("POST"))
        .and(path(object_path.as_str()))
        .and(query_param("uploads", ""))
        .respond_with(create_multipart_response(key, "upload-123"))
        .expect(1)
        .mount(&mock_server)
        .await;

    for part in 1..=3 {
        Mock::given(method("PUT"))
            .and(path(object_path.as_str()))
            .and(query_param("uploadId", "upload-123"))
            .and(query_param("partNumber", part.to_string().as_str()))
            .respond_with(
                ResponseTemplate::new(200).insert_header("ETag", format!("\"part-{}\"", part)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    Mock::given(method("POST"))
        .and(path(object_path.as_str()))
        .and(query_param("uploadId", "upload-123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <Location>{uri}/{bucket}/{key}</Location>
    <Bucket>{bucket}</Bucket>
    <Key>{key}</Key>
    <ETag>"final-etag-3"</ETag>
</CompleteMultipartUploadResult>"#,
            uri = mock_server.uri(),
            bucket = BUCKET,
            key = key
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&mock_server)
        .await;

    let sink = create_test_sink(&mock_server).await;
    let total = 2 * MIN_PART_SIZE + 1024 * 1024;
    let stored = sink.put(body_of(total), key, "video/mp4").await.unwrap();

    assert_eq!(stored.bytes_written, total as u64);
    assert_eq!(stored.etag.as_deref(), Some("\"final-etag-3\""));
}

#[tokio::test]
async fn test_source_error_aborts_multipart_upload() {
    let mock_server = MockServer::start().await;
    let key = "videos/3-oversize.mp4";
    let object_path = format!("/{}/{}", BUCKET, key);

    Mock::given(method("POST"))
        .and(path(object_path.as_str()))
        .and(query_param("uploads", ""))
        .respond_with(create_multipart_response(key, "upload-abort"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path(object_path.as_str()))
        .and(query_param("uploadId", "upload-abort"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"part\""))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(object_path.as_str()))
        .and(query_param("uploadId", "upload-abort"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(object_path.as_str()))
        .and(query_param("uploadId", "upload-abort"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    // One full part, then the size gate trips
    let body: ByteStream = body_of(MIN_PART_SIZE + 1024)
        .chain(stream::iter(vec![Err(UploadError::from(
            RejectionReason::TooLarge { limit: 1 },
        ))]))
        .boxed();

    let sink = create_test_sink(&mock_server).await;
    let err = sink.put(body, key, "video/mp4").await.unwrap_err();

    assert!(matches!(
        err,
        UploadError::Rejected(RejectionReason::TooLarge { .. })
    ));
}

#[tokio::test]
async fn test_abort_survives_dropped_request() {
    let mock_server = MockServer::start().await;
    let key = "videos/3-dropped.mp4";
    let object_path = format!("/{}/{}", BUCKET, key);

    Mock::given(method("POST"))
        .and(path(object_path.as_str()))
        .and(query_param("uploads", ""))
        .respond_with(create_multipart_response(key, "upload-dropped"))
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path(object_path.as_str()))
        .and(query_param("uploadId", "upload-dropped"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"part\""))
        .mount(&mock_server)
        .await;

    // Abort hangs long enough for the request to be dropped mid-abort
    Mock::given(method("DELETE"))
        .and(path(object_path.as_str()))
        .and(query_param("uploadId", "upload-dropped"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(30)))
        .mount(&mock_server)
        .await;

    let body: ByteStream = body_of(MIN_PART_SIZE + 1024)
        .chain(stream::iter(vec![Err(UploadError::from(
            RejectionReason::TooLarge { limit: 1 },
        ))]))
        .boxed();

    let sink = create_test_sink(&mock_server).await;

    {
        let put = sink.put(body, key, "video/mp4");
        tokio::pin!(put);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            tokio::select! {
                _ = &mut put => panic!("abort should still be in flight"),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            if count_deletes(&mock_server).await >= 1 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "abort never started");
        }
    }

    // The in-flight abort was dropped with the request; another one follows
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while count_deletes(&mock_server).await < 2 {
        assert!(tokio::time::Instant::now() < deadline, "no abort after drop");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_objects_carry_field_name_metadata() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/test-bucket/videos/7-meta.mp4"))
        .and(header("x-amz-meta-fieldname", "video"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"meta\""))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/test-bucket/videos/8-meta.mp4"))
        .and(query_param("uploads", ""))
        .and(header("x-amz-meta-fieldname", "video"))
        .respond_with(create_multipart_response("videos/8-meta.mp4", "upload-meta"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/test-bucket/videos/8-meta.mp4"))
        .and(query_param("uploadId", "upload-meta"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"part\""))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/test-bucket/videos/8-meta.mp4"))
        .and(query_param("uploadId", "upload-meta"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <ETag>"final-meta"</ETag>
</CompleteMultipartUploadResult>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = Config::default();
    config.storage = StorageConfig {
        bucket: BUCKET.to_string(),
        region: "us-east-1".to_string(),
        endpoint: Some(mock_server.uri()),
        access_key: Some("test-access".to_string()),
        secret_key: Some("test-secret".to_string()),
        max_attempts: 1,
        ..Default::default()
    };
    let sink = build_sink(&config).await.unwrap();

    sink.put(body_of(1024), "videos/7-meta.mp4", "video/mp4")
        .await
        .unwrap();
    sink.put(body_of(MIN_PART_SIZE + 10), "videos/8-meta.mp4", "video/mp4")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_part_failure_aborts_and_reports_storage_error() {
    let mock_server = MockServer::start().await;
    let key = "videos/4-part-fail.mp4";
    let object_path = format!("/{}/{}", BUCKET, key);

    Mock::given(method("POST"))
        .and(path(object_path.as_str()))
        .and(query_param("uploads", ""))
        .respond_with(create_multipart_response(key, "upload-fail"))
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path(object_path.as_str()))
        .and(query_param("uploadId", "upload-fail"))
        .respond_with(s3_error(400, "EntityTooLarge"))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(object_path.as_str()))
        .and(query_param("uploadId", "upload-fail"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sink = create_test_sink(&mock_server).await;
    let err = sink
        .put(body_of(MIN_PART_SIZE + 1), key, "video/mp4")
        .await
        .unwrap_err();

    match err {
        UploadError::Storage(e) => assert_eq!(e.kind(), StorageFailureKind::Quota),
        other => panic!("expected storage error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_access_denied_is_permission_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/test-bucket/videos/5-denied.mp4"))
        .respond_with(s3_error(403, "AccessDenied"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sink = create_test_sink(&mock_server).await;
    let err = sink
        .put(body_of(10), "videos/5-denied.mp4", "video/mp4")
        .await
        .unwrap_err();

    match err {
        UploadError::Storage(e) => {
            assert_eq!(e.kind(), StorageFailureKind::Permission);
            assert!(e.message().contains("PutObject"));
        }
        other => panic!("expected storage error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_refused_is_connectivity_failure() {
    let config = StorageConfig {
        bucket: BUCKET.to_string(),
        endpoint: Some("http://127.0.0.1:1".to_string()),
        access_key: Some("test-access".to_string()),
        secret_key: Some("test-secret".to_string()),
        max_attempts: 1,
        connect_timeout_secs: 1,
        ..Default::default()
    };
    let sink = S3Sink::new(&config).await.unwrap();

    let err = sink
        .put(body_of(10), "videos/6-offline.mp4", "video/mp4")
        .await
        .unwrap_err();

    match err {
        UploadError::Storage(e) => assert_eq!(e.kind(), StorageFailureKind::Connectivity),
        other => panic!("expected storage error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_incomplete_credentials_rejected() {
    let config = StorageConfig {
        bucket: BUCKET.to_string(),
        access_key: Some("only-access".to_string()),
        ..Default::default()
    };

    let err = S3Sink::new(&config).await.unwrap_err();
    assert_eq!(err.kind(), StorageFailureKind::Permission);
}

//! End-to-end tests driving the full axum stack in-process via
//! `tower::ServiceExt::oneshot`, covering the scenarios an S3-compatible
//! client would actually exercise against this emulator.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{sign, sign_without_content_hash_header, test_state, ACCESS_KEY};
use s3pit_server::build_router;
use tower::ServiceExt;

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn signed_request(method: &str, uri: &str, body: Vec<u8>) -> Request<Body> {
    let (path, raw_query) = uri.split_once('?').unwrap_or((uri, ""));
    let signed = sign(method, path, raw_query, &body);
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", signed.host)
        .header("x-amz-date", signed.x_amz_date)
        .header("x-amz-content-sha256", signed.x_amz_content_sha256)
        .header("authorization", signed.authorization)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn put_then_get_roundtrips_exact_bytes_and_etag() {
    let (state, _dir) = test_state(false).await;
    let app = build_router(state);

    let create = app
        .clone()
        .oneshot(signed_request("PUT", "/bucket1", Vec::new()))
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::OK);

    let put = app
        .clone()
        .oneshot(signed_request("PUT", "/bucket1/hello.txt", b"Hello".to_vec()))
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::OK);
    assert_eq!(
        put.headers().get("etag").unwrap(),
        "\"8b1a9953c4611296a827abf8c47804d7\""
    );

    let get = app
        .clone()
        .oneshot(signed_request("GET", "/bucket1/hello.txt", Vec::new()))
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);
    assert_eq!(
        get.headers().get("etag").unwrap(),
        "\"8b1a9953c4611296a827abf8c47804d7\""
    );
    assert_eq!(body_string(get).await, "Hello");
}

#[tokio::test]
async fn delimiter_listing_groups_by_common_prefix() {
    let (state, _dir) = test_state(false).await;
    let app = build_router(state);

    app.clone()
        .oneshot(signed_request("PUT", "/bucket1", Vec::new()))
        .await
        .unwrap();

    for key in ["top", "a/one", "a/two", "b/three"] {
        let path = format!("/bucket1/{key}");
        let resp = app
            .clone()
            .oneshot(signed_request("PUT", &path, b"x".to_vec()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let list = app
        .clone()
        .oneshot(signed_request("GET", "/bucket1?delimiter=%2F", Vec::new()))
        .await
        .unwrap();
    assert_eq!(list.status(), StatusCode::OK);
    let xml = body_string(list).await;

    assert_eq!(xml.matches("<Key>top</Key>").count(), 1);
    assert!(xml.contains("<Prefix>a/</Prefix>"));
    assert!(xml.contains("<Prefix>b/</Prefix>"));
    assert_eq!(xml.matches("<Key>").count(), 1);
}

#[tokio::test]
async fn multipart_upload_assembles_parts_in_order() {
    let (state, _dir) = test_state(false).await;
    let app = build_router(state);

    app.clone()
        .oneshot(signed_request("PUT", "/bucket1", Vec::new()))
        .await
        .unwrap();

    let initiate = app
        .clone()
        .oneshot(signed_request(
            "POST",
            "/bucket1/big.bin?uploads",
            Vec::new(),
        ))
        .await
        .unwrap();
    assert_eq!(initiate.status(), StatusCode::OK);
    let initiate_xml = body_string(initiate).await;
    let upload_id = initiate_xml
        .split("<UploadId>")
        .nth(1)
        .unwrap()
        .split("</UploadId>")
        .next()
        .unwrap()
        .to_string();

    for (part_number, chunk) in [(1, b"AAA".to_vec()), (2, b"BBB".to_vec())] {
        let path = format!("/bucket1/big.bin?uploadId={upload_id}&partNumber={part_number}");
        let resp = app
            .clone()
            .oneshot(signed_request("PUT", &path, chunk))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let complete_body = format!(
        "<CompleteMultipartUpload><Part><PartNumber>1</PartNumber></Part><Part><PartNumber>2</PartNumber></Part></CompleteMultipartUpload>"
    );
    let complete = app
        .clone()
        .oneshot(signed_request(
            "POST",
            &format!("/bucket1/big.bin?uploadId={upload_id}"),
            complete_body.into_bytes(),
        ))
        .await
        .unwrap();
    assert_eq!(complete.status(), StatusCode::OK);

    let get = app
        .clone()
        .oneshot(signed_request("GET", "/bucket1/big.bin", Vec::new()))
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);
    assert_eq!(body_string(get).await, "AAABBB");
}

#[tokio::test]
async fn public_bucket_allows_anonymous_reads_but_not_writes() {
    let (state, _dir) = test_state(false).await;
    let app = build_router(state);

    app.clone()
        .oneshot(signed_request("PUT", "/public-assets", Vec::new()))
        .await
        .unwrap();
    app.clone()
        .oneshot(signed_request(
            "PUT",
            "/public-assets/readme.txt",
            b"hi".to_vec(),
        ))
        .await
        .unwrap();

    let anon_get = Request::builder()
        .method("GET")
        .uri("/public-assets/readme.txt")
        .body(Body::empty())
        .unwrap();
    let get_resp = app.clone().oneshot(anon_get).await.unwrap();
    assert_eq!(get_resp.status(), StatusCode::OK);
    assert_eq!(body_string(get_resp).await, "hi");

    let anon_put = Request::builder()
        .method("PUT")
        .uri("/public-assets/evil.txt")
        .body(Body::from("bad"))
        .unwrap();
    let put_resp = app.clone().oneshot(anon_put).await.unwrap();
    assert_eq!(put_resp.status(), StatusCode::FORBIDDEN);
    let xml = body_string(put_resp).await;
    assert!(xml.contains("AccessDenied"));
}

#[tokio::test]
async fn expired_presigned_url_is_rejected() {
    let (state, _dir) = test_state(false).await;
    let app = build_router(state);

    app.clone()
        .oneshot(signed_request("PUT", "/bucket1", Vec::new()))
        .await
        .unwrap();

    let uri = format!(
        "/bucket1/hello.txt?X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential={ACCESS_KEY}%2F20200101%2Fus-east-1%2Fs3%2Faws4_request&X-Amz-Date=20200101T000000Z&X-Amz-Expires=60&X-Amz-SignedHeaders=host&X-Amz-Signature=deadbeef"
    );
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .header("host", "localhost:9000")
        .body(Body::empty())
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let xml = body_string(resp).await;
    assert!(xml.contains("AccessDenied"));
}

#[tokio::test]
async fn header_form_request_without_content_hash_header_is_verified_against_real_body() {
    let (state, _dir) = test_state(false).await;
    let app = build_router(state);

    app.clone()
        .oneshot(signed_request("PUT", "/bucket1", Vec::new()))
        .await
        .unwrap();

    let body = b"omitted header".to_vec();
    let (host, amz_date, authorization) =
        sign_without_content_hash_header("PUT", "/bucket1/hello.txt", "", &body);
    let put = Request::builder()
        .method("PUT")
        .uri("/bucket1/hello.txt")
        .header("host", host)
        .header("x-amz-date", amz_date)
        .header("authorization", authorization)
        .body(Body::from(body))
        .unwrap();
    let put_resp = app.clone().oneshot(put).await.unwrap();
    assert_eq!(put_resp.status(), StatusCode::OK);

    let get = app
        .clone()
        .oneshot(signed_request("GET", "/bucket1/hello.txt", Vec::new()))
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);
    assert_eq!(body_string(get).await, "omitted header");
}

#[tokio::test]
async fn copy_object_duplicates_bytes_and_content_type() {
    let (state, _dir) = test_state(false).await;
    let app = build_router(state);

    app.clone()
        .oneshot(signed_request("PUT", "/src-bucket", Vec::new()))
        .await
        .unwrap();
    app.clone()
        .oneshot(signed_request("PUT", "/dst-bucket", Vec::new()))
        .await
        .unwrap();

    let put = app
        .clone()
        .oneshot(signed_request(
            "PUT",
            "/src-bucket/original.txt",
            b"copy me".to_vec(),
        ))
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::OK);

    let signed = sign("PUT", "/dst-bucket/copy.txt", "", &[]);
    let copy_req = Request::builder()
        .method("PUT")
        .uri("/dst-bucket/copy.txt")
        .header("host", signed.host)
        .header("x-amz-date", signed.x_amz_date)
        .header("x-amz-content-sha256", signed.x_amz_content_sha256)
        .header("authorization", signed.authorization)
        .header("x-amz-copy-source", "/src-bucket/original.txt")
        .body(Body::empty())
        .unwrap();

    let copy_resp = app.clone().oneshot(copy_req).await.unwrap();
    assert_eq!(copy_resp.status(), StatusCode::OK);
    let xml = body_string(copy_resp).await;
    assert!(xml.contains("<CopyObjectResult"));

    let get = app
        .clone()
        .oneshot(signed_request("GET", "/dst-bucket/copy.txt", Vec::new()))
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);
    assert_eq!(body_string(get).await, "copy me");
}

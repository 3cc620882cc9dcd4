//! Status queries and upload listing

mod common;

use common::{test_client, TOKEN};
use content_store_client::{
    ClientConfig, ClientError, ContentId, DealStatus, ListOptions, PinState, PinStatus,
    StoreClient, Upload,
};
use futures::TryStreamExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CID: &str = "bafybeifnfkzjeohjf2dch2iqqpef3bfjylwxlcjws2msvdfyze5bvdprfm";

fn upload_json(cid: &str, name: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "cid": cid,
        "created": "2021-07-14T19:27:14.934572+00:00",
        "dagSize": 101,
        "pins": [{"peerId": "12D3KooWR1Js", "status": "Pinned"}],
        "deals": []
    })
}

#[tokio::test]
async fn test_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/status/{}", CID)))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "cid": CID,
            "created": "2021-07-14T19:27:14.934572Z",
            "dagSize": 101,
            "pins": [
                {
                    "peerId": "12D3KooWR1Js",
                    "peerName": "who?",
                    "region": "where?",
                    "status": "Pinning",
                    "updated": "2021-07-14T19:27:14.934572Z"
                },
                {"peerId": "12D3KooWQ9Xz", "status": "PinQueued"}
            ],
            "deals": [{
                "dealId": 12345,
                "storageProvider": "f99",
                "status": "Active",
                "pieceCid": "baga",
                "dataCid": CID,
                "dataModelSelector": "Links/0/Links",
                "activation": "2021-07-15T00:00:00Z",
                "created": "2021-07-14T19:27:14.934572Z",
                "updated": "2021-07-14T19:27:14.934572Z"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let cid: ContentId = CID.parse().unwrap();
    let status = client.status(&cid).await.unwrap();

    assert_eq!(status.cid, cid);
    assert_eq!(status.state, PinState::Pinning);
    assert_eq!(status.dag_size, Some(101));
    assert_eq!(status.pins.len(), 2);
    assert_eq!(status.pins[0].peer_name.as_deref(), Some("who?"));
    assert_eq!(status.pins[1].status, PinStatus::PinQueued);
    assert_eq!(status.deals[0].deal_id, Some(12345));
    assert_eq!(status.deals[0].status, DealStatus::Active);
    assert!(status.deals[0].activation.is_some());
}

#[tokio::test]
async fn test_status_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/status/{}", CID)))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"message": "not found"})))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let cid: ContentId = CID.parse().unwrap();
    assert!(matches!(client.status(&cid).await, Err(ClientError::NotFound(_))));
}

#[tokio::test]
async fn test_status_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/status/{}", CID)))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let cid: ContentId = CID.parse().unwrap();
    assert!(matches!(client.status(&cid).await, Err(ClientError::Json(_))));
}

#[tokio::test]
async fn test_malformed_identifiers() {
    for input in ["", "not-a-cid", "bafy", "Qm123"] {
        assert!(matches!(
            input.parse::<ContentId>(),
            Err(ClientError::MalformedIdentifier { .. })
        ));
    }
}

async fn mount_pages(server: &MockServer) {
    // Second page, matched first when `before` is present
    Mock::given(method("GET"))
        .and(path("/user/uploads"))
        .and(query_param("before", "2021-07-10T00:00:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            upload_json("bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e", "three"),
        ])))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/uploads"))
        .and(query_param("size", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "link",
                    "</user/uploads?size=2&before=2021-07-10T00%3A00%3A00.000Z>; rel=\"next\"",
                )
                .set_body_json(serde_json::json!([
                    upload_json(CID, "one"),
                    upload_json("bafybeiczsscdsbs7ffqz55asqdf3smv6klcw3gofszvwlyarci47bgf354", "two"),
                ])),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_list_follows_link_headers() {
    let server = MockServer::start().await;
    mount_pages(&server).await;
    let client = test_client(&server);

    let uploads: Vec<Upload> = client
        .list(ListOptions {
            page_size: 2,
            ..Default::default()
        })
        .try_collect()
        .await
        .unwrap();

    let names: Vec<_> = uploads.iter().filter_map(|u| u.name.as_deref()).collect();
    assert_eq!(names, vec!["one", "two", "three"]);
    assert_eq!(uploads[0].state(), PinState::Pinned);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_list_honors_max_results() {
    let server = MockServer::start().await;
    mount_pages(&server).await;
    let client = test_client(&server);

    let uploads: Vec<Upload> = client
        .list(ListOptions {
            page_size: 2,
            max_results: Some(1),
            ..Default::default()
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].name.as_deref(), Some("one"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_requires_token() {
    let server = MockServer::start().await;
    mount_pages(&server).await;
    let client = StoreClient::new(ClientConfig::new(server.uri())).unwrap();

    let result: Result<Vec<Upload>, ClientError> = client.list(ListOptions::default()).try_collect().await;
    assert!(matches!(result, Err(ClientError::Authentication(_))));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/uploads"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let result: Result<Vec<Upload>, ClientError> = client.list(ListOptions::default()).try_collect().await;
    match result {
        Err(ClientError::Authentication(message)) => assert_eq!(message, "forbidden"),
        other => panic!("expected authentication error, got {other:?}"),
    }
}

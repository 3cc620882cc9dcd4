//! Fake content store service for integration tests
//!
//! Accepts CAR uploads on `POST /car`, remembers their blocks, and serves the
//! DAG below any stored root on `GET /car/{cid}`.

#![allow(dead_code)]

use bytes::Bytes;
use content_store_client::car::{encode_car, Block, CarReader};
use content_store_client::unixfs::PbNode;
use content_store_client::{ClientConfig, ContentId, StoreClient};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TOKEN: &str = "test-token";

/// Client pointed at a mock server, authenticated with [`TOKEN`]
pub fn test_config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        timeout_secs: 5,
        ..ClientConfig::new(server.uri()).with_token(TOKEN)
    }
}

pub fn test_client(server: &MockServer) -> StoreClient {
    StoreClient::new(test_config(server)).unwrap()
}

/// Deterministic pseudo-random content
pub fn content(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect()
}

#[derive(Default)]
struct State {
    blocks: HashMap<ContentId, Bytes>,
    uploads: Vec<(ContentId, Option<String>)>,
}

/// In-memory block store behind the mock endpoints
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

impl FakeStore {
    /// Mount `POST /car` and `GET /car/{cid}` on the server
    pub async fn mount(&self, server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/car"))
            .respond_with(CarUpload(self.clone()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/car/[^/]+$"))
            .respond_with(CarDownload(self.clone()))
            .mount(server)
            .await;
    }

    /// Number of CAR archives received
    pub fn upload_count(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    /// Raw `X-Name` headers received
    pub fn upload_names(&self) -> Vec<Option<String>> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Replace the stored bytes of a block
    pub fn tamper(&self, cid: ContentId, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .blocks
            .insert(cid, Bytes::copy_from_slice(data));
    }

    pub fn contains(&self, cid: &ContentId) -> bool {
        self.state.lock().unwrap().blocks.contains_key(cid)
    }
}

fn error(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(serde_json::json!({ "message": message }))
}

struct CarUpload(FakeStore);

impl Respond for CarUpload {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let auth = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        let expected = format!("Bearer {}", TOKEN);
        if auth != Some(expected.as_str()) {
            return error(401, "invalid token");
        }
        let content_type = request
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok());
        if content_type != Some("application/car") {
            return error(400, "expected application/car");
        }

        let reader = match CarReader::parse(request.body.clone()) {
            Ok(reader) => reader,
            Err(e) => return error(400, &e.to_string()),
        };
        let root = match reader.roots() {
            [root] => *root,
            _ => return error(400, "expected one root"),
        };

        let mut state = self.0.state.lock().unwrap();
        for block in reader.blocks() {
            match block {
                Ok(block) => {
                    state.blocks.insert(block.cid, block.data);
                }
                Err(e) => return error(400, &e.to_string()),
            }
        }
        let name = request
            .headers
            .get("x-name")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        state.uploads.push((root, name));

        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "cid": root.to_string() }))
    }
}

struct CarDownload(FakeStore);

impl Respond for CarDownload {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let segment = request.url.path().rsplit('/').next().unwrap_or_default();
        let root = match ContentId::parse(segment) {
            Ok(root) => root,
            Err(e) => return error(400, &e.to_string()),
        };

        let state = self.0.state.lock().unwrap();
        if !state.blocks.contains_key(&root) {
            return error(404, "content not found");
        }

        let mut blocks = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![root];
        while let Some(cid) = pending.pop() {
            if !seen.insert(cid) {
                continue;
            }
            let Some(data) = state.blocks.get(&cid) else {
                continue;
            };
            if cid.is_dag_pb() {
                if let Ok(node) = PbNode::decode(data) {
                    pending.extend(node.links.iter().map(|l| l.cid));
                }
            }
            blocks.push(Block::new(cid, data.clone()));
        }

        match encode_car(&[root], &blocks) {
            Ok(car) => ResponseTemplate::new(200)
                .insert_header("content-type", "application/car")
                .set_body_bytes(car),
            Err(e) => error(500, &e.to_string()),
        }
    }
}

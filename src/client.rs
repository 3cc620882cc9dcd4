//! HTTP client for the content store API

use crate::car::{self, Block, CarReader};
use crate::cid::ContentId;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::pack::{NamedFile, Packer};
use crate::types::{ListOptions, PutOptions, StatusRecord, Upload};
use crate::vfs::VirtualFile;
use bytes::Bytes;
use chrono::SecondsFormat;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Content type of uploaded archives
const CAR_CONTENT_TYPE: &str = "application/car";

/// Header carrying the upload label
const NAME_HEADER: &str = "X-Name";

#[derive(Deserialize)]
struct CarResponse {
    cid: ContentId,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Client for a content-addressed storage service
///
/// # Example
///
/// ```rust,no_run
/// use content_store_client::{ClientConfig, NamedFile, PutOptions, StoreClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = StoreClient::new(ClientConfig::default().with_token("API_TOKEN"))?;
///
/// let files = vec![NamedFile::from_bytes("hello.txt", "hello world")];
/// let cid = client.put(files, PutOptions::default()).await?;
///
/// let status = client.status(&cid).await?;
/// println!("{} is {:?}", cid, status.state);
///
/// let root = client.get(&cid).await?;
/// for entry in root.list_children(0)? {
///     println!("{} {}", entry.name, entry.size);
/// }
/// # Ok(())
/// # }
/// ```
pub struct StoreClient {
    config: ClientConfig,
    client: Client,
    packer: Packer,
}

impl StoreClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let packer = Packer::new(config.chunk_size, config.max_links)?;
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("content-store-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            packer,
        })
    }

    // ==================== Upload ====================

    /// Pack files into a DAG and upload it, returning the root identifier
    pub async fn put(&self, files: Vec<NamedFile>, options: PutOptions) -> Result<ContentId> {
        self.require_token()?;
        if files.is_empty() {
            return Err(ClientError::InvalidInput("no files to upload".to_string()));
        }

        let packer = self.packer;
        let wrap = options.wrap_with_directory;
        let dag = tokio::task::spawn_blocking(move || packer.pack(files, wrap))
            .await
            .map_err(|e| ClientError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        self.upload_blocks(dag.root, &dag.blocks, options.name.as_deref())
            .await?;
        info!(cid = %dag.root, size = dag.size, "Stored upload");
        Ok(dag.root)
    }

    /// Upload an already-encoded CAR with a single root
    pub async fn put_car(&self, car: impl Into<Bytes>, options: PutOptions) -> Result<ContentId> {
        self.require_token()?;
        let reader = CarReader::parse(car)?;
        let root = match reader.roots() {
            [root] => *root,
            roots => {
                return Err(ClientError::InvalidInput(format!(
                    "CAR must declare exactly one root, found {}",
                    roots.len()
                )))
            }
        };
        let blocks = reader.blocks().collect::<Result<Vec<Block>>>()?;

        self.upload_blocks(root, &blocks, options.name.as_deref())
            .await?;
        info!(cid = %root, blocks = blocks.len(), "Stored CAR");
        Ok(root)
    }

    async fn upload_blocks(&self, root: ContentId, blocks: &[Block], name: Option<&str>) -> Result<()> {
        let cars = car::split_car(root, blocks, self.config.max_chunk_size)?;
        let total = cars.len();
        debug!(cid = %root, archives = total, "Uploading CAR archives");

        stream::iter(cars.into_iter().enumerate())
            .map(|(index, body)| self.post_car(body, name, index, total))
            .buffer_unordered(self.config.max_concurrent_uploads)
            .try_for_each(|returned| async move {
                if returned == root {
                    Ok(())
                } else {
                    Err(ClientError::Integrity {
                        cid: root.to_string(),
                        reason: format!("service stored root {}", returned),
                    })
                }
            })
            .await
    }

    async fn post_car(
        &self,
        body: Vec<u8>,
        name: Option<&str>,
        index: usize,
        total: usize,
    ) -> Result<ContentId> {
        let token = self.require_token()?;
        let url = format!("{}/car", self.config.base_url());
        let bytes = body.len();

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, CAR_CONTENT_TYPE)
            .body(body);
        if let Some(name) = name {
            request = request.header(NAME_HEADER, urlencoding::encode(name).into_owned());
        }

        debug!(part = index + 1, of = total, bytes, "POST /car");
        let response = request.send().await?;
        let CarResponse { cid } = self.handle_response(response).await?;
        Ok(cid)
    }

    // ==================== Status ====================

    /// Pin and deal status of stored content
    pub async fn status(&self, cid: &ContentId) -> Result<StatusRecord> {
        let url = format!("{}/status/{}", self.config.base_url(), cid);
        debug!(cid = %cid, "GET /status");
        let response = self.authorized(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }

    // ==================== Retrieval ====================

    /// Fetch content as a verified virtual filesystem
    pub async fn get(&self, cid: &ContentId) -> Result<VirtualFile> {
        let url = format!("{}/car/{}", self.config.base_url(), cid);
        debug!(cid = %cid, "GET /car");
        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = self.check_status(response).await?;
        let body = response.bytes().await?;

        let car = CarReader::parse(body)?;
        info!(cid = %cid, blocks = car.len(), bytes = car.byte_len(), "Retrieved CAR");
        VirtualFile::from_car(car, *cid)
    }

    // ==================== Listing ====================

    /// Uploads of the account, newest first, fetched page by page
    pub fn list(&self, options: ListOptions) -> impl Stream<Item = Result<Upload>> + '_ {
        let first = self.uploads_url(&options);
        stream::try_unfold(Some(first), move |next| self.next_page(next))
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Upload, ClientError>)))
            .try_flatten()
            .take(options.max_results.unwrap_or(usize::MAX))
    }

    fn uploads_url(&self, options: &ListOptions) -> String {
        let mut url = format!(
            "{}/user/uploads?size={}",
            self.config.base_url(),
            options.page_size
        );
        if let Some(before) = options.before {
            url.push_str("&before=");
            url.push_str(&urlencoding::encode(
                &before.to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }
        url
    }

    async fn next_page(
        &self,
        next: Option<String>,
    ) -> Result<Option<(Vec<Upload>, Option<String>)>> {
        let Some(url) = next else {
            return Ok(None);
        };
        let token = self.require_token()?;
        debug!(url = %url, "GET /user/uploads");

        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let response = self.check_status(response).await?;
        let next = response
            .headers()
            .get(header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_link)
            .map(|link| resolve_link(&url, &link))
            .transpose()?;

        let body = response.text().await?;
        let page: Vec<Upload> = serde_json::from_str(&body)?;
        if page.is_empty() {
            return Ok(None);
        }
        Ok(Some((page, next)))
    }

    // ==================== Helpers ====================

    fn require_token(&self) -> Result<&str> {
        self.config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::Authentication("no API token configured".to_string()))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| body.trim().to_string());
        warn!(status = status.as_u16(), path = %url, message = %message, "Request rejected");

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Authentication(message),
            StatusCode::NOT_FOUND => ClientError::NotFound(if message.is_empty() { url } else { message }),
            _ => ClientError::Service {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(&self, response: Response) -> Result<T> {
        let response = self.check_status(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Target of the `rel="next"` entry of a `Link` header
fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        let is_next = pieces.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        is_next.then(|| target.to_string())
    })
}

fn resolve_link(current: &str, link: &str) -> Result<String> {
    let base = url::Url::parse(current)
        .map_err(|e| ClientError::decode(format!("invalid request URL {}: {}", current, e)))?;
    base.join(link)
        .map(|u| u.to_string())
        .map_err(|e| ClientError::decode(format!("invalid Link target {:?}: {}", link, e)))
}

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode, Url};

use super::{BlobHandle, BlobItem, BlobProperties, ClientError, ObjectClient};

const API_VERSION: &str = "2021-08-06";

// Azurite's well-known development account.
const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// How requests to the blob endpoint are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    SharedKey { account: String, key: Vec<u8> },
    Sas(String),
    Anonymous,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .finish_non_exhaustive(),
            Credential::Sas(_) => f.write_str("Sas(..)"),
            Credential::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Parsed storage-account connection string.
#[derive(Debug, Clone)]
pub struct ConnectionString {
    pub blob_endpoint: Url,
    pub credential: Credential,
}

impl ConnectionString {
    pub fn parse(s: &str) -> Result<Self, ClientError> {
        let mut fields: HashMap<String, String> = HashMap::new();
        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| invalid(format!("segment without '=': {part}")))?;
            fields.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        if fields
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(Self {
                blob_endpoint: parse_endpoint(DEV_BLOB_ENDPOINT)?,
                credential: Credential::SharedKey {
                    account: DEV_ACCOUNT.to_string(),
                    key: decode_key(DEV_ACCOUNT_KEY)?,
                },
            });
        }

        let account = fields.get("accountname").cloned();
        let blob_endpoint = match (fields.get("blobendpoint"), &account) {
            (Some(endpoint), _) => parse_endpoint(endpoint)?,
            (None, Some(account)) => {
                let protocol = fields
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = fields
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                parse_endpoint(&format!("{protocol}://{account}.blob.{suffix}"))?
            }
            (None, None) => return Err(invalid("AccountName or BlobEndpoint is required")),
        };

        let credential = match (fields.get("accountkey"), fields.get("sharedaccesssignature")) {
            (Some(key), _) => Credential::SharedKey {
                account: account.ok_or_else(|| invalid("AccountKey requires AccountName"))?,
                key: decode_key(key)?,
            },
            (None, Some(sas)) => Credential::Sas(sas.trim_start_matches('?').to_string()),
            (None, None) => Credential::Anonymous,
        };

        Ok(Self {
            blob_endpoint,
            credential,
        })
    }
}

fn invalid(msg: impl Into<String>) -> ClientError {
    ClientError::InvalidConnectionString(msg.into())
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ClientError> {
    let url = Url::parse(endpoint).map_err(|e| invalid(format!("bad endpoint {endpoint}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(invalid(format!("endpoint must be http(s): {endpoint}")));
    }
    Ok(url)
}

fn decode_key(key: &str) -> Result<Vec<u8>, ClientError> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, key)
        .map_err(|e| invalid(format!("AccountKey is not valid base64: {e}")))
}

/// Azure Blob Storage client speaking the REST API directly.
pub struct AzureRestClient {
    client: Client,
    endpoint: Url,
    credential: Credential,
}

impl AzureRestClient {
    pub fn new(connection: ConnectionString) -> Result<Self, ClientError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: connection.blob_endpoint,
            credential: connection.credential,
        })
    }

    pub fn from_connection_string(s: &str) -> Result<Self, ClientError> {
        Self::new(ConnectionString::parse(s)?)
    }

    fn container_url(&self, container: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(container);
        }
        url
    }

    fn blob_url(&self, handle: &BlobHandle) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&handle.container)
                .extend(handle.name.split('/'));
        }
        url
    }

    async fn send(
        &self,
        method: Method,
        mut url: Url,
        mut headers: Vec<(String, String)>,
        body: Option<Bytes>,
    ) -> Result<Response, ClientError> {
        headers.push((
            "x-ms-date".to_string(),
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        ));
        headers.push(("x-ms-version".to_string(), API_VERSION.to_string()));
        headers.push((
            "x-ms-client-request-id".to_string(),
            uuid::Uuid::new_v4().to_string(),
        ));

        match &self.credential {
            Credential::SharedKey { account, key } => {
                let content_length = body.as_ref().map_or(0, Bytes::len);
                let to_sign = string_to_sign(&method, &url, &headers, content_length, account);
                headers.push((
                    "authorization".to_string(),
                    format!("SharedKey {account}:{}", sign_hmac_sha256(key, &to_sign)),
                ));
            }
            Credential::Sas(token) => {
                let query = match url.query() {
                    Some(q) if !q.is_empty() => format!("{q}&{token}"),
                    _ => token.clone(),
                };
                url.set_query(Some(&query));
            }
            Credential::Anonymous => {}
        }

        tracing::debug!(%method, path = url.path(), "blob request");

        let mut request = self.client.request(method, url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}

/// Map a non-success response to a client error.
async fn check(resp: Response, what: &str) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let code = resp
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let blob_exists = code.as_deref() == Some("BlobAlreadyExists");
    match status {
        StatusCode::NOT_FOUND => Err(ClientError::NotFound(what.to_string())),
        StatusCode::CONFLICT if blob_exists => Err(ClientError::AlreadyExists(what.to_string())),
        _ => {
            let body = resp.text().await.unwrap_or_default();
            Err(ClientError::Http {
                status: status.as_u16(),
                message: match &code {
                    Some(code) => format!("{code}: {body}"),
                    None => body,
                },
                code,
            })
        }
    }
}

fn header_str<'a>(resp: &'a Response, name: &str) -> Result<&'a str, ClientError> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ClientError::InvalidResponse(format!("missing {name} header")))
}

#[async_trait]
impl ObjectClient for AzureRestClient {
    async fn upload_object(
        &self,
        handle: &BlobHandle,
        data: Bytes,
        overwrite: bool,
    ) -> Result<(), ClientError> {
        let content_type = mime_guess::from_path(&handle.name)
            .first_or_octet_stream()
            .to_string();
        let mut headers = vec![
            ("content-type".to_string(), content_type),
            ("x-ms-blob-type".to_string(), "BlockBlob".to_string()),
        ];
        if !overwrite {
            headers.push(("if-none-match".to_string(), "*".to_string()));
        }

        let resp = self
            .send(Method::PUT, self.blob_url(handle), headers, Some(data))
            .await?;
        match check(resp, &handle.to_string()).await {
            Err(ClientError::Http { status: 412, .. }) if !overwrite => {
                Err(ClientError::AlreadyExists(handle.to_string()))
            }
            other => other.map(|_| ()),
        }
    }

    async fn download_range(
        &self,
        handle: &BlobHandle,
        offset: u64,
        size: Option<u64>,
    ) -> Result<Bytes, ClientError> {
        let headers = range_header(offset, size)
            .map(|range| vec![("x-ms-range".to_string(), range)])
            .unwrap_or_default();

        let resp = self
            .send(Method::GET, self.blob_url(handle), headers, None)
            .await?;
        let resp = check(resp, &handle.to_string()).await?;
        resp.bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn properties(&self, handle: &BlobHandle) -> Result<BlobProperties, ClientError> {
        let resp = self
            .send(Method::HEAD, self.blob_url(handle), Vec::new(), None)
            .await?;
        let resp = check(resp, &handle.to_string()).await?;

        let size: u64 = header_str(&resp, "content-length")?
            .parse()
            .map_err(|e| ClientError::InvalidResponse(format!("bad content-length: {e}")))?;
        let last_modified = DateTime::parse_from_rfc2822(header_str(&resp, "last-modified")?)
            .map_err(|e| ClientError::InvalidResponse(format!("bad last-modified: {e}")))?
            .with_timezone(&Utc);

        Ok(BlobProperties {
            size,
            last_modified,
        })
    }

    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<BlobItem>, ClientError> {
        let mut items = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.container_url(container);
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("restype", "container");
                query.append_pair("comp", "list");
                if !prefix.is_empty() {
                    query.append_pair("prefix", prefix);
                }
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let resp = self.send(Method::GET, url, Vec::new(), None).await?;
            let body = check(resp, container)
                .await?
                .text()
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;

            let page = parse_list_blobs(&body)?;
            items.extend(page.names.into_iter().map(|name| BlobItem { name }));
            match page.next_marker {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }

        Ok(items)
    }
}

/// `x-ms-range` value for a read, or `None` for the whole blob. A range
/// whose end does not fit in a `u64` is sent open-ended.
fn range_header(offset: u64, size: Option<u64>) -> Option<String> {
    match size.filter(|n| *n > 0) {
        Some(n) => match offset.checked_add(n - 1) {
            Some(end) => Some(format!("bytes={offset}-{end}")),
            None => Some(format!("bytes={offset}-")),
        },
        None if offset > 0 => Some(format!("bytes={offset}-")),
        None => None,
    }
}

/// SharedKey string-to-sign for blob service requests.
fn string_to_sign(
    method: &Method,
    url: &Url,
    headers: &[(String, String)],
    content_length: usize,
    account: &str,
) -> String {
    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    };
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut out = [
        method.as_str(),
        header("content-encoding"),
        header("content-language"),
        &length,
        header("content-md5"),
        header("content-type"),
        header("date"),
        header("if-modified-since"),
        header("if-match"),
        header("if-none-match"),
        header("if-unmodified-since"),
        header("range"),
    ]
    .join("\n");
    out.push('\n');

    let mut ms_headers: Vec<(String, &str)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
        .filter(|(k, _)| k.starts_with("x-ms-"))
        .collect();
    ms_headers.sort();
    for (name, value) in ms_headers {
        out.push_str(&format!("{name}:{value}\n"));
    }

    out.push('/');
    out.push_str(account);
    out.push_str(url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        out.push_str(&format!("\n{name}:{}", values.join(",")));
    }

    out
}

fn sign_hmac_sha256(key: &[u8], data: &str) -> String {
    use base64::Engine;

    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key);
    let tag = ring::hmac::sign(&key, data.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(tag.as_ref())
}

#[derive(Debug, Default)]
struct ListPage {
    names: Vec<String>,
    next_marker: Option<String>,
}

/// Extract blob names and the continuation marker from a List Blobs body.
fn parse_list_blobs(xml: &str) -> Result<ListPage, ClientError> {
    use xmlparser::{ElementEnd, Token, Tokenizer};

    let mut page = ListPage::default();
    let mut path: Vec<&str> = Vec::new();

    for token in Tokenizer::from(xml.trim_start_matches('\u{feff}')) {
        let token = token.map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        match token {
            Token::ElementStart { local, .. } => path.push(local.as_str()),
            Token::ElementEnd {
                end: ElementEnd::Close(..) | ElementEnd::Empty,
                ..
            } => {
                path.pop();
            }
            Token::Text { text } | Token::Cdata { text, .. } => match path.as_slice() {
                [.., "Blob", "Name"] => page.names.push(unescape(text.as_str())),
                [.., "NextMarker"] => page.next_marker = Some(unescape(text.as_str())),
                _ => {}
            },
            _ => {}
        }
    }

    Ok(page)
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// SPDX-License-Identifier: GPL-2.0-or-later

//! Upstream metadata/stream-manifest client and the glue that turns a
//! Wbi-signed `playurl` response into a [`pipeline::ResolvedMedia`].
//!
//! The HTTP layer is a thin seam ([`ApiClient`]) over the same
//! `hyper`/`hyper-rustls` stack `fetch` uses for range downloads, so
//! unit tests can substitute a client that returns canned JSON bodies
//! instead of reaching the network.

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::{body::Bytes, header, Request, StatusCode};
use hyper_util::client::legacy::Client;
use pipeline::{Attachment, PipelineError, ResolvedMedia, Resolver};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;
use wbi::{WbiKeyProvider, WbiSigner};

const SINGLE_OP_TIMEOUT: Duration = Duration::from_secs(15);

/// Anonymous callers still get a usable Wbi key; `0` is the ordinary
/// success code.
const NAV_OK_CODES: &[i64] = &[0, -101];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("connect: {0}")]
    Connect(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("body: {0}")]
    Body(String),

    #[error("malformed json: {0}")]
    Json(String),

    #[error("operation timed out")]
    Timeout,

    #[error("upstream error {code}: {message}")]
    Envelope { code: i64, message: String },

    #[error("upstream reports success with no dash data")]
    NoDashData,

    #[error(transparent)]
    Wbi(#[from] wbi::WbiError),
}

/// `{code, message, data|result}`. `code == 0` is success; the `data`
/// field is sometimes named `result` instead, so both names are
/// accepted on deserialize.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "result")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Turns a non-zero `code` into `Envelope`, leaving `code == 0`
    /// untouched for the caller to interpret (a paywalled `playurl`
    /// response is still `code == 0`, just missing `data.dash`).
    fn into_data(self) -> Result<T, ApiError> {
        if self.code != 0 {
            return Err(ApiError::Envelope {
                code: self.code,
                message: self.message,
            });
        }
        self.data.ok_or(ApiError::NoDashData)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WbiImg {
    pub img_url: String,
    pub sub_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NavData {
    pub wbi_img: WbiImg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewData {
    pub cid: u64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashStream {
    pub id: u32,
    #[serde(rename = "baseUrl", alias = "base_url")]
    pub base_url: String,
    #[serde(default, rename = "backup_url", alias = "backupUrl")]
    pub backup_url: Vec<String>,
    pub bandwidth: u64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub frame_rate: Option<String>,
    pub codecid: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlacBlock {
    pub audio: Option<DashStream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashManifest {
    #[serde(default)]
    pub video: Vec<DashStream>,
    #[serde(default)]
    pub audio: Vec<DashStream>,
    #[serde(default)]
    pub flac: Option<FlacBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayurlData {
    pub dash: Option<DashManifest>,
}

/// `id -> label`. Duplicate labels (e.g. `116`/`80` both "1080P") are
/// the upstream's own scheme, not a transcription slip.
pub const QUALITY_LABELS: &[(u32, &str)] = &[
    (127, "8K"),
    (126, "Dolby"),
    (125, "HDR"),
    (120, "4K"),
    (116, "1080P"),
    (112, "1080P+"),
    (80, "1080P"),
    (74, "720P"),
    (64, "720P"),
    (32, "480P"),
    (16, "360P"),
    (6, "240P"),
];

pub const CODEC_LABELS: &[(u32, &str)] = &[(7, "AVC"), (12, "HEVC"), (13, "AV1")];

#[must_use]
pub fn quality_label(id: u32) -> Option<&'static str> {
    QUALITY_LABELS
        .iter()
        .find(|(q, _)| *q == id)
        .map(|(_, label)| *label)
}

#[must_use]
pub fn codec_label(codecid: u32) -> Option<&'static str> {
    CODEC_LABELS
        .iter()
        .find(|(c, _)| *c == codecid)
        .map(|(_, label)| *label)
}

/// Descending `id` (quality), ties broken by descending `codecid`.
#[must_use]
pub fn best_video(streams: &[DashStream]) -> Option<&DashStream> {
    streams.iter().max_by_key(|s| (s.id, s.codecid))
}

/// FLAC, if present, always wins over the regular audio list;
/// otherwise the highest-bandwidth regular representation.
#[must_use]
pub fn best_audio(manifest: &DashManifest) -> Option<&DashStream> {
    manifest
        .flac
        .as_ref()
        .and_then(|flac| flac.audio.as_ref())
        .or_else(|| manifest.audio.iter().max_by_key(|s| s.bandwidth))
}

/// nav/view/playurl, abstracted so tests can hand back canned
/// envelopes without a network round-trip.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn fetch_nav(&self, url: Url) -> Result<Envelope<NavData>, ApiError>;
    async fn fetch_view(&self, url: Url) -> Result<Envelope<ViewData>, ApiError>;
    async fn fetch_playurl(&self, url: Url) -> Result<Envelope<PlayurlData>, ApiError>;
}

type HttpsClient = Client<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    Full<Bytes>,
>;

#[derive(Clone)]
struct SpawnExecutor(tokio::runtime::Handle);

impl<Fut> hyper::rt::Executor<Fut> for SpawnExecutor
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    fn execute(&self, fut: Fut) {
        self.0.spawn(fut);
    }
}

/// Real `ApiClient`: one GET, one small JSON body, no ranges.
#[derive(Clone)]
pub struct HyperApiClient {
    client: HttpsClient,
}

impl HyperApiClient {
    #[must_use]
    pub fn new(rt_handle: tokio::runtime::Handle) -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(SpawnExecutor(rt_handle)).build(https);
        Self { client }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Envelope<T>, ApiError> {
        let req = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header(header::USER_AGENT, "Mozilla/5.0")
            .body(Full::new(Bytes::new()))
            .map_err(|e| ApiError::Connect(e.to_string()))?;

        let res = tokio::time::timeout(SINGLE_OP_TIMEOUT, self.client.request(req))
            .await
            .map_err(|_| ApiError::Timeout)?
            .map_err(|e| ApiError::Connect(e.to_string()))?;

        if res.status() != StatusCode::OK {
            return Err(ApiError::Status(res.status().as_u16()));
        }

        let body = tokio::time::timeout(SINGLE_OP_TIMEOUT, res.into_body().collect())
            .await
            .map_err(|_| ApiError::Timeout)?
            .map_err(|e| ApiError::Body(e.to_string()))?
            .to_bytes();

        serde_json::from_slice(&body).map_err(|e| ApiError::Json(e.to_string()))
    }
}

#[async_trait]
impl ApiClient for HyperApiClient {
    async fn fetch_nav(&self, url: Url) -> Result<Envelope<NavData>, ApiError> {
        self.get_json(url).await
    }

    async fn fetch_view(&self, url: Url) -> Result<Envelope<ViewData>, ApiError> {
        self.get_json(url).await
    }

    async fn fetch_playurl(&self, url: Url) -> Result<Envelope<PlayurlData>, ApiError> {
        self.get_json(url).await
    }
}

/// Fetches `nav` through an [`ApiClient`] and hands the raw key pair
/// to the `wbi` signer; status `0` and `-101` both carry a key.
pub struct NavKeyProvider<C> {
    client: Arc<C>,
    nav_url: Url,
}

impl<C> NavKeyProvider<C> {
    pub fn new(client: Arc<C>, nav_url: Url) -> Self {
        Self { client, nav_url }
    }
}

#[async_trait]
impl<C: ApiClient> WbiKeyProvider for NavKeyProvider<C> {
    async fn fetch_keys(&self) -> Result<(String, String), wbi::WbiError> {
        let envelope = self
            .client
            .fetch_nav(self.nav_url.clone())
            .await
            .map_err(|_| wbi::WbiError::KeyUnavailable)?;
        if !NAV_OK_CODES.contains(&envelope.code) {
            return Err(wbi::WbiError::KeyUnavailable);
        }
        let data = envelope.data.ok_or(wbi::WbiError::KeyUnavailable)?;
        wbi::parse_nav_wbi_img(&data.wbi_img.img_url, &data.wbi_img.sub_url)
            .ok_or(wbi::WbiError::KeyUnavailable)
    }
}

/// Identifies a single playback target: either a `cid` is already
/// known (the common case — an out-of-scope collaborator supplies it
/// from the page the user is on), or a `bvid`/`ep_id` is resolved to
/// one through the `view` endpoint first.
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub bvid: Option<String>,
    pub ep_id: Option<String>,
    pub cid: Option<u64>,
    pub output_filename: String,
    pub quality: u32,
}

/// Composes an [`ApiClient`] and a [`WbiSigner`] into the
/// `pipeline::Resolver` seam: signs and issues `view`/`playurl`,
/// picks the best video/audio representations, and turns their
/// mirror lists into a `ResolvedMedia`.
pub struct BilibiliResolver<C> {
    client: Arc<C>,
    signer: WbiSigner<NavKeyProvider<C>>,
    request: MediaRequest,
    view_url: Url,
    playurl_url: Url,
}

impl<C: ApiClient> BilibiliResolver<C> {
    pub fn new(
        client: Arc<C>,
        nav_url: Url,
        view_url: Url,
        playurl_url: Url,
        request: MediaRequest,
    ) -> Self {
        let signer = WbiSigner::new(NavKeyProvider::new(Arc::clone(&client), nav_url));
        Self {
            client,
            signer,
            request,
            view_url,
            playurl_url,
        }
    }

    async fn resolve_cid(&self, cancel: &CancellationToken) -> Result<u64, PipelineError> {
        if let Some(cid) = self.request.cid {
            return Ok(cid);
        }
        check_cancelled(cancel)?;

        let now = now_unix_secs();
        let wts = now.to_string();
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        if let Some(bvid) = &self.request.bvid {
            pairs.push(("bvid", bvid));
        }
        if let Some(ep_id) = &self.request.ep_id {
            pairs.push(("ep_id", ep_id));
        }
        pairs.push(("wts", &wts));

        let url = self.sign_url(&self.view_url, &pairs, now).await?;
        let envelope = self
            .client
            .fetch_view(url)
            .await
            .map_err(to_pipeline_error)?;
        let data = envelope.into_data().map_err(to_pipeline_error)?;
        Ok(data.cid)
    }

    async fn fetch_manifest(
        &self,
        cid: u64,
        cancel: &CancellationToken,
    ) -> Result<DashManifest, PipelineError> {
        check_cancelled(cancel)?;

        let now = now_unix_secs();
        let cid_str = cid.to_string();
        let qn_str = self.request.quality.to_string();
        let wts = now.to_string();
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        if let Some(bvid) = &self.request.bvid {
            pairs.push(("bvid", bvid));
        }
        if let Some(ep_id) = &self.request.ep_id {
            pairs.push(("ep_id", ep_id));
        }
        pairs.push(("cid", &cid_str));
        pairs.push(("qn", &qn_str));
        pairs.push(("fnval", "4048"));
        pairs.push(("wts", &wts));

        let url = self.sign_url(&self.playurl_url, &pairs, now).await?;
        let envelope = self
            .client
            .fetch_playurl(url)
            .await
            .map_err(to_pipeline_error)?;
        let data = envelope.into_data().map_err(to_pipeline_error)?;
        data.dash
            .ok_or_else(|| to_pipeline_error(ApiError::NoDashData))
    }

    async fn sign_url(
        &self,
        base: &Url,
        pairs: &[(&str, &str)],
        now: i64,
    ) -> Result<Url, PipelineError> {
        let query = encode_query(pairs);
        let signed = self
            .signer
            .sign_query(&query, now)
            .await
            .map_err(|e| to_pipeline_error(e.into()))?;
        let mut url = base.clone();
        url.set_query(Some(&signed));
        Ok(url)
    }
}

#[async_trait]
impl<C: ApiClient + 'static> Resolver for BilibiliResolver<C> {
    async fn resolve(&self, cancel: &CancellationToken) -> Result<ResolvedMedia, PipelineError> {
        let cid = self.resolve_cid(cancel).await?;
        let manifest = self.fetch_manifest(cid, cancel).await?;

        let video = best_video(&manifest.video)
            .ok_or_else(|| PipelineError::Fatal("no video representations in dash manifest".to_owned()))?;
        let audio = best_audio(&manifest)
            .ok_or_else(|| PipelineError::Fatal("no audio representations in dash manifest".to_owned()))?;

        Ok(ResolvedMedia {
            output_filename: self.request.output_filename.clone(),
            video_mirrors: mirrors_for(video)?,
            audio_mirrors: mirrors_for(audio)?,
            attachments: Vec::<Attachment>::new(),
        })
    }
}

fn mirrors_for(stream: &DashStream) -> Result<Vec<Url>, PipelineError> {
    let mut mirrors = Vec::with_capacity(1 + stream.backup_url.len());
    mirrors.push(
        Url::parse(&stream.base_url)
            .map_err(|e| PipelineError::Fatal(format!("invalid baseUrl: {e}")))?,
    );
    for backup in &stream.backup_url {
        if let Ok(url) = Url::parse(backup) {
            mirrors.push(url);
        }
    }
    Ok(mirrors)
}

fn encode_query(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={}", percent_encode_value(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn percent_encode_value(v: &str) -> String {
    url::form_urlencoded::byte_serialize(v.as_bytes()).collect()
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// `S1`/parse-body-syntax-error/timeout all surface as the pipeline's
/// `Network` kind; envelope-level failures keep their own kinds so
/// the scheduler can tell a paywall from a rate-limit.
fn to_pipeline_error(e: ApiError) -> PipelineError {
    match e {
        ApiError::Connect(_) | ApiError::Status(_) | ApiError::Body(_) | ApiError::Json(_) | ApiError::Timeout => {
            PipelineError::Network(e.to_string())
        }
        ApiError::Envelope { code, message } => PipelineError::ApiOther(format!("{code}: {message}")),
        ApiError::NoDashData => {
            PipelineError::ApiAuth("user permission insufficient".to_owned())
        }
        ApiError::Wbi(_) => PipelineError::ApiAuth(e.to_string()),
    }
}

#[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
fn now_unix_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stream(id: u32, codecid: u32, bandwidth: u64) -> DashStream {
        DashStream {
            id,
            base_url: format!("https://example.com/{id}"),
            backup_url: Vec::new(),
            bandwidth,
            width: 1920,
            height: 1080,
            frame_rate: None,
            codecid,
        }
    }

    #[test]
    fn best_video_prefers_highest_id_then_codecid() {
        let streams = vec![stream(80, 7, 100), stream(120, 7, 100), stream(120, 12, 100)];
        let best = best_video(&streams).unwrap();
        assert_eq!(best.id, 120);
        assert_eq!(best.codecid, 12);
    }

    #[test]
    fn best_audio_prefers_flac_over_bandwidth() {
        let manifest = DashManifest {
            video: Vec::new(),
            audio: vec![stream(30280, 0, 320_000)],
            flac: Some(FlacBlock {
                audio: Some(stream(30251, 0, 99_000)),
            }),
        };
        let best = best_audio(&manifest).unwrap();
        assert_eq!(best.id, 30251);
    }

    #[test]
    fn best_audio_falls_back_to_highest_bandwidth() {
        let manifest = DashManifest {
            video: Vec::new(),
            audio: vec![stream(30216, 0, 64_000), stream(30280, 0, 320_000)],
            flac: None,
        };
        let best = best_audio(&manifest).unwrap();
        assert_eq!(best.id, 30280);
    }

    #[test]
    fn quality_and_codec_labels_match_spec_table() {
        assert_eq!(quality_label(127), Some("8K"));
        assert_eq!(quality_label(6), Some("240P"));
        assert_eq!(quality_label(999), None);
        assert_eq!(codec_label(12), Some("HEVC"));
        assert_eq!(codec_label(0), None);
    }

    #[test]
    fn envelope_into_data_surfaces_non_zero_code() {
        let envelope: Envelope<ViewData> = Envelope {
            code: -404,
            message: "not found".to_owned(),
            data: None,
        };
        let err = envelope.into_data().unwrap_err();
        assert!(matches!(err, ApiError::Envelope { code: -404, .. }));
    }

    #[test]
    fn envelope_into_data_treats_success_with_no_data_as_paywall() {
        let envelope: Envelope<PlayurlData> = Envelope {
            code: 0,
            message: "0".to_owned(),
            data: None,
        };
        let err = envelope.into_data().unwrap_err();
        assert!(matches!(err, ApiError::NoDashData));
    }

    #[test]
    fn mirrors_for_skips_unparsable_backups_but_keeps_base() {
        let s = DashStream {
            id: 120,
            base_url: "https://good.example/a".to_owned(),
            backup_url: vec!["not a url".to_owned(), "https://good.example/b".to_owned()],
            bandwidth: 0,
            width: 0,
            height: 0,
            frame_rate: None,
            codecid: 7,
        };
        let mirrors = mirrors_for(&s).unwrap();
        assert_eq!(mirrors.len(), 2);
    }

    #[test]
    fn encode_query_joins_and_escapes() {
        let q = encode_query(&[("bvid", "BV1 2"), ("wts", "100")]);
        assert_eq!(q, "bvid=BV1+2&wts=100");
    }
}

//! HTTP access to the Lizard REST API.
//!
//! [`RemoteTaskClient`] is the narrow surface download workers depend on.
//! [`LizardClient`] implements it with reqwest and adds the browse calls
//! used by the command line front end.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use lizard_common::{Extent, LizardError, LizardResult, Raster, Scenario, ScenarioResult, TaskStatus};

use crate::config::DownloaderConfig;
use crate::download::stream_to_file;

/// Basic auth user name the service expects next to an API key.
pub const API_KEY_USERNAME: &str = "__key__";

/// Parameters of one asynchronous raster export.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterExtraction {
    pub raster_id: String,
    pub bbox: Extent,
    /// Output width in pixels.
    pub width: u64,
    /// Output height in pixels.
    pub height: u64,
    pub projection: Option<String>,
    pub nodata: Option<f64>,
    /// Timestamp for temporal rasters.
    pub start_time: Option<String>,
}

impl RasterExtraction {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("width", self.width.to_string()),
            ("height", self.height.to_string()),
            ("bbox", self.bbox.to_bbox_string()),
            ("format", "geotiff".to_string()),
            ("async", "true".to_string()),
        ];
        if let Some(projection) = &self.projection {
            query.push(("projection", projection.clone()));
        }
        if let Some(nodata) = self.nodata {
            query.push(("nodata", nodata.to_string()));
        }
        if let Some(start) = &self.start_time {
            query.push(("start", start.clone()));
        }
        query
    }
}

/// Remote operations a download worker needs.
#[async_trait]
pub trait RemoteTaskClient: Send + Sync {
    /// Fetch raster metadata from its resource URL.
    async fn get_raster(&self, raster_url: &str) -> LizardResult<Raster>;

    /// Submit an export and return the id of the remote task.
    async fn submit_raster_extraction(&self, request: &RasterExtraction) -> LizardResult<String>;

    async fn get_task_status(&self, task_id: &str) -> LizardResult<TaskStatus>;

    /// Result URL of a finished task.
    async fn get_task_download_url(&self, task_id: &str) -> LizardResult<String>;

    /// Stream `url` to `target`, returning the number of bytes written.
    async fn download_file(&self, url: &str, target: &Path) -> LizardResult<u64>;
}

/// One page of search results.
#[derive(Debug, Clone)]
pub struct SearchPage<T> {
    pub items: Vec<T>,
    /// 1-based page number.
    pub page: u64,
    pub page_count: u64,
    pub count: u64,
}

/// Number of pages needed for `count` rows; an empty result still has one.
pub fn page_count(count: u64, page_size: u64) -> u64 {
    if count == 0 || page_size == 0 {
        1
    } else {
        (count + page_size - 1) / page_size
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    status: TaskStatus,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmittedTask {
    task_id: String,
}

pub(crate) fn transport(e: reqwest::Error) -> LizardError {
    LizardError::Transport(e.to_string())
}

/// Turn a non-2xx response into [`LizardError::HttpStatus`].
pub(crate) fn check_status(response: Response) -> LizardResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(LizardError::HttpStatus {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

/// reqwest-backed Lizard client.
pub struct LizardClient {
    http: Client,
    api_url: String,
    wms_url: String,
    api_key: String,
    authcfg: Option<String>,
    page_size: u64,
}

impl LizardClient {
    pub fn new(config: &DownloaderConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http,
            api_url: config.api_url(),
            wms_url: config.wms_url(),
            api_key: config.api_key()?.to_string(),
            authcfg: config.authcfg.clone(),
            page_size: config.page_size,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn wms_url(&self) -> &str {
        &self.wms_url
    }

    pub fn authcfg(&self) -> Option<&str> {
        self.authcfg.as_deref()
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.http
            .get(url)
            .basic_auth(API_KEY_USERNAME, Some(&self.api_key))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> LizardResult<T> {
        let start = Instant::now();
        let response = self.get(url).query(query).send().await.map_err(transport)?;
        let response = check_status(response)?;
        let body = response.json::<T>().await.map_err(|e| {
            LizardError::InvalidResponse(format!("{}: {}", url, e))
        })?;

        histogram!("lizard_request_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(body)
    }

    fn task_url(&self, task_id: &str) -> String {
        format!("{}tasks/{}/", self.api_url, task_id)
    }

    async fn get_task(&self, task_id: &str) -> LizardResult<TaskResponse> {
        self.get_json(&self.task_url(task_id), &[]).await
    }

    async fn count(&self, resource: &str, name: &str) -> LizardResult<u64> {
        let url = format!("{}{}/", self.api_url, resource);
        let page: Page<serde_json::Value> = self
            .get_json(
                &url,
                &[("name__icontains", name.to_string()), ("limit", "1".to_string())],
            )
            .await?;
        Ok(page.count)
    }

    async fn find<T: DeserializeOwned>(
        &self,
        resource: &str,
        limit: u64,
        offset: u64,
        name: &str,
    ) -> LizardResult<Vec<T>> {
        let url = format!("{}{}/", self.api_url, resource);
        let page: Page<T> = self
            .get_json(
                &url,
                &[
                    ("name__icontains", name.to_string()),
                    ("limit", limit.to_string()),
                    ("offset", offset.to_string()),
                ],
            )
            .await?;
        Ok(page.results)
    }

    pub async fn count_scenarios(&self, name: &str) -> LizardResult<u64> {
        self.count("scenarios", name).await
    }

    /// Scenarios matching `name`, newest first.
    pub async fn find_scenarios(&self, limit: u64, offset: u64, name: &str) -> LizardResult<Vec<Scenario>> {
        let mut scenarios: Vec<Scenario> = self.find("scenarios", limit, offset, name).await?;
        scenarios.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(scenarios)
    }

    pub async fn count_rasters(&self, name: &str) -> LizardResult<u64> {
        self.count("rasters", name).await
    }

    /// Rasters matching `name`, newest first.
    pub async fn find_rasters(&self, limit: u64, offset: u64, name: &str) -> LizardResult<Vec<Raster>> {
        let mut rasters: Vec<Raster> = self.find("rasters", limit, offset, name).await?;
        rasters.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(rasters)
    }

    /// One page of scenarios matching `name`. `page` is 1-based.
    pub async fn search_scenarios(&self, name: &str, page: u64) -> LizardResult<SearchPage<Scenario>> {
        let count = self.count_scenarios(name).await?;
        let page = page.max(1);
        let items = self
            .find_scenarios(self.page_size, (page - 1) * self.page_size, name)
            .await?;
        Ok(SearchPage {
            items,
            page,
            page_count: page_count(count, self.page_size),
            count,
        })
    }

    /// One page of rasters matching `name`. `page` is 1-based.
    pub async fn search_rasters(&self, name: &str, page: u64) -> LizardResult<SearchPage<Raster>> {
        let count = self.count_rasters(name).await?;
        let page = page.max(1);
        let items = self
            .find_rasters(self.page_size, (page - 1) * self.page_size, name)
            .await?;
        Ok(SearchPage {
            items,
            page,
            page_count: page_count(count, self.page_size),
            count,
        })
    }

    pub async fn get_scenario(&self, uuid: &str) -> LizardResult<Scenario> {
        self.get_json(&format!("{}scenarios/{}/", self.api_url, uuid), &[])
            .await
    }

    pub async fn get_raster_by_uuid(&self, uuid: &str) -> LizardResult<Raster> {
        self.get_json(&format!("{}rasters/{}/", self.api_url, uuid), &[])
            .await
    }

    /// Every result of a scenario, with local file names and temporal flags
    /// assigned.
    ///
    /// Raster results need their raster's temporal flag, so each referenced
    /// raster is fetched once.
    #[instrument(skip(self))]
    pub async fn scenario_results(&self, uuid: &str) -> LizardResult<Vec<ScenarioResult>> {
        let mut url = format!("{}scenarios/{}/results/", self.api_url, uuid);
        let mut results = Vec::new();
        loop {
            let page: Page<ScenarioResult> = self.get_json(&url, &[]).await?;
            results.extend(page.results);
            match page.next {
                Some(next) => url = next,
                None => break,
            }
        }

        let mut named = Vec::with_capacity(results.len());
        for result in results {
            let temporal = match result.raster.as_deref() {
                Some(raster_url) => self.get_raster(raster_url).await?.temporal,
                None => false,
            };
            let filename = result.local_filename(temporal);
            named.push(result.with_filename(filename).with_temporal(temporal));
        }

        debug!(scenario = %uuid, count = named.len(), "Listed scenario results");
        Ok(named)
    }

    /// Raw GetCapabilities document.
    pub async fn get_capabilities_xml(&self, url: &str) -> LizardResult<String> {
        let response = self.get(url).send().await.map_err(transport)?;
        let response = check_status(response)?;
        response.text().await.map_err(transport)
    }
}

#[async_trait]
impl RemoteTaskClient for LizardClient {
    async fn get_raster(&self, raster_url: &str) -> LizardResult<Raster> {
        self.get_json(raster_url, &[]).await
    }

    #[instrument(skip(self, request), fields(raster = %request.raster_id, bbox = %request.bbox.to_bbox_string()))]
    async fn submit_raster_extraction(&self, request: &RasterExtraction) -> LizardResult<String> {
        let url = format!("{}rasters/{}/data/", self.api_url, request.raster_id);
        let task: SubmittedTask = self.get_json(&url, &request.query()).await?;

        counter!("lizard_tasks_submitted_total").increment(1);
        info!(task_id = %task.task_id, width = request.width, height = request.height, "Submitted raster task");
        Ok(task.task_id)
    }

    async fn get_task_status(&self, task_id: &str) -> LizardResult<TaskStatus> {
        counter!("lizard_task_polls_total").increment(1);
        Ok(self.get_task(task_id).await?.status)
    }

    async fn get_task_download_url(&self, task_id: &str) -> LizardResult<String> {
        self.get_task(task_id).await?.result.ok_or_else(|| {
            LizardError::InvalidResponse(format!("task {} has no result URL", task_id))
        })
    }

    async fn download_file(&self, url: &str, target: &Path) -> LizardResult<u64> {
        let response = self.get(url).send().await.map_err(transport)?;
        let response = check_status(response)?;
        stream_to_file(response, target).await
    }
}

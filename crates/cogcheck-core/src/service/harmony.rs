//! Blocking HTTP client for the Harmony OGC coverages API.

use super::{ConversionRequest, ConversionService, JobId, JobStatus, ServiceError};
use percent_encoding::percent_decode_str;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument};

const COVERAGES_API_VERSION: &str = "1.0.0";
const OUTPUT_FORMAT: &str = "image/tiff";
const MULTI_VARIABLE_COLLECTION: &str = "parameter_vars";

#[derive(Debug, Clone)]
pub struct HarmonyClient {
    root: Url,
    client: Client,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorDocument {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HarmonyClient {
    pub fn new(root: &str, token: Option<String>) -> Result<Self, ServiceError> {
        let root = Url::parse(root).map_err(|error| ServiceError::InvalidUrl {
            url: root.to_string(),
            detail: error.to_string(),
        })?;
        if root.cannot_be_a_base() {
            return Err(ServiceError::InvalidUrl {
                url: root.to_string(),
                detail: "URL cannot carry path segments".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("cogcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ServiceError::Transport {
                url: root.to_string(),
                source,
            })?;

        Ok(Self {
            root,
            client,
            token: token.filter(|token| !token.trim().is_empty()),
        })
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    /// `{root}/{collection}/ogc-api-coverages/1.0.0/collections/{variable}/coverage/rangeset`
    /// with the granule, output format and async flag as query parameters.
    /// Several variables go through the `parameter_vars` collection with one
    /// `variable` parameter each.
    pub fn rangeset_url(&self, request: &ConversionRequest) -> Result<Url, ServiceError> {
        let variable_segment = match request.variables.as_slice() {
            [single] => single.as_str(),
            _ => MULTI_VARIABLE_COLLECTION,
        };
        let mut url = self.url_with_segments(&[
            request.collection_id.as_str(),
            "ogc-api-coverages",
            COVERAGES_API_VERSION,
            "collections",
            variable_segment,
            "coverage",
            "rangeset",
        ])?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("granuleId", &request.granule_id);
            query.append_pair("format", OUTPUT_FORMAT);
            query.append_pair("maxResults", &request.max_results.to_string());
            query.append_pair("forceAsync", "true");
            if request.variables.len() > 1 {
                for variable in &request.variables {
                    query.append_pair("variable", variable);
                }
            }
        }
        Ok(url)
    }

    pub fn job_url(&self, job_id: &JobId) -> Result<Url, ServiceError> {
        self.url_with_segments(&["jobs", job_id.as_str()])
    }

    fn url_with_segments(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.root.clone();
        url.path_segments_mut()
            .map_err(|_| ServiceError::InvalidUrl {
                url: self.root.to_string(),
                detail: "URL cannot carry path segments".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn send(&self, url: &Url) -> Result<Response, ServiceError> {
        let response = self
            .authorized(self.client.get(url.clone()))
            .send()
            .map_err(|source| ServiceError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        Err(ServiceError::Rejected {
            url: url.to_string(),
            status: status.as_u16(),
            description: error_description(&body),
        })
    }

    fn get_job(&self, url: &Url) -> Result<JobStatus, ServiceError> {
        let body = self
            .send(url)?
            .text()
            .map_err(|source| ServiceError::Transport {
                url: url.to_string(),
                source,
            })?;
        serde_json::from_str(&body).map_err(|source| ServiceError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

impl ConversionService for HarmonyClient {
    #[instrument(skip(self, request), fields(granule = %request.granule_id))]
    fn submit(&self, request: &ConversionRequest) -> Result<JobStatus, ServiceError> {
        let url = self.rangeset_url(request)?;
        info!(url = %url, variables = ?request.variables, "submitting conversion request");
        let job = self.get_job(&url)?;
        info!(job = %job.job_id, state = %job.state, "conversion job accepted");
        Ok(job)
    }

    fn status(&self, job_id: &JobId) -> Result<JobStatus, ServiceError> {
        let url = self.job_url(job_id)?;
        self.get_job(&url)
    }

    #[instrument(skip(self, job, destination), fields(job = %job.job_id))]
    fn download_results(
        &self,
        job: &JobStatus,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, ServiceError> {
        fs::create_dir_all(destination).map_err(|source| ServiceError::Write {
            path: destination.to_path_buf(),
            source,
        })?;

        let mut written = Vec::new();
        for (url, path) in planned_downloads(job, destination)? {
            let mut response = self.send(&url)?;
            let mut file = File::create(&path).map_err(|source| ServiceError::Write {
                path: path.clone(),
                source,
            })?;
            let bytes = response
                .copy_to(&mut file)
                .map_err(|source| ServiceError::Transport {
                    url: url.to_string(),
                    source,
                })?;
            debug!(path = %path.display(), bytes, "downloaded job output");
            written.push(path);
        }
        Ok(written)
    }
}

/// Resolves every data link to a target path. Links that share a file name
/// are rejected.
fn planned_downloads(
    job: &JobStatus,
    destination: &Path,
) -> Result<Vec<(Url, PathBuf)>, ServiceError> {
    let mut names = HashSet::new();
    let mut planned = Vec::new();
    for link in job.data_links() {
        let url = Url::parse(&link.href).map_err(|error| ServiceError::InvalidUrl {
            url: link.href.clone(),
            detail: error.to_string(),
        })?;
        let file_name = download_file_name(&url).ok_or_else(|| {
            ServiceError::Protocol(format!("data link '{}' names no file", link.href))
        })?;
        if !names.insert(file_name.clone()) {
            return Err(ServiceError::Protocol(format!(
                "job {} has several data links named '{}'",
                job.job_id, file_name
            )));
        }
        planned.push((url, destination.join(file_name)));
    }
    Ok(planned)
}

/// Last non-empty path segment, restricted to a plain UTF-8 file name.
fn download_file_name(url: &Url) -> Option<String> {
    let name = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()?;
    let decoded = percent_decode_str(name).decode_utf8().ok()?;
    let plain = !decoded.contains(['/', '\\']) && decoded != "." && decoded != "..";
    plain.then(|| decoded.into_owned())
}

fn error_description(body: &str) -> String {
    serde_json::from_str::<ErrorDocument>(body)
        .ok()
        .and_then(|document| document.description.or(document.message))
        .unwrap_or_else(|| body.trim().to_string())
}

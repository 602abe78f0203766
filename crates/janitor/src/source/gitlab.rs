use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{error, info};

use super::{ProjectId, SourceTree, TreeEntry};
use crate::util::errors::{Error, Result, StdError};

const PAGE_SIZE: &str = "100";

#[derive(Deserialize, Debug)]
struct Group {
    id: u64,
    #[serde(default)]
    full_path: String,
}

#[derive(Deserialize, Debug)]
struct Project {
    id: u64,
}

/// [`SourceTree`] backed by the GitLab REST API (v4).
pub struct GitLabClient {
    base_url: Url,
    token: Option<String>,
    project_prefix: String,
    client: reqwest::Client,
}

impl GitLabClient {
    /// `base_url` includes the API prefix, e.g. `https://gitlab.example.org/api/v4`.
    pub fn new(base_url: &str, token: Option<String>, project_prefix: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            Error::StdError(StdError::InvalidArgument(format!("invalid GitLab URL '{base_url}': {e}")))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::StdError(StdError::InvalidArgument(format!(
                "GitLab URL '{base_url}' cannot be used as a base"
            ))));
        }
        Ok(Self {
            base_url,
            token,
            project_prefix: project_prefix.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Path of the project holding the configuration of `uid` in `domain`.
    pub fn project_path(&self, domain: &str, uid: &str) -> String {
        format!("{}{}/{}", self.project_prefix, domain, uid)
    }

    /// Append `segments` to the base URL, percent-encoding each one (slashes included).
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get(&self, url: Url, what: &str) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.header("PRIVATE-TOKEN", token);
        }
        let response = request.send().await.map_err(|e| {
            error!("Failed to connect to GitLab: {}", e);
            Error::StdError(StdError::HttpError(format!("GitLab request for {what} failed: {e}")))
        })?;

        match response.status() {
            s if s.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(Error::StdError(StdError::NotFound(format!("{what} does not exist")))),
            s => {
                error!("GitLab returned error status {} for {}", s, what);
                Err(Error::StdError(StdError::HttpError(format!("GitLab returned {s} for {what}"))))
            }
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url, what: &str) -> Result<(T, Option<String>)> {
        let response = self.get(url, what).await?;
        let next_page = response
            .headers()
            .get("x-next-page")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let body = response.json::<T>().await.map_err(|e| {
            Error::StdError(StdError::SerializationError(format!("failed to parse {what}: {e}")))
        })?;
        Ok((body, next_page))
    }
}

#[async_trait]
impl SourceTree for GitLabClient {
    async fn resolve_project(&self, domain: &str, uid: &str) -> Result<ProjectId> {
        info!("Searching for GitLab group by domain {}", domain);
        let mut url = self.endpoint(&["groups"]);
        url.query_pairs_mut().append_pair("search", domain);
        let (groups, _) = self.get_json::<Vec<Group>>(url, "group search").await?;

        match groups.as_slice() {
            [] => {
                return Err(Error::StdError(StdError::NotFound(format!(
                    "GitLab group for domain {domain} does not exist"
                ))))
            }
            [group] => info!("Found GitLab group {} ({})", group.full_path, group.id),
            many => {
                return Err(Error::StdError(StdError::AmbiguousSource(format!(
                    "{} GitLab groups match domain {}",
                    many.len(),
                    domain
                ))))
            }
        }

        let project_path = self.project_path(domain, uid);
        info!("Using project path {} to obtain project id", project_path);
        let (project, _) = self
            .get_json::<Project>(self.endpoint(&["projects", project_path.as_str()]), &format!("project {project_path}"))
            .await?;
        Ok(ProjectId(project.id))
    }

    async fn list_tree(
        &self,
        project: ProjectId,
        path: Option<&str>,
        recursive: bool,
        revision: &str,
    ) -> Result<Vec<TreeEntry>> {
        let project_id = project.to_string();
        let mut entries = Vec::new();
        let mut page = Some("1".to_string());

        while let Some(current) = page {
            let mut url = self.endpoint(&["projects", project_id.as_str(), "repository", "tree"]);
            {
                let mut query = url.query_pairs_mut();
                if let Some(path) = path {
                    query.append_pair("path", path);
                }
                query
                    .append_pair("recursive", if recursive { "true" } else { "false" })
                    .append_pair("ref", revision)
                    .append_pair("per_page", PAGE_SIZE)
                    .append_pair("page", &current);
            }
            let (batch, next) = self
                .get_json::<Vec<TreeEntry>>(url, &format!("tree of project {project} at '{revision}'"))
                .await?;
            entries.extend(batch);
            page = next;
        }

        Ok(entries)
    }

    async fn read_file(&self, project: ProjectId, path: &str, revision: &str) -> Result<Vec<u8>> {
        let project_id = project.to_string();
        let mut url = self.endpoint(&["projects", project_id.as_str(), "repository", "files", path, "raw"]);
        url.query_pairs_mut().append_pair("ref", revision);
        let response = self.get(url, &format!("file {path}")).await?;
        let bytes = response.bytes().await.map_err(|e| {
            Error::StdError(StdError::IoError(format!("failed to read body of file {path}: {e}")))
        })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{flatten, EntryKind, ROOT_GROUP};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GitLabClient {
        GitLabClient::new(&format!("{}/api/v4", server.uri()), Some("token".to_string()), "groups-").unwrap()
    }

    #[test]
    fn endpoint_encodes_slashes_inside_segments() {
        let client = GitLabClient::new("https://gitlab.example.org/api/v4/", None, "groups-").unwrap();
        let url = client.endpoint(&["projects", "groups-acme/app1"]);
        assert_eq!(url.as_str(), "https://gitlab.example.org/api/v4/projects/groups-acme%2Fapp1");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(GitLabClient::new("not a url", None, "groups-").is_err());
    }

    #[tokio::test]
    async fn resolves_project_through_unique_group() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/groups"))
            .and(query_param("search", "acme"))
            .and(header("PRIVATE-TOKEN", "token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3, "full_path": "groups-acme"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/groups-acme%2Fapp1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "name": "app1"})))
            .mount(&server)
            .await;

        let project = client(&server).resolve_project("acme", "app1").await.unwrap();

        assert_eq!(project, ProjectId(42));
    }

    #[tokio::test]
    async fn several_matching_groups_are_ambiguous() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3}, {"id": 4}])))
            .mount(&server)
            .await;

        let err = client(&server).resolve_project("acme", "app1").await.unwrap_err();

        assert!(matches!(err.root(), StdError::AmbiguousSource(_)));
    }

    #[tokio::test]
    async fn no_matching_group_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = client(&server).resolve_project("acme", "app1").await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/groups-acme%2Fapp1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server).resolve_project("acme", "app1").await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn tree_listing_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/42/repository/tree"))
            .and(query_param("page", "1"))
            .and(query_param("recursive", "true"))
            .and(query_param("path", "cfg"))
            .and(query_param("ref", "release-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-next-page", "2")
                    .set_body_json(json!([{"id": "a", "name": "b.yaml", "path": "cfg/b.yaml", "type": "blob", "mode": "100644"}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/42/repository/tree"))
            .and(query_param("page", "2"))
            .and(query_param("ref", "release-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-next-page", "")
                    .set_body_json(json!([{"id": "b", "name": "deep", "path": "cfg/deep", "type": "tree", "mode": "040000"}])),
            )
            .mount(&server)
            .await;

        let entries = client(&server).list_tree(ProjectId(42), Some("cfg"), true, "release-1")
            .await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::Blob);
        assert_eq!(entries[1], TreeEntry::tree("cfg/deep"));
    }

    #[tokio::test]
    async fn flatten_lists_and_reads_at_the_same_revision() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/42/repository/tree"))
            .and(query_param("ref", "release-1"))
            .and(query_param("recursive", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "a", "name": "a.yaml", "path": "a.yaml", "type": "blob", "mode": "100644"},
                {"id": "b", "name": "cfg", "path": "cfg", "type": "tree", "mode": "040000"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/42/repository/tree"))
            .and(query_param("ref", "release-1"))
            .and(query_param("recursive", "true"))
            .and(query_param("path", "cfg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "c", "name": "b.yaml", "path": "cfg/b.yaml", "type": "blob", "mode": "100644"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/42/repository/files/a.yaml/raw"))
            .and(query_param("ref", "release-1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/42/repository/files/cfg%2Fb.yaml/raw"))
            .and(query_param("ref", "release-1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"y".to_vec()))
            .mount(&server)
            .await;

        let tree = flatten(&client(&server), ProjectId(42), "release-1").await.unwrap();

        assert_eq!(tree.group(ROOT_GROUP).unwrap().get("a.yaml"), Some(&b"x".to_vec()));
        assert_eq!(tree.group("cfg").unwrap().get("b.yaml"), Some(&b"y".to_vec()));
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 4);
        assert!(requests
            .iter()
            .all(|r| r.url.query_pairs().any(|(k, v)| k == "ref" && v == "release-1")));
    }

    #[tokio::test]
    async fn unknown_revision_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/42/repository/tree"))
            .and(query_param("ref", "no-such-branch"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "404 Tree Not Found"})))
            .mount(&server)
            .await;

        let err = flatten(&client(&server), ProjectId(42), "no-such-branch").await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn reads_raw_file_at_revision() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/42/repository/files/cfg%2Fb.yaml/raw"))
            .and(query_param("ref", "master"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"y: 1".to_vec()))
            .mount(&server)
            .await;

        let content = client(&server).read_file(ProjectId(42), "cfg/b.yaml", "master").await.unwrap();

        assert_eq!(content, b"y: 1".to_vec());
    }
}

use crate::manifest::Manifest;
use crate::submit::ClusterClient;
use crate::{ClusterConfig, ShipitError};
use std::io::Read;

/// Submits manifests to a Kubernetes-compatible API server.
///
/// Each document is `POST`ed to its collection endpoint:
/// - core group (`v1`): `/api/v1/namespaces/<ns>/<kind>s`
/// - named groups (`apps/v1`, `route.openshift.io/v1`, ...):
///   `/apis/<group>/<version>/namespaces/<ns>/<kind>s`
pub struct HttpClusterClient {
    config: ClusterConfig,
    agent: ureq::Agent,
}

impl HttpClusterClient {
    pub fn new(config: ClusterConfig) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { config, agent }
    }

    fn collection_url(&self, manifest: &Manifest) -> Result<String, ShipitError> {
        let (Some(api_version), Some(kind)) = (manifest.api_version(), manifest.resource_kind()) else {
            return Err(ShipitError::Rejected {
                name: manifest.name.clone(),
                reason: "document has no apiVersion or kind".to_owned(),
            });
        };
        let prefix = if api_version.contains('/') { "apis" } else { "api" };
        Ok(format!(
            "{}/{prefix}/{api_version}/namespaces/{}/{}s",
            self.config.url,
            self.config.namespace,
            kind.to_ascii_lowercase()
        ))
    }

    fn do_post(&self, url: &str, name: &str, data: &[u8]) -> Result<String, ShipitError> {
        let mut req = self
            .agent
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(ref token) = self.config.token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = match req.send(data) {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(ShipitError::Rejected {
                    name: name.to_owned(),
                    reason: format!("HTTP {code}"),
                });
            }
            Err(e) => return Err(ShipitError::Http(e.to_string())),
        };

        let code = resp.status().as_u16();
        let mut reader = resp.into_body().into_reader();
        let mut body = String::new();
        reader
            .read_to_string(&mut body)
            .map_err(|e| ShipitError::Http(e.to_string()))?;
        tracing::debug!("HTTP {code} for {url}: {} bytes", body.len());
        Ok(format!("HTTP {code}"))
    }
}

impl ClusterClient for HttpClusterClient {
    fn apply(&self, manifest: &Manifest) -> Result<String, ShipitError> {
        let url = self.collection_url(manifest)?;
        let data = serde_json::to_vec(&manifest.document)
            .map_err(|e| ShipitError::Serialization(e.to_string()))?;
        tracing::debug!("POST {url} ({} bytes)", data.len());
        self.do_post(&url, &manifest.name, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ResourceKind;
    use dockhand_schema::ServiceName;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    /// Answers 201 to every POST, or 409 for paths listed in `conflicts`.
    struct MockApiServer {
        addr: String,
        _handle: std::thread::JoinHandle<()>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockApiServer {
        fn start(conflicts: Vec<String>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));
            let conflicts = Arc::new(conflicts);

            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let reqs = Arc::clone(&requests_clone);
                    let conflicts = Arc::clone(&conflicts);

                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let method = parts[0].to_owned();
                        let path = parts[1].to_owned();

                        let mut content_length: usize = 0;
                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            if let Some((k, v)) = line.trim().split_once(": ") {
                                headers.insert(k.to_lowercase(), v.to_owned());
                            }
                            let lower = line.to_lowercase();
                            if let Some(val) = lower.strip_prefix("content-length: ") {
                                content_length = val.trim().parse().unwrap_or(0);
                            }
                        }

                        let mut body = vec![0u8; content_length];
                        if content_length > 0 {
                            let _ = reader.read_exact(&mut body);
                        }

                        let response = if conflicts.contains(&path) {
                            "HTTP/1.1 409 Conflict\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_owned()
                        } else {
                            let payload = "{\"status\":\"created\"}";
                            format!(
                                "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                                payload.len()
                            )
                        };

                        reqs.lock().unwrap().push(CapturedRequest {
                            method,
                            path,
                            headers,
                            body,
                        });
                        let _ = stream.write_all(response.as_bytes());
                        let _ = stream.flush();
                    });
                }
            });

            MockApiServer {
                addr,
                _handle: handle,
                requests,
            }
        }

        fn captured_requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn manifest(name: &str, api_version: &str, kind: &str) -> Manifest {
        Manifest {
            name: name.to_owned(),
            kind: ResourceKind::Workload,
            service: ServiceName::new("web"),
            document: json!({"apiVersion": api_version, "kind": kind, "metadata": {"name": "web"}}),
        }
    }

    #[test]
    fn collection_paths_follow_api_groups() {
        let client = HttpClusterClient::new(ClusterConfig::new("https://k8s.example").with_namespace("demo"));
        assert_eq!(
            client
                .collection_url(&manifest("web-deployment", "apps/v1", "Deployment"))
                .unwrap(),
            "https://k8s.example/apis/apps/v1/namespaces/demo/deployments"
        );
        assert_eq!(
            client.collection_url(&manifest("web-service", "v1", "Service")).unwrap(),
            "https://k8s.example/api/v1/namespaces/demo/services"
        );
        assert_eq!(
            client
                .collection_url(&manifest("web-route", "route.openshift.io/v1", "Route"))
                .unwrap(),
            "https://k8s.example/apis/route.openshift.io/v1/namespaces/demo/routes"
        );
    }

    #[test]
    fn http_post_sends_document_and_token() {
        let server = MockApiServer::start(vec![]);
        let client = HttpClusterClient::new(ClusterConfig::new(&server.addr).with_token("secret-token-42"));

        let ack = client
            .apply(&manifest("web-deployment", "apps/v1", "Deployment"))
            .unwrap();
        assert_eq!(ack, "HTTP 201");

        std::thread::sleep(std::time::Duration::from_millis(50));
        let reqs = server.captured_requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, "POST");
        assert_eq!(reqs[0].path, "/apis/apps/v1/namespaces/default/deployments");
        assert_eq!(
            reqs[0].headers.get("authorization"),
            Some(&"Bearer secret-token-42".to_owned())
        );
        let sent: serde_json::Value = serde_json::from_slice(&reqs[0].body).unwrap();
        assert_eq!(sent["kind"], "Deployment");
    }

    #[test]
    fn http_no_auth_header_without_token() {
        let server = MockApiServer::start(vec![]);
        let client = HttpClusterClient::new(ClusterConfig::new(&server.addr));
        client.apply(&manifest("web-service", "v1", "Service")).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));
        let reqs = server.captured_requests();
        assert!(!reqs.is_empty());
        assert!(!reqs[0].headers.contains_key("authorization"));
    }

    #[test]
    fn http_conflict_is_a_rejection() {
        let server = MockApiServer::start(vec!["/api/v1/namespaces/default/services".to_owned()]);
        let client = HttpClusterClient::new(ClusterConfig::new(&server.addr));
        let err = client
            .apply(&manifest("web-service", "v1", "Service"))
            .unwrap_err();
        assert_eq!(err.to_string(), "cluster rejected 'web-service': HTTP 409");
    }

    #[test]
    fn http_connection_refused_returns_error() {
        let client = HttpClusterClient::new(ClusterConfig::new("http://127.0.0.1:1"));
        let err = client
            .apply(&manifest("web-deployment", "apps/v1", "Deployment"))
            .unwrap_err();
        assert!(matches!(err, ShipitError::Http(_)));
    }

    #[test]
    fn document_without_kind_is_rejected_locally() {
        let client = HttpClusterClient::new(ClusterConfig::new("http://127.0.0.1:1"));
        let mut bare = manifest("web-deployment", "apps/v1", "Deployment");
        bare.document = json!({});
        assert!(matches!(client.apply(&bare), Err(ShipitError::Rejected { .. })));
    }
}

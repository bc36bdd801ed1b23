//! Orchestration platform abstraction for testability.
//!
//! The [`MeshPlatform`] trait covers everything the harness asks of the cluster:
//! isolated workload groups, workload deployment, configuration documents and
//! readiness. Production code uses [`KubectlPlatform`], which shells out to
//! `kubectl`; tests use `MockPlatform` or their own mocks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ EnvironmentProvisioner│
//! │ PolicyInjector        │
//! └──────────┬───────────┘
//!            ▼
//!     ┌─────────────┐
//!     │MeshPlatform │ (trait)
//!     └─────────────┘
//!        │       │
//!        ▼       ▼
//!   ┌───────┐ ┌──────┐
//!   │Kubectl│ │ Mock │
//!   └───┬───┘ └──────┘
//!       ▼
//!   Kubernetes API
//! ```

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use ratecheck_core::config::RatecheckConfig;
use ratecheck_core::types::{Workload, WorkloadGroup, WorkloadPort, WorkloadRole};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::HarnessError;

/// Generates a unique group name: `prefix` + `-` + 8 hex characters.
pub fn group_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &id[..8])
}

/// Workload to deploy into a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Service name, also used as the `app` label.
    pub service: String,
    /// Client or server.
    pub role: WorkloadRole,
    /// Named ports. Clients have none.
    pub ports: Vec<WorkloadPort>,
}

impl WorkloadSpec {
    /// Label selector matching this workload's pods.
    pub fn selector(&self) -> String {
        format!("app={}", self.service)
    }
}

/// Trait abstracting the orchestration platform.
///
/// All cluster access goes through this trait. The trait is
/// `Send + Sync + 'static`, allowing it to be shared behind an `Arc`.
///
/// # Implementations
///
/// - [`KubectlPlatform`]: production implementation using the `kubectl` CLI
/// - `MockPlatform`: test implementation with configurable failures (tests only)
pub trait MeshPlatform: Send + Sync + 'static {
    /// Creates an isolated workload group named after `prefix`.
    fn create_workload_group(
        &self,
        prefix: &str,
        injection_enabled: bool,
    ) -> impl Future<Output = Result<WorkloadGroup, HarnessError>> + Send;

    /// Deletes a workload group and everything in it.
    fn delete_workload_group(
        &self,
        group: &WorkloadGroup,
    ) -> impl Future<Output = Result<(), HarnessError>> + Send;

    /// Applies a configuration document in `scope`.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Platform` when the control plane rejects the document.
    fn apply_config(
        &self,
        scope: &str,
        document: &str,
    ) -> impl Future<Output = Result<(), HarnessError>> + Send;

    /// Deletes the objects described by `document` from `scope`.
    ///
    /// Objects that no longer exist are not an error.
    fn delete_config(
        &self,
        scope: &str,
        document: &str,
    ) -> impl Future<Output = Result<(), HarnessError>> + Send;

    /// Waits until pods matching `selector` in `scope` report ready.
    fn wait_until_ready(
        &self,
        scope: &str,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), HarnessError>> + Send;

    /// Deploys workloads into a group and returns their addressable form.
    fn deploy_workloads(
        &self,
        group: &WorkloadGroup,
        specs: &[WorkloadSpec],
    ) -> impl Future<Output = Result<Vec<Workload>, HarnessError>> + Send;

    /// Resolves the external address of the ingress gateway.
    fn ingress_address(&self) -> impl Future<Output = Result<String, HarnessError>> + Send;
}

/// `kubectl` invocation settings shared by the platform and the exec traffic generator.
#[derive(Debug, Clone)]
pub struct Kubectl {
    path: String,
    context: Option<String>,
    command_timeout: Duration,
}

impl Kubectl {
    /// Creates a runner from cluster settings.
    pub fn from_config(config: &RatecheckConfig) -> Self {
        let cluster = &config.cluster;
        Self {
            path: cluster.kubectl_path.clone(),
            context: (!cluster.context.is_empty()).then(|| cluster.context.clone()),
            command_timeout: Duration::from_secs(cluster.command_timeout_secs),
        }
    }

    /// Default upper bound for a single command.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Runs `kubectl` with the default timeout and returns stdout.
    pub async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String, HarnessError> {
        self.run_bounded(args, stdin, self.command_timeout).await
    }

    /// Runs `kubectl` with an explicit timeout and returns stdout.
    ///
    /// The child is killed if the timeout elapses.
    pub async fn run_bounded(
        &self,
        args: &[&str],
        stdin: Option<&str>,
        limit: Duration,
    ) -> Result<String, HarnessError> {
        let mut cmd = Command::new(&self.path);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let command_line = format!("{} {}", self.path, args.join(" "));
        debug!(command = %command_line, "running kubectl");

        let mut child = cmd.spawn().map_err(|e| {
            HarnessError::Platform(format!("failed to spawn '{}': {e}", self.path))
        })?;

        if let Some(input) = stdin {
            let mut pipe = child.stdin.take().ok_or_else(|| {
                HarnessError::Platform(format!("stdin unavailable for '{command_line}'"))
            })?;
            pipe.write_all(input.as_bytes()).await.map_err(|e| {
                HarnessError::Platform(format!("failed to write stdin of '{command_line}': {e}"))
            })?;
            // pipe drop 시 EOF 전달
        }

        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(HarnessError::Platform(format!(
                    "'{command_line}' failed: {e}"
                )));
            }
            Err(_elapsed) => {
                return Err(HarnessError::CommandTimeout {
                    command: command_line,
                    timeout_secs: limit.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarnessError::Platform(format!(
                "'{command_line}' exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Production platform implementation backed by the `kubectl` CLI.
///
/// Workload groups are namespaces labelled `istio-injection=enabled|disabled`.
/// Workloads are rendered as Deployment + Service manifests and piped to
/// `kubectl apply`.
pub struct KubectlPlatform {
    kubectl: Kubectl,
    ingress_namespace: String,
    ingress_service: String,
    client_image: String,
    server_image: String,
}

impl KubectlPlatform {
    /// Creates a platform from the top-level configuration.
    pub fn from_config(config: &RatecheckConfig) -> Self {
        Self {
            kubectl: Kubectl::from_config(config),
            ingress_namespace: config.cluster.ingress_namespace.clone(),
            ingress_service: config.cluster.ingress_service.clone(),
            client_image: config.environment.client_image.clone(),
            server_image: config.environment.server_image.clone(),
        }
    }

    fn image_for(&self, role: WorkloadRole) -> &str {
        match role {
            WorkloadRole::Client => &self.client_image,
            WorkloadRole::Server => &self.server_image,
        }
    }
}

/// Renders the namespace manifest for a workload group.
fn namespace_manifest(group: &WorkloadGroup) -> serde_json::Value {
    let injection = if group.injection_enabled {
        "enabled"
    } else {
        "disabled"
    };
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": group.name,
            "labels": { "istio-injection": injection },
        },
    })
}

/// Renders Deployment (and Service, when the workload has ports) manifests.
fn workload_manifests(spec: &WorkloadSpec, image: &str) -> Vec<serde_json::Value> {
    let labels = json!({ "app": spec.service });

    let mut container = json!({
        "name": spec.service,
        "image": image,
        "ports": spec.ports.iter().map(|p| json!({
            "name": p.name,
            "containerPort": p.instance_port,
        })).collect::<Vec<_>>(),
        "securityContext": { "runAsNonRoot": true, "runAsUser": 1000 },
    });
    match spec.role {
        WorkloadRole::Client => {
            container["command"] = json!(["sleep", "365d"]);
        }
        WorkloadRole::Server => {
            if let Some(port) = spec.ports.first() {
                container["args"] = json!([format!("-listen=:{}", port.instance_port), "-text=ok"]);
            }
        }
    }

    let mut manifests = vec![json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": spec.service, "labels": labels },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": { "containers": [container] },
            },
        },
    })];

    if !spec.ports.is_empty() {
        manifests.push(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": spec.service, "labels": labels },
            "spec": {
                "selector": labels,
                "ports": spec.ports.iter().map(|p| json!({
                    "name": p.name,
                    "port": p.service_port,
                    "targetPort": p.instance_port,
                    "appProtocol": p.protocol.to_string(),
                })).collect::<Vec<_>>(),
            },
        }));
    }

    manifests
}

impl MeshPlatform for KubectlPlatform {
    async fn create_workload_group(
        &self,
        prefix: &str,
        injection_enabled: bool,
    ) -> Result<WorkloadGroup, HarnessError> {
        let group = WorkloadGroup::new(group_name(prefix), injection_enabled);
        let manifest = namespace_manifest(&group).to_string();
        self.kubectl
            .run(&["apply", "-f", "-"], Some(&manifest))
            .await?;
        info!(
            group = %group,
            injection_enabled = injection_enabled,
            "created workload group"
        );
        Ok(group)
    }

    async fn delete_workload_group(&self, group: &WorkloadGroup) -> Result<(), HarnessError> {
        self.kubectl
            .run(
                &[
                    "delete",
                    "namespace",
                    &group.name,
                    "--ignore-not-found",
                    "--wait=false",
                ],
                None,
            )
            .await?;
        info!(group = %group, "deleted workload group");
        Ok(())
    }

    async fn apply_config(&self, scope: &str, document: &str) -> Result<(), HarnessError> {
        self.kubectl
            .run(&["apply", "-n", scope, "-f", "-"], Some(document))
            .await?;
        Ok(())
    }

    async fn delete_config(&self, scope: &str, document: &str) -> Result<(), HarnessError> {
        self.kubectl
            .run(
                &["delete", "-n", scope, "--ignore-not-found", "-f", "-"],
                Some(document),
            )
            .await?;
        Ok(())
    }

    async fn wait_until_ready(
        &self,
        scope: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        let timeout_arg = format!("--timeout={}s", timeout.as_secs().max(1));
        // kubectl 자체 타임아웃이 먼저 끝나도록 여유를 둠
        let limit = timeout.saturating_add(Duration::from_secs(10));
        self.kubectl
            .run_bounded(
                &[
                    "wait",
                    "-n",
                    scope,
                    "--for=condition=Ready",
                    "pod",
                    "-l",
                    selector,
                    &timeout_arg,
                ],
                None,
                limit,
            )
            .await?;
        Ok(())
    }

    async fn deploy_workloads(
        &self,
        group: &WorkloadGroup,
        specs: &[WorkloadSpec],
    ) -> Result<Vec<Workload>, HarnessError> {
        let items: Vec<serde_json::Value> = specs
            .iter()
            .flat_map(|spec| workload_manifests(spec, self.image_for(spec.role)))
            .collect();
        let list = json!({ "apiVersion": "v1", "kind": "List", "items": items }).to_string();

        self.kubectl
            .run(&["apply", "-n", &group.name, "-f", "-"], Some(&list))
            .await?;

        Ok(specs
            .iter()
            .map(|spec| Workload {
                service: spec.service.clone(),
                namespace: group.name.clone(),
                ports: spec.ports.clone(),
            })
            .collect())
    }

    async fn ingress_address(&self) -> Result<String, HarnessError> {
        for field in ["ip", "hostname"] {
            let jsonpath = format!("jsonpath={{.status.loadBalancer.ingress[0].{field}}}");
            let address = self
                .kubectl
                .run(
                    &[
                        "get",
                        "svc",
                        &self.ingress_service,
                        "-n",
                        &self.ingress_namespace,
                        "-o",
                        &jsonpath,
                    ],
                    None,
                )
                .await?;
            let address = address.trim();
            if !address.is_empty() {
                return Ok(address.to_owned());
            }
        }

        Err(HarnessError::Platform(format!(
            "ingress service {}/{} has no external address",
            self.ingress_namespace, self.ingress_service
        )))
    }
}

/// 테스트용 Mock 플랫폼
///
/// 호출을 기록하고, 설정에 따라 특정 호출을 실패시킵니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockPlatform {
    /// 기록된 호출 (예: "create:istio-echo", "apply:istio-system")
    pub calls: std::sync::Mutex<Vec<String>>,
    /// create_workload_group 실패 여부
    pub fail_create: bool,
    /// deploy_workloads 실패 여부
    pub fail_deploy: bool,
    /// apply_config 실패 여부
    pub fail_apply: bool,
    /// delete_config 실패 여부
    pub fail_delete_config: bool,
    /// 이 셀렉터는 항상 준비되지 않음
    pub never_ready: Option<String>,
    /// 반환할 인그레스 주소
    pub ingress: Option<String>,
}

#[cfg(test)]
impl MockPlatform {
    /// 모든 호출이 성공하는 mock 플랫폼을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 그룹 생성이 실패하도록 설정합니다.
    pub fn with_failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// 워크로드 배포가 실패하도록 설정합니다.
    pub fn with_failing_deploy(mut self) -> Self {
        self.fail_deploy = true;
        self
    }

    /// 설정 적용이 실패하도록 설정합니다.
    pub fn with_failing_apply(mut self) -> Self {
        self.fail_apply = true;
        self
    }

    /// 설정 삭제가 실패하도록 설정합니다.
    pub fn with_failing_delete_config(mut self) -> Self {
        self.fail_delete_config = true;
        self
    }

    /// 주어진 셀렉터가 절대 준비되지 않도록 설정합니다.
    pub fn with_never_ready(mut self, selector: &str) -> Self {
        self.never_ready = Some(selector.to_owned());
        self
    }

    /// 인그레스 주소를 설정합니다.
    pub fn with_ingress(mut self, address: &str) -> Self {
        self.ingress = Some(address.to_owned());
        self
    }

    /// 기록된 호출 목록을 반환합니다.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// 접두어로 시작하는 호출 수를 반환합니다.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[cfg(test)]
impl MeshPlatform for MockPlatform {
    async fn create_workload_group(
        &self,
        prefix: &str,
        injection_enabled: bool,
    ) -> Result<WorkloadGroup, HarnessError> {
        self.record(format!("create:{prefix}"));
        if self.fail_create {
            return Err(HarnessError::Platform("mock create failure".to_owned()));
        }
        Ok(WorkloadGroup::new(group_name(prefix), injection_enabled))
    }

    async fn delete_workload_group(&self, group: &WorkloadGroup) -> Result<(), HarnessError> {
        self.record(format!("delete_group:{}", group.name));
        Ok(())
    }

    async fn apply_config(&self, scope: &str, _document: &str) -> Result<(), HarnessError> {
        self.record(format!("apply:{scope}"));
        if self.fail_apply {
            return Err(HarnessError::Platform("mock apply failure".to_owned()));
        }
        Ok(())
    }

    async fn delete_config(&self, scope: &str, _document: &str) -> Result<(), HarnessError> {
        self.record(format!("delete_config:{scope}"));
        if self.fail_delete_config {
            return Err(HarnessError::Platform("mock delete failure".to_owned()));
        }
        Ok(())
    }

    async fn wait_until_ready(
        &self,
        scope: &str,
        selector: &str,
        _timeout: Duration,
    ) -> Result<(), HarnessError> {
        self.record(format!("wait:{selector}"));
        if self.never_ready.as_deref() == Some(selector) {
            return Err(HarnessError::Platform(format!(
                "no ready pods for {selector} in {scope}"
            )));
        }
        Ok(())
    }

    async fn deploy_workloads(
        &self,
        group: &WorkloadGroup,
        specs: &[WorkloadSpec],
    ) -> Result<Vec<Workload>, HarnessError> {
        self.record(format!("deploy:{}", group.name));
        if self.fail_deploy {
            return Err(HarnessError::Platform("mock deploy failure".to_owned()));
        }
        Ok(specs
            .iter()
            .map(|spec| Workload {
                service: spec.service.clone(),
                namespace: group.name.clone(),
                ports: spec.ports.clone(),
            })
            .collect())
    }

    async fn ingress_address(&self) -> Result<String, HarnessError> {
        self.record("ingress".to_owned());
        self.ingress
            .clone()
            .ok_or_else(|| HarnessError::Platform("no ingress".to_owned()))
    }
}

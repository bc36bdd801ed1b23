//! 테스트 환경 구성
//!
//! [`EnvironmentProvisioner::provision`]은 스위트마다 한 번 실행되어 두 개의 워크로드
//! 그룹(클라이언트/서버, 결정 서비스)을 만들고 준비 상태와 데이터 경로 수렴을 기다립니다.
//! 결과인 [`Environment`]는 모든 시나리오에 참조로 전달되는 명시적 컨텍스트입니다.
//!
//! 어느 단계든 실패하면 [`HarnessError::Provisioning`]으로 스위트 전체가 중단되고,
//! 이미 만든 그룹은 최선을 다해 삭제합니다.

use std::path::Path;
use std::sync::Arc;

use metrics::histogram;
use ratecheck_core::metrics as m;
use ratecheck_core::types::{Protocol, Workload, WorkloadGroup, WorkloadPort, WorkloadRole};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::convergence::{self, Canary};
use crate::error::HarnessError;
use crate::platform::{MeshPlatform, WorkloadSpec};
use crate::template::{self, TemplateParams};
use crate::traffic::{TrafficDriver, TrafficGenerator, TrafficTarget};

/// 구성된 테스트 환경
#[derive(Debug, Clone)]
pub struct Environment {
    /// 클라이언트/서버 그룹 (사이드카 주입)
    pub echo_group: WorkloadGroup,
    /// 결정 서비스 그룹 (주입 없음)
    pub ratelimit_group: WorkloadGroup,
    /// 결정 서비스 헬스체크 대상
    pub decision_health: TrafficTarget,
    /// 클라이언트 워크로드
    pub client: Workload,
    /// 서버 워크로드
    pub server: Workload,
    /// 서버 포트 이름
    pub port_name: String,
    /// 인그레스 게이트웨이 주소 (게이트웨이 경유 시)
    pub ingress_address: Option<String>,
    /// 종료 시 그룹을 남겨둘지 여부
    pub keep_environment: bool,
}

impl Environment {
    /// 트래픽 대상 (게이트웨이 주소가 있으면 게이트웨이 경유)
    pub fn traffic_target(&self) -> TrafficTarget {
        match &self.ingress_address {
            Some(address) => TrafficTarget::Gateway {
                address: address.clone(),
                host: self.server.fqdn(),
            },
            None => TrafficTarget::Workload(self.server.clone()),
        }
    }

    /// 수렴 확인에 쓰는 카나리 대상 (서버, 결정 서비스 헬스체크)
    pub fn canaries(&self) -> [Canary; 2] {
        [
            Canary::new(self.traffic_target(), self.port_name.clone()),
            Canary::new(self.decision_health.clone(), self.port_name.clone()),
        ]
    }

    /// 두 그룹을 삭제합니다. 에러는 로그만 남깁니다.
    pub async fn teardown<P: MeshPlatform>(&self, platform: &P) {
        if self.keep_environment {
            info!(
                echo_group = %self.echo_group,
                ratelimit_group = %self.ratelimit_group,
                "keeping test environment"
            );
            return;
        }

        delete_groups(platform, &[&self.echo_group, &self.ratelimit_group]).await;
    }
}

async fn delete_groups<P: MeshPlatform>(platform: &P, groups: &[&WorkloadGroup]) {
    for group in groups.iter().rev() {
        if let Err(e) = platform.delete_workload_group(group).await {
            warn!(group = %group, error = %e, "failed to delete workload group");
        }
    }
}

fn stage_error(stage: &'static str) -> impl FnOnce(HarnessError) -> HarnessError {
    move |e| HarnessError::Provisioning {
        stage: stage.to_owned(),
        reason: e.to_string(),
    }
}

/// 테스트 환경 구성기
pub struct EnvironmentProvisioner<P: MeshPlatform, G: TrafficGenerator> {
    platform: Arc<P>,
    driver: TrafficDriver<G>,
    config: HarnessConfig,
}

impl<P: MeshPlatform, G: TrafficGenerator> EnvironmentProvisioner<P, G> {
    /// 새 구성기를 생성합니다.
    pub fn new(platform: Arc<P>, driver: TrafficDriver<G>, config: HarnessConfig) -> Self {
        Self {
            platform,
            driver,
            config,
        }
    }

    fn workload_specs(&self) -> [WorkloadSpec; 2] {
        [
            WorkloadSpec {
                service: self.config.client_service.clone(),
                role: WorkloadRole::Client,
                ports: Vec::new(),
            },
            WorkloadSpec {
                service: self.config.server_service.clone(),
                role: WorkloadRole::Server,
                ports: vec![WorkloadPort {
                    name: self.config.server_port_name.clone(),
                    protocol: Protocol::Http,
                    service_port: self.config.server_service_port,
                    instance_port: self.config.server_instance_port,
                }],
            },
        ]
    }

    fn template_params(&self, echo_group: &str, ratelimit_group: &str) -> TemplateParams {
        TemplateParams::new(echo_group, ratelimit_group)
            .with_server(&self.config.server_service, self.config.server_service_port)
    }

    /// 템플릿 매니페스트를 렌더링해 `scope`에 적용합니다.
    async fn apply_manifest(
        &self,
        path: &Path,
        params: &TemplateParams,
        scope: &str,
    ) -> Result<(), HarnessError> {
        let text = template::load(path).await?;
        let rendered = params.render(&text)?;
        template::validate_documents(&rendered)?;
        self.platform.apply_config(scope, &rendered).await
    }

    /// 환경을 구성합니다.
    ///
    /// # Errors
    ///
    /// 모든 실패는 `HarnessError::Provisioning`이며, 이미 만든 그룹은 삭제를 시도합니다.
    pub async fn provision(&self) -> Result<Environment, HarnessError> {
        let started = Instant::now();
        let mut created = Vec::new();

        match self.provision_steps(&mut created).await {
            Ok(env) => {
                let elapsed = started.elapsed();
                histogram!(m::PROVISIONING_DURATION_SECONDS).record(elapsed.as_secs_f64());
                info!(
                    echo_group = %env.echo_group,
                    ratelimit_group = %env.ratelimit_group,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "test environment provisioned"
                );
                Ok(env)
            }
            Err(e) => {
                error!(error = %e, groups = created.len(), "provisioning failed, cleaning up");
                let groups: Vec<&WorkloadGroup> = created.iter().collect();
                delete_groups(self.platform.as_ref(), &groups).await;
                Err(e)
            }
        }
    }

    async fn provision_steps(
        &self,
        created: &mut Vec<WorkloadGroup>,
    ) -> Result<Environment, HarnessError> {
        let platform = self.platform.as_ref();

        // 1. 클라이언트/서버 그룹
        let echo_group = platform
            .create_workload_group(&self.config.echo_namespace_prefix, true)
            .await
            .map_err(stage_error("create_echo_group"))?;
        created.push(echo_group.clone());

        // 2. 워크로드 배포
        let specs = self.workload_specs();
        let workloads = platform
            .deploy_workloads(&echo_group, &specs)
            .await
            .map_err(stage_error("deploy_workloads"))?;
        let find = |service: &str| {
            workloads
                .iter()
                .find(|w| w.service == service)
                .cloned()
                .ok_or_else(|| HarnessError::Provisioning {
                    stage: "deploy_workloads".to_owned(),
                    reason: format!("platform did not return workload '{service}'"),
                })
        };
        let client = find(&self.config.client_service)?;
        let server = find(&self.config.server_service)?;

        // 3. 클라이언트/서버 준비 대기
        for spec in &specs {
            self.wait_ready_with_retry(&echo_group.name, &spec.selector())
                .await
                .map_err(stage_error("workload_readiness"))?;
        }

        // 4. 인그레스 게이트웨이 주소
        let ingress_address = if self.config.via_gateway {
            Some(
                platform
                    .ingress_address()
                    .await
                    .map_err(stage_error("ingress_address"))?,
            )
        } else {
            None
        };

        // 5. 결정 서비스 그룹
        let ratelimit_group = platform
            .create_workload_group(&self.config.ratelimit_namespace_prefix, false)
            .await
            .map_err(stage_error("create_ratelimit_group"))?;
        created.push(ratelimit_group.clone());

        let params = self.template_params(&echo_group.name, &ratelimit_group.name);

        // 6. 게이트웨이 라우팅 (게이트웨이 경유 시)
        if ingress_address.is_some() {
            self.apply_manifest(&self.config.ingress_manifest, &params, &echo_group.name)
                .await
                .map_err(stage_error("ingress_routing"))?;
        }

        // 7. 결정 서비스 매니페스트
        self.apply_manifest(&self.config.decision_manifest, &params, &ratelimit_group.name)
            .await
            .map_err(stage_error("decision_manifest"))?;

        // 8. 준비 게이트 (저장소 → 결정 서비스 순서)
        for selector in &self.config.readiness_selectors {
            self.wait_ready_with_retry(&ratelimit_group.name, selector)
                .await
                .map_err(stage_error("readiness_gate"))?;
        }

        let decision_health = TrafficTarget::Endpoint {
            host: format!(
                "{}.{}.svc.cluster.local",
                self.config.decision_service, ratelimit_group.name
            ),
            port: self.config.decision_health_port,
            path: self.config.decision_health_path.clone(),
        };
        let env = Environment {
            echo_group,
            ratelimit_group,
            decision_health,
            client,
            server,
            port_name: self.config.server_port_name.clone(),
            ingress_address,
            keep_environment: self.config.keep_environment,
        };

        // 9. 데이터 경로 수렴 (서버와 결정 서비스 모두)
        convergence::await_convergence(
            &self.config.convergence,
            &self.driver,
            &env.client,
            &env.canaries(),
        )
        .await
        .map_err(stage_error("convergence"))?;

        Ok(env)
    }

    /// 선형 백오프로 준비 상태 대기를 재시도합니다.
    async fn wait_ready_with_retry(&self, scope: &str, selector: &str) -> Result<(), HarnessError> {
        let max_attempts = self.config.readiness_max_attempts;
        let timeout = self.config.readiness_timeout;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let backoff = self.config.readiness_backoff_base * (attempt - 1);
                warn!(
                    scope = scope,
                    selector = selector,
                    attempt = attempt,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "retrying readiness wait"
                );
                tokio::time::sleep(backoff).await;
            }

            match tokio::time::timeout(
                timeout,
                self.platform.wait_until_ready(scope, selector, timeout),
            )
            .await
            {
                Ok(Ok(())) => {
                    info!(scope = scope, selector = selector, "workloads ready");
                    return Ok(());
                }
                Ok(Err(e)) => last_error = Some(e.to_string()),
                Err(_elapsed) => last_error = Some("readiness wait timed out".to_owned()),
            }
        }

        Err(HarnessError::Readiness {
            selector: selector.to_owned(),
            attempts: max_attempts,
            reason: last_error.unwrap_or_else(|| "unknown error".to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::HarnessConfigBuilder;
    use crate::convergence::ConvergenceStrategy;
    use crate::platform::MockPlatform;
    use crate::traffic::MockTrafficGenerator;

    const MANIFEST: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ratelimit-config\n  namespace: {{ .RateLimitNamespace }}\ndata:\n  echo: {{ .EchoNamespace }}\n";
    const ROUTING: &str = "apiVersion: networking.istio.io/v1beta1\nkind: VirtualService\nmetadata:\n  name: ratecheck-route\nspec:\n  hosts:\n    - {{ .ServerService }}.{{ .EchoNamespace }}.svc.cluster.local\n";

    struct Fixture {
        _dir: tempfile::TempDir,
        platform: Arc<MockPlatform>,
        generator: Arc<MockTrafficGenerator>,
        provisioner: EnvironmentProvisioner<MockPlatform, MockTrafficGenerator>,
    }

    fn fixture(
        platform: MockPlatform,
        generator: MockTrafficGenerator,
        configure: impl FnOnce(HarnessConfigBuilder) -> HarnessConfigBuilder,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("ratelimitservice.yaml");
        std::fs::write(&manifest, MANIFEST).unwrap();
        let routing = dir.path().join("ingress_routing.yaml");
        std::fs::write(&routing, ROUTING).unwrap();

        let builder = HarnessConfigBuilder::new()
            .decision_manifest(manifest)
            .ingress_manifest(routing)
            .readiness_retry(3, Duration::from_millis(100))
            .convergence(ConvergenceStrategy::CanaryRounds {
                interval: Duration::from_millis(100),
                timeout: Duration::from_secs(5),
                required_successes: 2,
            });
        let config = configure(builder).build().unwrap();

        let platform = Arc::new(platform);
        let generator = Arc::new(generator);
        let driver = TrafficDriver::new(Arc::clone(&generator), 429, 0, Duration::ZERO);
        let provisioner = EnvironmentProvisioner::new(Arc::clone(&platform), driver, config);
        Fixture {
            _dir: dir,
            platform,
            generator,
            provisioner,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn provision_builds_environment() {
        let f = fixture(
            MockPlatform::new(),
            MockTrafficGenerator::with_status(200),
            |b| b,
        );
        let env = f.provisioner.provision().await.unwrap();

        assert!(env.echo_group.name.starts_with("istio-echo-"));
        assert!(env.echo_group.injection_enabled);
        assert!(env.ratelimit_group.name.starts_with("istio-ratelimit-"));
        assert!(!env.ratelimit_group.injection_enabled);
        assert_eq!(env.client.service, "clt");
        assert_eq!(env.server.service, "srv");
        assert_eq!(env.server.port("http").map(|p| p.instance_port), Some(8888));
        assert_eq!(env.server.port("http").map(|p| p.service_port), Some(80));
        assert!(env.ingress_address.is_none());
        assert!(matches!(env.traffic_target(), TrafficTarget::Workload(_)));
        // 카나리 2개 × 2라운드
        assert_eq!(f.generator.call_count(), 4);
        assert_eq!(f.generator.endpoint_call_count(), 2);
        assert_eq!(
            env.decision_health.to_string(),
            format!(
                "ratelimit.{}.svc.cluster.local:8080/healthcheck",
                env.ratelimit_group.name
            )
        );
        // 게이트웨이 미사용 시 echo 그룹에 라우팅을 적용하지 않음
        assert_eq!(f.platform.count(&format!("apply:{}", env.echo_group.name)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn provision_waits_for_decision_service_health() {
        let f = fixture(
            MockPlatform::new(),
            MockTrafficGenerator::with_status(200).unreachable_endpoint_first(3),
            |b| b,
        );
        f.provisioner.provision().await.unwrap();
        // 실패 3라운드 + 성공 2라운드
        assert_eq!(f.generator.endpoint_call_count(), 5);
        assert_eq!(f.generator.call_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_decision_service_fails_convergence() {
        let f = fixture(
            MockPlatform::new(),
            MockTrafficGenerator::with_status(200).unreachable_endpoint_first(u32::MAX),
            |b| b,
        );
        let err = f.provisioner.provision().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Provisioning { ref stage, ref reason }
                if stage == "convergence" && reason.contains("/healthcheck")
        ));
        assert_eq!(f.platform.count("delete_group:"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn decision_health_follows_config() {
        let f = fixture(
            MockPlatform::new(),
            MockTrafficGenerator::with_status(200),
            |b| b.decision_health("rls", 9090, "/ready"),
        );
        let env = f.provisioner.provision().await.unwrap();
        assert!(matches!(
            env.decision_health,
            TrafficTarget::Endpoint { ref host, port: 9090, ref path }
                if host.starts_with("rls.istio-ratelimit-") && path == "/ready"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn provision_waits_in_order() {
        let f = fixture(
            MockPlatform::new(),
            MockTrafficGenerator::with_status(200),
            |b| b,
        );
        f.provisioner.provision().await.unwrap();

        let waits: Vec<String> = f
            .platform
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("wait:"))
            .collect();
        assert_eq!(
            waits,
            vec!["wait:app=clt", "wait:app=srv", "wait:app=redis", "wait:app=ratelimit"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn provision_applies_decision_manifest_to_ratelimit_group() {
        let f = fixture(
            MockPlatform::new(),
            MockTrafficGenerator::with_status(200),
            |b| b,
        );
        let env = f.provisioner.provision().await.unwrap();
        assert_eq!(
            f.platform.count(&format!("apply:{}", env.ratelimit_group.name)),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn provision_resolves_gateway_when_configured() {
        let f = fixture(
            MockPlatform::new().with_ingress("10.0.0.7"),
            MockTrafficGenerator::with_status(200),
            |b| b.via_gateway(true),
        );
        let env = f.provisioner.provision().await.unwrap();
        assert_eq!(env.ingress_address.as_deref(), Some("10.0.0.7"));
        assert!(matches!(
            env.traffic_target(),
            TrafficTarget::Gateway { ref address, .. } if address == "10.0.0.7"
        ));
        // 라우팅 매니페스트는 echo 그룹, 결정 서비스 매니페스트는 ratelimit 그룹
        assert_eq!(f.platform.count(&format!("apply:{}", env.echo_group.name)), 1);
        assert_eq!(
            f.platform.count(&format!("apply:{}", env.ratelimit_group.name)),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ingress_manifest_is_fatal_in_gateway_mode() {
        let f = fixture(
            MockPlatform::new().with_ingress("10.0.0.7"),
            MockTrafficGenerator::with_status(200),
            |b| b.via_gateway(true).ingress_manifest("/nonexistent/ingress_routing.yaml"),
        );
        let err = f.provisioner.provision().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Provisioning { ref stage, .. } if stage == "ingress_routing"
        ));
        assert_eq!(f.platform.count("delete_group:"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_failure_is_fatal_and_cleans_up() {
        let f = fixture(
            MockPlatform::new().with_never_ready("app=redis"),
            MockTrafficGenerator::with_status(200),
            |b| b,
        );
        let err = f.provisioner.provision().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Provisioning { ref stage, .. } if stage == "readiness_gate"
        ));
        assert_eq!(f.platform.count("wait:app=redis"), 3);
        assert_eq!(f.platform.count("wait:app=ratelimit"), 0);
        assert_eq!(f.platform.count("delete_group:"), 2);
        // 트래픽은 보내지 않음
        assert_eq!(f.generator.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_has_nothing_to_clean_up() {
        let f = fixture(
            MockPlatform::new().with_failing_create(),
            MockTrafficGenerator::with_status(200),
            |b| b,
        );
        let err = f.provisioner.provision().await.unwrap_err();
        assert!(err.to_string().contains("create_echo_group"));
        assert_eq!(f.platform.count("delete_group:"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_failure_deletes_echo_group() {
        let f = fixture(
            MockPlatform::new().with_failing_deploy(),
            MockTrafficGenerator::with_status(200),
            |b| b,
        );
        let err = f.provisioner.provision().await.unwrap_err();
        assert!(err.to_string().contains("deploy_workloads"));
        assert_eq!(f.platform.count("delete_group:istio-echo-"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn convergence_timeout_is_fatal() {
        let f = fixture(
            MockPlatform::new(),
            MockTrafficGenerator::with_status(503),
            |b| b,
        );
        let err = f.provisioner.provision().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Provisioning { ref stage, .. } if stage == "convergence"
        ));
        assert_eq!(f.platform.count("delete_group:"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_manifest_is_fatal() {
        let f = fixture(
            MockPlatform::new(),
            MockTrafficGenerator::with_status(200),
            |b| b.decision_manifest("/nonexistent/ratelimitservice.yaml"),
        );
        let err = f.provisioner.provision().await.unwrap_err();
        assert!(err.to_string().contains("decision_manifest"));
    }

    #[tokio::test]
    async fn teardown_deletes_both_groups() {
        let platform = MockPlatform::new();
        let env = Environment {
            echo_group: WorkloadGroup::new("istio-echo-1", true),
            ratelimit_group: WorkloadGroup::new("istio-ratelimit-1", false),
            decision_health: TrafficTarget::Endpoint {
                host: "ratelimit.istio-ratelimit-1.svc.cluster.local".to_owned(),
                port: 8080,
                path: "/healthcheck".to_owned(),
            },
            client: Workload {
                service: "clt".to_owned(),
                namespace: "istio-echo-1".to_owned(),
                ports: Vec::new(),
            },
            server: Workload {
                service: "srv".to_owned(),
                namespace: "istio-echo-1".to_owned(),
                ports: Vec::new(),
            },
            port_name: "http".to_owned(),
            ingress_address: None,
            keep_environment: false,
        };
        env.teardown(&platform).await;
        assert_eq!(
            platform.calls(),
            vec!["delete_group:istio-ratelimit-1", "delete_group:istio-echo-1"]
        );

        let kept = Environment {
            keep_environment: true,
            ..env
        };
        let platform = MockPlatform::new();
        kept.teardown(&platform).await;
        assert!(platform.calls().is_empty());
    }
}

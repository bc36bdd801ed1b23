//! 하네스 설정
//!
//! [`HarnessConfig`]는 core의 [`RatecheckConfig`]를 하네스가 쓰기 좋은 형태
//! (경로, `Duration`, [`ConvergenceStrategy`])로 펼친 설정입니다.
//! 클러스터 접속 정보는 [`KubectlPlatform`](crate::platform::KubectlPlatform)이 직접 읽습니다.
//!
//! # 사용 예시
//! ```ignore
//! use ratecheck_core::config::RatecheckConfig;
//! use ratecheck_harness::config::HarnessConfig;
//!
//! let core_config = RatecheckConfig::default();
//! let config = HarnessConfig::from_core(&core_config);
//! config.validate()?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use ratecheck_core::config::RatecheckConfig;

use crate::convergence::ConvergenceStrategy;
use crate::error::HarnessError;

/// 하네스 설정
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// 정책 문서가 적용되는 메시 시스템 네임스페이스
    pub system_namespace: String,
    /// 클라이언트/서버 그룹 접두어
    pub echo_namespace_prefix: String,
    /// 결정 서비스 그룹 접두어
    pub ratelimit_namespace_prefix: String,
    /// 클라이언트 서비스 이름
    pub client_service: String,
    /// 서버 서비스 이름
    pub server_service: String,
    /// 서버 포트 이름
    pub server_port_name: String,
    /// 서버 서비스 포트
    pub server_service_port: u16,
    /// 서버 컨테이너 포트
    pub server_instance_port: u16,
    /// 결정 서비스 매니페스트 경로
    pub decision_manifest: PathBuf,
    /// 결정 서비스 이름
    pub decision_service: String,
    /// 결정 서비스 헬스체크 포트
    pub decision_health_port: u16,
    /// 결정 서비스 헬스체크 경로
    pub decision_health_path: String,
    /// 게이트웨이 경유 시 적용할 라우팅 매니페스트 경로
    pub ingress_manifest: PathBuf,
    /// 순서대로 기다릴 준비 상태 셀렉터
    pub readiness_selectors: Vec<String>,
    /// 셀렉터별 최대 시도 횟수
    pub readiness_max_attempts: u32,
    /// 준비 대기 재시도 백오프 기본 간격
    pub readiness_backoff_base: Duration,
    /// 준비 대기 시도 하나의 타임아웃
    pub readiness_timeout: Duration,
    /// 수렴 대기 전략
    pub convergence: ConvergenceStrategy,
    /// 종료 시 그룹을 남겨둘지 여부
    pub keep_environment: bool,
    /// 인그레스 게이트웨이 경유 여부
    pub via_gateway: bool,
    /// 전역 레이트리밋 템플릿
    pub global_template: PathBuf,
    /// 로컬 레이트리밋 템플릿
    pub local_template: PathBuf,
    /// 정책 적용 후 트래픽 전 대기 시간
    pub policy_settle: Duration,
    /// 배치당 요청 수
    pub batch_size: usize,
    /// throttled 상태 코드
    pub throttled_status: u16,
    /// 요청 하나의 타임아웃
    pub request_timeout: Duration,
    /// kubectl 명령 하나의 기본 타임아웃
    pub command_timeout: Duration,
    /// 배치 호출 재시도 횟수
    pub transport_retries: u32,
    /// 배치 재시도 백오프 기본 간격
    pub retry_backoff_base: Duration,
    /// 회수 후 확인 배치 크기 (0이면 비활성)
    pub release_check_batch_size: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::from_core(&RatecheckConfig::default())
    }
}

/// 설정 상한값 상수
const MAX_BATCH_SIZE: usize = 100_000;
const MAX_TRANSPORT_RETRIES: u32 = 10;
const MAX_READINESS_ATTEMPTS: u32 = 30;
const MAX_BACKOFF_BASE: Duration = Duration::from_secs(60);
const MAX_POLICY_SETTLE: Duration = Duration::from_secs(600);
const MAX_CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(1800);
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(3600);
const MAX_READINESS_TIMEOUT: Duration = Duration::from_secs(3600);

impl HarnessConfig {
    /// core 설정에서 하네스 설정을 생성합니다.
    pub fn from_core(core: &RatecheckConfig) -> Self {
        let env = &core.environment;
        let convergence = if env.convergence_mode == "fixed" {
            ConvergenceStrategy::FixedDelay(Duration::from_secs(env.convergence_delay_secs))
        } else {
            ConvergenceStrategy::CanaryRounds {
                interval: Duration::from_millis(env.convergence_interval_ms),
                timeout: Duration::from_secs(env.convergence_timeout_secs),
                required_successes: env.convergence_required_successes,
            }
        };

        Self {
            system_namespace: core.cluster.system_namespace.clone(),
            echo_namespace_prefix: env.echo_namespace_prefix.clone(),
            ratelimit_namespace_prefix: env.ratelimit_namespace_prefix.clone(),
            client_service: env.client_service.clone(),
            server_service: env.server_service.clone(),
            server_port_name: env.server_port_name.clone(),
            server_service_port: env.server_service_port,
            server_instance_port: env.server_instance_port,
            decision_manifest: PathBuf::from(&env.decision_manifest),
            decision_service: env.decision_service.clone(),
            decision_health_port: env.decision_health_port,
            decision_health_path: env.decision_health_path.clone(),
            ingress_manifest: PathBuf::from(&env.ingress_manifest),
            readiness_selectors: env.readiness_selectors.clone(),
            readiness_max_attempts: env.readiness_max_attempts,
            readiness_backoff_base: Duration::from_millis(env.readiness_backoff_base_ms),
            readiness_timeout: Duration::from_secs(env.readiness_timeout_secs),
            convergence,
            keep_environment: env.keep_environment,
            via_gateway: core.traffic.via_gateway,
            global_template: PathBuf::from(&core.policy.global_template),
            local_template: PathBuf::from(&core.policy.local_template),
            policy_settle: Duration::from_secs(core.policy.settle_secs),
            batch_size: core.traffic.batch_size,
            throttled_status: core.traffic.throttled_status,
            request_timeout: Duration::from_millis(core.traffic.request_timeout_ms),
            command_timeout: Duration::from_secs(core.cluster.command_timeout_secs),
            transport_retries: core.traffic.transport_retries,
            retry_backoff_base: Duration::from_millis(core.traffic.retry_backoff_base_ms),
            release_check_batch_size: core.traffic.release_check_batch_size,
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(config_error(
                "batch_size",
                format!("must be 1-{MAX_BATCH_SIZE}"),
            ));
        }

        if self.release_check_batch_size > MAX_BATCH_SIZE {
            return Err(config_error(
                "release_check_batch_size",
                format!("must be 0-{MAX_BATCH_SIZE}"),
            ));
        }

        if self.transport_retries > MAX_TRANSPORT_RETRIES {
            return Err(config_error(
                "transport_retries",
                format!("must be 0-{MAX_TRANSPORT_RETRIES}"),
            ));
        }

        if self.readiness_max_attempts == 0 || self.readiness_max_attempts > MAX_READINESS_ATTEMPTS
        {
            return Err(config_error(
                "readiness_max_attempts",
                format!("must be 1-{MAX_READINESS_ATTEMPTS}"),
            ));
        }

        if self.readiness_backoff_base > MAX_BACKOFF_BASE
            || self.retry_backoff_base > MAX_BACKOFF_BASE
        {
            return Err(config_error(
                "*_backoff_base",
                format!("must be at most {}ms", MAX_BACKOFF_BASE.as_millis()),
            ));
        }

        if self.readiness_timeout.is_zero() || self.readiness_timeout > MAX_READINESS_TIMEOUT {
            return Err(config_error(
                "readiness_timeout",
                format!("must be 1-{}s", MAX_READINESS_TIMEOUT.as_secs()),
            ));
        }

        if self.request_timeout.is_zero() || self.request_timeout > MAX_REQUEST_TIMEOUT {
            return Err(config_error(
                "request_timeout",
                format!("must be 1-{}ms", MAX_REQUEST_TIMEOUT.as_millis()),
            ));
        }

        if self.command_timeout.is_zero() || self.command_timeout > MAX_COMMAND_TIMEOUT {
            return Err(config_error(
                "command_timeout",
                format!("must be 1-{}s", MAX_COMMAND_TIMEOUT.as_secs()),
            ));
        }

        if self.policy_settle > MAX_POLICY_SETTLE {
            return Err(config_error(
                "policy_settle",
                format!("must be at most {}s", MAX_POLICY_SETTLE.as_secs()),
            ));
        }

        if self.server_service_port == 0 {
            return Err(config_error("server_service_port", "must be greater than 0"));
        }

        if self.decision_service.is_empty()
            || self.decision_health_port == 0
            || !self.decision_health_path.starts_with('/')
        {
            return Err(config_error(
                "decision_health",
                "decision service, port and an absolute health path must be set",
            ));
        }

        if self.server_instance_port <= 1024 {
            return Err(config_error(
                "server_instance_port",
                "must be above 1024 so the server runs unprivileged",
            ));
        }

        if self.client_service.is_empty()
            || self.server_service.is_empty()
            || self.client_service == self.server_service
        {
            return Err(config_error(
                "client_service",
                "client and server services must be non-empty and distinct",
            ));
        }

        if self.readiness_selectors.iter().any(|s| s.trim().is_empty()) {
            return Err(config_error(
                "readiness_selectors",
                "selectors must not be empty",
            ));
        }

        match &self.convergence {
            ConvergenceStrategy::FixedDelay(delay) => {
                if *delay > MAX_CONVERGENCE_TIMEOUT {
                    return Err(config_error(
                        "convergence_delay",
                        format!("must be at most {}s", MAX_CONVERGENCE_TIMEOUT.as_secs()),
                    ));
                }
            }
            ConvergenceStrategy::CanaryRounds {
                interval,
                timeout,
                required_successes,
            } => {
                if *required_successes == 0 {
                    return Err(config_error(
                        "convergence_required_successes",
                        "must be greater than 0",
                    ));
                }
                if timeout.is_zero() || *timeout > MAX_CONVERGENCE_TIMEOUT {
                    return Err(config_error(
                        "convergence_timeout",
                        format!("must be 1-{}s", MAX_CONVERGENCE_TIMEOUT.as_secs()),
                    ));
                }
                if interval.is_zero() || interval > timeout {
                    return Err(config_error(
                        "convergence_interval",
                        "must be greater than 0 and not exceed the timeout",
                    ));
                }
            }
        }

        Ok(())
    }
}

fn config_error(field: &str, reason: impl Into<String>) -> HarnessError {
    HarnessError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 하네스 설정 빌더
#[derive(Default)]
pub struct HarnessConfigBuilder {
    config: HarnessConfig,
}

impl HarnessConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 정책 적용 범위를 설정합니다.
    pub fn system_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.system_namespace = namespace.into();
        self
    }

    /// 결정 서비스 매니페스트 경로를 설정합니다.
    pub fn decision_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.decision_manifest = path.into();
        self
    }

    /// 변형별 템플릿 경로를 설정합니다.
    pub fn templates(mut self, global: impl Into<PathBuf>, local: impl Into<PathBuf>) -> Self {
        self.config.global_template = global.into();
        self.config.local_template = local.into();
        self
    }

    /// 준비 상태 셀렉터를 설정합니다.
    pub fn readiness_selectors(mut self, selectors: Vec<String>) -> Self {
        self.config.readiness_selectors = selectors;
        self
    }

    /// 준비 대기 재시도 정책을 설정합니다.
    pub fn readiness_retry(mut self, max_attempts: u32, backoff_base: Duration) -> Self {
        self.config.readiness_max_attempts = max_attempts;
        self.config.readiness_backoff_base = backoff_base;
        self
    }

    /// 수렴 대기 전략을 설정합니다.
    pub fn convergence(mut self, strategy: ConvergenceStrategy) -> Self {
        self.config.convergence = strategy;
        self
    }

    /// 정책 적용 후 대기 시간을 설정합니다.
    pub fn policy_settle(mut self, settle: Duration) -> Self {
        self.config.policy_settle = settle;
        self
    }

    /// 배치 크기를 설정합니다.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// 배치 호출 재시도 정책을 설정합니다.
    pub fn transport_retry(mut self, retries: u32, backoff_base: Duration) -> Self {
        self.config.transport_retries = retries;
        self.config.retry_backoff_base = backoff_base;
        self
    }

    /// 회수 후 확인 배치 크기를 설정합니다.
    pub fn release_check_batch_size(mut self, size: usize) -> Self {
        self.config.release_check_batch_size = size;
        self
    }

    /// 서버 서비스 이름과 포트를 설정합니다.
    pub fn server(mut self, service: impl Into<String>, service_port: u16) -> Self {
        self.config.server_service = service.into();
        self.config.server_service_port = service_port;
        self
    }

    /// 결정 서비스 헬스체크 위치를 설정합니다.
    pub fn decision_health(
        mut self,
        service: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        self.config.decision_service = service.into();
        self.config.decision_health_port = port;
        self.config.decision_health_path = path.into();
        self
    }

    /// 게이트웨이 라우팅 매니페스트 경로를 설정합니다.
    pub fn ingress_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ingress_manifest = path.into();
        self
    }

    /// 인그레스 게이트웨이 경유 여부를 설정합니다.
    pub fn via_gateway(mut self, via_gateway: bool) -> Self {
        self.config.via_gateway = via_gateway;
        self
    }

    /// 종료 시 그룹 보존 여부를 설정합니다.
    pub fn keep_environment(mut self, keep: bool) -> Self {
        self.config.keep_environment = keep;
        self
    }

    /// 설정을 검증하고 `HarnessConfig`를 생성합니다.
    pub fn build(self) -> Result<HarnessConfig, HarnessError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//! 설정 관리: ratecheck.toml 파싱 및 런타임 설정
//!
//! [`RatecheckConfig`]는 하네스 전체 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`RATECHECK_TRAFFIC_BATCH_SIZE=500` 형식)
//! 3. 설정 파일 (`ratecheck.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), ratecheck_core::error::RatecheckError> {
//! use ratecheck_core::config::RatecheckConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = RatecheckConfig::load("ratecheck.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = RatecheckConfig::parse("[traffic]\nbatch_size = 500")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, RatecheckError};

/// ratecheck 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatecheckConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 클러스터 접속 설정
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// 테스트 환경 구성 설정
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// 정책 템플릿 설정
    #[serde(default)]
    pub policy: PolicyConfig,
    /// 트래픽 생성/판정 설정
    #[serde(default)]
    pub traffic: TrafficConfig,
}

impl RatecheckConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RatecheckError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, RatecheckError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RatecheckError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                RatecheckError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, RatecheckError> {
        toml::from_str(toml_str).map_err(|e| {
            RatecheckError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `RATECHECK_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "RATECHECK_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "RATECHECK_GENERAL_LOG_FORMAT");

        // Cluster
        override_string(&mut self.cluster.kubectl_path, "RATECHECK_CLUSTER_KUBECTL_PATH");
        override_string(&mut self.cluster.context, "RATECHECK_CLUSTER_CONTEXT");
        override_string(
            &mut self.cluster.system_namespace,
            "RATECHECK_CLUSTER_SYSTEM_NAMESPACE",
        );
        override_u64(
            &mut self.cluster.command_timeout_secs,
            "RATECHECK_CLUSTER_COMMAND_TIMEOUT_SECS",
        );

        // Environment
        override_string(
            &mut self.environment.echo_namespace_prefix,
            "RATECHECK_ENVIRONMENT_ECHO_NAMESPACE_PREFIX",
        );
        override_string(
            &mut self.environment.ratelimit_namespace_prefix,
            "RATECHECK_ENVIRONMENT_RATELIMIT_NAMESPACE_PREFIX",
        );
        override_string(
            &mut self.environment.client_image,
            "RATECHECK_ENVIRONMENT_CLIENT_IMAGE",
        );
        override_string(
            &mut self.environment.server_image,
            "RATECHECK_ENVIRONMENT_SERVER_IMAGE",
        );
        override_u16(
            &mut self.environment.server_service_port,
            "RATECHECK_ENVIRONMENT_SERVER_SERVICE_PORT",
        );
        override_string(
            &mut self.environment.decision_manifest,
            "RATECHECK_ENVIRONMENT_DECISION_MANIFEST",
        );
        override_string(
            &mut self.environment.decision_service,
            "RATECHECK_ENVIRONMENT_DECISION_SERVICE",
        );
        override_u16(
            &mut self.environment.decision_health_port,
            "RATECHECK_ENVIRONMENT_DECISION_HEALTH_PORT",
        );
        override_string(
            &mut self.environment.decision_health_path,
            "RATECHECK_ENVIRONMENT_DECISION_HEALTH_PATH",
        );
        override_string(
            &mut self.environment.ingress_manifest,
            "RATECHECK_ENVIRONMENT_INGRESS_MANIFEST",
        );
        override_csv(
            &mut self.environment.readiness_selectors,
            "RATECHECK_ENVIRONMENT_READINESS_SELECTORS",
        );
        override_string(
            &mut self.environment.convergence_mode,
            "RATECHECK_ENVIRONMENT_CONVERGENCE_MODE",
        );
        override_u64(
            &mut self.environment.convergence_timeout_secs,
            "RATECHECK_ENVIRONMENT_CONVERGENCE_TIMEOUT_SECS",
        );
        override_bool(
            &mut self.environment.keep_environment,
            "RATECHECK_ENVIRONMENT_KEEP_ENVIRONMENT",
        );

        // Policy
        override_string(
            &mut self.policy.global_template,
            "RATECHECK_POLICY_GLOBAL_TEMPLATE",
        );
        override_string(
            &mut self.policy.local_template,
            "RATECHECK_POLICY_LOCAL_TEMPLATE",
        );
        override_u64(&mut self.policy.settle_secs, "RATECHECK_POLICY_SETTLE_SECS");

        // Traffic
        override_usize(&mut self.traffic.batch_size, "RATECHECK_TRAFFIC_BATCH_SIZE");
        override_u16(
            &mut self.traffic.throttled_status,
            "RATECHECK_TRAFFIC_THROTTLED_STATUS",
        );
        override_u32(
            &mut self.traffic.transport_retries,
            "RATECHECK_TRAFFIC_TRANSPORT_RETRIES",
        );
        override_usize(&mut self.traffic.concurrency, "RATECHECK_TRAFFIC_CONCURRENCY");
        override_bool(&mut self.traffic.via_gateway, "RATECHECK_TRAFFIC_VIA_GATEWAY");
        override_usize(
            &mut self.traffic.release_check_batch_size,
            "RATECHECK_TRAFFIC_RELEASE_CHECK_BATCH_SIZE",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), RatecheckError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.cluster.kubectl_path.is_empty() {
            return Err(invalid("cluster.kubectl_path", "must not be empty"));
        }

        if self.cluster.system_namespace.is_empty() {
            return Err(invalid("cluster.system_namespace", "must not be empty"));
        }

        if self.environment.echo_namespace_prefix.is_empty()
            || self.environment.ratelimit_namespace_prefix.is_empty()
        {
            return Err(invalid(
                "environment.*_namespace_prefix",
                "namespace prefixes must not be empty",
            ));
        }

        if self.environment.echo_namespace_prefix == self.environment.ratelimit_namespace_prefix {
            return Err(invalid(
                "environment.ratelimit_namespace_prefix",
                "must differ from echo_namespace_prefix",
            ));
        }

        if self.environment.server_instance_port <= 1024 {
            return Err(invalid(
                "environment.server_instance_port",
                "must be above 1024 (unprivileged)",
            ));
        }

        if self.environment.server_service_port == 0 {
            return Err(invalid(
                "environment.server_service_port",
                "must be greater than 0",
            ));
        }

        if self.environment.decision_service.is_empty() || self.environment.decision_health_port == 0
        {
            return Err(invalid(
                "environment.decision_service",
                "decision service name and health port must be set",
            ));
        }

        if !self.environment.decision_health_path.starts_with('/') {
            return Err(invalid(
                "environment.decision_health_path",
                "must start with '/'",
            ));
        }

        let valid_modes = ["canary", "fixed"];
        if !valid_modes.contains(&self.environment.convergence_mode.as_str()) {
            return Err(invalid(
                "environment.convergence_mode",
                format!("must be one of: {}", valid_modes.join(", ")),
            ));
        }

        if self.environment.readiness_max_attempts == 0 {
            return Err(invalid(
                "environment.readiness_max_attempts",
                "must be greater than 0",
            ));
        }

        if self.policy.global_template.is_empty() || self.policy.local_template.is_empty() {
            return Err(invalid(
                "policy.*_template",
                "both policy templates must be configured",
            ));
        }

        if self.traffic.batch_size == 0 {
            return Err(invalid("traffic.batch_size", "must be greater than 0"));
        }

        if !(100..=599).contains(&self.traffic.throttled_status) {
            return Err(invalid(
                "traffic.throttled_status",
                "must be a valid HTTP status code (100-599)",
            ));
        }

        if self.traffic.concurrency == 0 {
            return Err(invalid("traffic.concurrency", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> RatecheckError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 클러스터 접속 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// kubectl 실행 파일 경로
    pub kubectl_path: String,
    /// kubeconfig 컨텍스트 (비어있으면 현재 컨텍스트)
    pub context: String,
    /// 메시 시스템 네임스페이스 (정책 문서가 적용되는 범위)
    pub system_namespace: String,
    /// 인그레스 게이트웨이 네임스페이스
    pub ingress_namespace: String,
    /// 인그레스 게이트웨이 서비스 이름
    pub ingress_service: String,
    /// 플랫폼 명령 하나의 최대 실행 시간 (초)
    pub command_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl_path: "kubectl".to_owned(),
            context: String::new(),
            system_namespace: "istio-system".to_owned(),
            ingress_namespace: "istio-system".to_owned(),
            ingress_service: "istio-ingressgateway".to_owned(),
            command_timeout_secs: 120,
        }
    }
}

/// 테스트 환경 구성 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// 클라이언트/서버 네임스페이스 접두어
    pub echo_namespace_prefix: String,
    /// 레이트리밋 서비스 네임스페이스 접두어
    pub ratelimit_namespace_prefix: String,
    /// 클라이언트 서비스 이름
    pub client_service: String,
    /// 서버 서비스 이름
    pub server_service: String,
    /// 서버 포트 이름
    pub server_port_name: String,
    /// 서버 서비스 포트 (정책 템플릿의 인바운드 가상 호스트 이름에 쓰임)
    pub server_service_port: u16,
    /// 서버 컨테이너 포트 (1024 초과)
    pub server_instance_port: u16,
    /// 클라이언트 이미지 (curl 포함)
    pub client_image: String,
    /// 서버 이미지
    pub server_image: String,
    /// 레이트리밋 서비스 + redis 매니페스트 경로
    pub decision_manifest: String,
    /// 결정 서비스 이름 (매니페스트의 Service 이름)
    pub decision_service: String,
    /// 결정 서비스 헬스체크 포트
    pub decision_health_port: u16,
    /// 결정 서비스 헬스체크 경로
    pub decision_health_path: String,
    /// 게이트웨이 경유 시 서버로 가는 Gateway/VirtualService 매니페스트 경로
    pub ingress_manifest: String,
    /// 순서대로 준비 상태를 기다릴 셀렉터
    pub readiness_selectors: Vec<String>,
    /// 셀렉터별 준비 대기 최대 시도 횟수
    pub readiness_max_attempts: u32,
    /// 준비 대기 재시도 백오프 기본 간격 (밀리초)
    pub readiness_backoff_base_ms: u64,
    /// 준비 대기 시도 하나의 타임아웃 (초)
    pub readiness_timeout_secs: u64,
    /// 수렴 대기 방식 (canary, fixed)
    pub convergence_mode: String,
    /// fixed 모드 대기 시간 (초)
    pub convergence_delay_secs: u64,
    /// canary 모드 전체 타임아웃 (초)
    pub convergence_timeout_secs: u64,
    /// 카나리 라운드 간격 (밀리초)
    pub convergence_interval_ms: u64,
    /// 수렴으로 판단할 연속 성공 횟수
    pub convergence_required_successes: u32,
    /// 종료 시 네임스페이스를 남겨둘지 여부
    pub keep_environment: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            echo_namespace_prefix: "istio-echo".to_owned(),
            ratelimit_namespace_prefix: "istio-ratelimit".to_owned(),
            client_service: "clt".to_owned(),
            server_service: "srv".to_owned(),
            server_port_name: "http".to_owned(),
            server_service_port: 80,
            server_instance_port: 8888,
            client_image: "curlimages/curl:8.8.0".to_owned(),
            server_image: "hashicorp/http-echo:1.0".to_owned(),
            decision_manifest: "crates/harness/testdata/ratelimitservice.yaml".to_owned(),
            decision_service: "ratelimit".to_owned(),
            decision_health_port: 8080,
            decision_health_path: "/healthcheck".to_owned(),
            ingress_manifest: "crates/harness/testdata/ingress_routing.yaml".to_owned(),
            readiness_selectors: vec!["app=redis".to_owned(), "app=ratelimit".to_owned()],
            readiness_max_attempts: 5,
            readiness_backoff_base_ms: 2000,
            readiness_timeout_secs: 120,
            convergence_mode: "canary".to_owned(),
            convergence_delay_secs: 60,
            convergence_timeout_secs: 60,
            convergence_interval_ms: 2000,
            convergence_required_successes: 3,
            keep_environment: false,
        }
    }
}

/// 정책 템플릿 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// 전역(외부 결정 서비스) 레이트리밋 템플릿 경로
    pub global_template: String,
    /// 로컬 레이트리밋 템플릿 경로
    pub local_template: String,
    /// 정책 적용 후 트래픽 전 대기 시간 (초)
    pub settle_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            global_template: "crates/harness/testdata/enable_envoy_ratelimit.yaml".to_owned(),
            local_template: "crates/harness/testdata/enable_envoy_local_ratelimit.yaml".to_owned(),
            settle_secs: 5,
        }
    }
}

/// 트래픽 생성/판정 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// 배치당 요청 수
    pub batch_size: usize,
    /// throttled 로 판정할 상태 코드
    pub throttled_status: u16,
    /// 배치 호출 실패 시 재시도 횟수
    pub transport_retries: u32,
    /// 재시도 백오프 기본 간격 (밀리초)
    pub retry_backoff_base_ms: u64,
    /// 요청 하나의 타임아웃 (밀리초)
    pub request_timeout_ms: u64,
    /// 동시 요청 수 (게이트웨이 모드)
    pub concurrency: usize,
    /// 인그레스 게이트웨이를 통해 트래픽을 보낼지 여부
    pub via_gateway: bool,
    /// 정책 회수 후 확인용 배치 크기 (0이면 비활성)
    pub release_check_batch_size: usize,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            batch_size: 300,
            throttled_status: 429,
            transport_retries: 2,
            retry_backoff_base_ms: 500,
            request_timeout_ms: 5000,
            concurrency: 16,
            via_gateway: false,
            release_check_batch_size: 0,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

//! 에러 타입: 단계별 에러 정의
//!
//! [`RatecheckError`]는 하네스의 최상위 에러입니다. 하위 에러는 실패한 단계
//! (설정, 환경 구성, 정책 주입, 트래픽)를 구분하여, 호출자가 치명적 실패와
//! 흡수 가능한 실패를 나눠 처리할 수 있게 합니다.

/// ratecheck 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum RatecheckError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 테스트 환경 구성 에러 (스위트 전체에 치명적)
    #[error("environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// 정책 주입/회수 에러 (해당 시나리오에만 치명적)
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// 트래픽 생성 에러
    #[error("traffic error: {0}")]
    Traffic(#[from] TrafficError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RatecheckError {
    /// 스위트 전체를 중단해야 하는 에러인지 반환합니다.
    pub fn is_fatal_for_suite(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Environment(_))
    }
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 테스트 환경 구성 에러
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    /// 오케스트레이션 플랫폼 호출 실패
    #[error("platform call failed: {0}")]
    Platform(String),

    /// 환경 구성 단계 실패
    #[error("provisioning failed at {stage}: {reason}")]
    Provisioning { stage: String, reason: String },

    /// 준비 상태 대기 실패
    #[error("workloads matching '{selector}' not ready: {reason}")]
    NotReady { selector: String, reason: String },

    /// 데이터 경로 수렴 대기 실패
    #[error("data path did not converge: {0}")]
    Convergence(String),
}

/// 정책 주입/회수 에러
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// 템플릿 로딩 또는 렌더링 실패
    #[error("template error: {0}")]
    Template(String),

    /// 컨트롤 플레인이 문서를 거부함
    #[error("apply rejected: {0}")]
    ApplyRejected(String),

    /// 적용된 문서 삭제 실패
    #[error("retraction failed: {0}")]
    RetractFailed(String),

    /// 다른 정책이 이미 활성 상태
    #[error("policy conflict: {0}")]
    Conflict(String),
}

/// 트래픽 생성 에러
#[derive(Debug, thiserror::Error)]
pub enum TrafficError {
    /// 배치 호출 자체가 실패함
    #[error("batch call failed: {0}")]
    BatchFailed(String),
}

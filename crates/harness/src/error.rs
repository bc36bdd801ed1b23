//! 하네스 에러 타입
//!
//! [`HarnessError`]는 하네스 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<HarnessError> for RatecheckError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use ratecheck_core::error::{
    ConfigError, EnvironmentError, PolicyError, RatecheckError, TrafficError,
};

/// 하네스 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// 오케스트레이션 플랫폼 호출 실패
    #[error("platform error: {0}")]
    Platform(String),

    /// 플랫폼 명령이 제한 시간 안에 끝나지 않음
    #[error("command timed out after {timeout_secs}s: {command}")]
    CommandTimeout {
        /// 실행한 명령
        command: String,
        /// 제한 시간 (초)
        timeout_secs: u64,
    },

    /// 환경 구성 단계 실패
    #[error("provisioning failed at {stage}: {reason}")]
    Provisioning {
        /// 실패한 단계
        stage: String,
        /// 실패 사유
        reason: String,
    },

    /// 재시도 후에도 워크로드가 준비되지 않음
    #[error("workloads '{selector}' not ready after {attempts} attempts: {reason}")]
    Readiness {
        /// 레이블 셀렉터
        selector: String,
        /// 시도 횟수
        attempts: u32,
        /// 마지막 실패 사유
        reason: String,
    },

    /// 데이터 경로가 제한 시간 안에 수렴하지 않음
    #[error("convergence error: {0}")]
    Convergence(String),

    /// 정책 템플릿 파일 로딩 실패
    #[error("policy template error: {path}: {reason}")]
    PolicyTemplate {
        /// 템플릿 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 템플릿 렌더링 실패
    #[error("template render error: {0}")]
    TemplateRender(String),

    /// 컨트롤 플레인이 정책 문서를 거부함
    #[error("policy apply failed: {0}")]
    PolicyApply(String),

    /// 정책 문서 삭제 실패
    #[error("policy retract failed: {0}")]
    PolicyRetract(String),

    /// 다른 정책 문서가 이미 활성 상태
    #[error("policy conflict: '{active}' is active, cannot apply '{requested}'")]
    PolicyConflict {
        /// 활성 정책 변형
        active: String,
        /// 요청된 정책 변형
        requested: String,
    },

    /// 트래픽 배치 호출 실패
    #[error("traffic error: {0}")]
    Traffic(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl HarnessError {
    /// 템플릿 로딩/렌더링 단계의 에러인지 반환합니다.
    ///
    /// 이 경우 플랫폼에는 아무것도 적용되지 않았습니다.
    pub fn is_template_error(&self) -> bool {
        matches!(self, Self::PolicyTemplate { .. } | Self::TemplateRender(_))
    }
}

impl From<HarnessError> for RatecheckError {
    fn from(err: HarnessError) -> Self {
        match err {
            HarnessError::Platform(msg) => {
                RatecheckError::Environment(EnvironmentError::Platform(msg))
            }
            HarnessError::CommandTimeout { .. } => {
                RatecheckError::Environment(EnvironmentError::Platform(err.to_string()))
            }
            HarnessError::Provisioning { stage, reason } => {
                RatecheckError::Environment(EnvironmentError::Provisioning { stage, reason })
            }
            HarnessError::Readiness {
                selector, reason, ..
            } => RatecheckError::Environment(EnvironmentError::NotReady { selector, reason }),
            HarnessError::Convergence(msg) => {
                RatecheckError::Environment(EnvironmentError::Convergence(msg))
            }
            HarnessError::PolicyTemplate { .. } | HarnessError::TemplateRender(_) => {
                RatecheckError::Policy(PolicyError::Template(err.to_string()))
            }
            HarnessError::PolicyApply(msg) => {
                RatecheckError::Policy(PolicyError::ApplyRejected(msg))
            }
            HarnessError::PolicyRetract(msg) => {
                RatecheckError::Policy(PolicyError::RetractFailed(msg))
            }
            HarnessError::PolicyConflict { .. } => {
                RatecheckError::Policy(PolicyError::Conflict(err.to_string()))
            }
            HarnessError::Traffic(msg) => RatecheckError::Traffic(TrafficError::BatchFailed(msg)),
            HarnessError::Config { field, reason } => {
                RatecheckError::Config(ConfigError::InvalidValue { field, reason })
            }
        }
    }
}

//! 도메인 타입: 하네스 전역에서 공유하는 토폴로지/트래픽 타입
//!
//! 워크로드 그룹과 워크로드는 환경 구성 시 한 번 만들어지고 모든 시나리오가
//! 읽기 전용으로 공유합니다. 트래픽 결과 타입은 시나리오 한 번의 범위에서만 쓰입니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 워크로드 그룹 (네임스페이스 단위의 격리 범위)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadGroup {
    /// 고유 이름
    pub name: String,
    /// 메시 사이드카 주입 여부 (아웃바운드 호출이 메시를 거치는지)
    pub injection_enabled: bool,
}

impl WorkloadGroup {
    /// 새 워크로드 그룹을 생성합니다.
    pub fn new(name: impl Into<String>, injection_enabled: bool) -> Self {
        Self {
            name: name.into(),
            injection_enabled,
        }
    }
}

impl fmt::Display for WorkloadGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// 워크로드 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadRole {
    /// 트래픽을 보내는 쪽
    Client,
    /// 트래픽을 받는 쪽
    Server,
}

impl fmt::Display for WorkloadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// 포트 프로토콜 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Grpc,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Grpc => write!(f, "grpc"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// 워크로드의 이름 있는 포트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadPort {
    /// 포트 이름 (예: "http")
    pub name: String,
    /// 프로토콜
    pub protocol: Protocol,
    /// 서비스가 노출하는 포트
    pub service_port: u16,
    /// 컨테이너가 실제로 수신하는 포트
    pub instance_port: u16,
}

/// 워크로드 (이름으로 주소 지정 가능한 서비스 인스턴스)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// 서비스 이름
    pub service: String,
    /// 소속 워크로드 그룹 이름
    pub namespace: String,
    /// 이름 있는 포트 목록
    pub ports: Vec<WorkloadPort>,
}

impl Workload {
    /// 이름으로 포트를 찾습니다.
    pub fn port(&self, name: &str) -> Option<&WorkloadPort> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// 클러스터 내부 FQDN을 반환합니다.
    pub fn fqdn(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.service, self.namespace)
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service)
    }
}

/// 요청 시도 한 건의 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    /// 응답 상태 코드를 받음
    Response { status: u16 },
    /// 응답을 받지 못함
    TransportError(String),
}

impl CallOutcome {
    /// 응답 상태 코드를 반환합니다. 전송 에러면 `None`.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status } => Some(*status),
            Self::TransportError(_) => None,
        }
    }

    /// 2xx 응답인지 반환합니다.
    pub fn is_success(&self) -> bool {
        matches!(self.status(), Some(200..=299))
    }
}

/// 배치 결과 요약 (로그/메트릭용, 판정에는 쓰이지 않음)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// 전체 시도 수
    pub total: usize,
    /// throttled 상태 코드 응답 수
    pub throttled: usize,
    /// 2xx 응답 수
    pub succeeded: usize,
    /// 그 외 상태 코드 응답 수
    pub other_status: usize,
    /// 전송 에러 수
    pub transport_errors: usize,
}

impl BatchSummary {
    /// 결과 목록을 요약합니다.
    pub fn from_outcomes(outcomes: &[CallOutcome], throttled_status: u16) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.status() {
                Some(code) if code == throttled_status => summary.throttled += 1,
                Some(200..=299) => summary.succeeded += 1,
                Some(_) => summary.other_status += 1,
                None => summary.transport_errors += 1,
            }
        }
        summary
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} throttled={} ok={} other={} errors={}",
            self.total, self.throttled, self.succeeded, self.other_status, self.transport_errors
        )
    }
}

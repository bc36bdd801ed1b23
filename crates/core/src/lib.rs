//! # ratecheck-core
//!
//! 메시 레이트리밋 검증 하네스의 공통 기반 크레이트입니다.
//!
//! - [`error`]: 단계별 에러 타입과 최상위 [`RatecheckError`]
//! - [`config`]: `ratecheck.toml` 파싱과 환경변수 오버라이드
//! - [`types`]: 워크로드 토폴로지와 트래픽 결과 타입
//! - [`metrics`]: 메트릭 이름 상수와 설명 등록

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, EnvironmentError, PolicyError, RatecheckError, TrafficError};

// 설정
pub use config::RatecheckConfig;

// 도메인 타입
pub use types::{
    BatchSummary, CallOutcome, Protocol, Workload, WorkloadGroup, WorkloadPort, WorkloadRole,
};

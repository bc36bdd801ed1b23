//! # ratecheck-harness
//!
//! 서비스 메시의 레이트리밋 정책이 실제로 요청을 제한하는지 검증하는 하네스입니다.
//!
//! 스위트 하나는 격리된 테스트 환경을 한 번 구성하고, 정책 변형(global, local)마다
//! 시나리오를 순서대로 실행합니다. 각 시나리오는 정책을 적용하고, 요청 배치를 보내고,
//! 배치 안에 `429 Too Many Requests`가 하나라도 있었는지 판정한 뒤 정책을 회수합니다.
//!
//! # 구성
//!
//! - [`provisioner`]: 워크로드 그룹, 클라이언트/서버, 결정 서비스 구성과 준비 대기
//! - [`injector`]: 정책 템플릿 렌더링, 적용, 회수 (단일 활성 슬롯, 범위 기반 회수)
//! - [`traffic`]: 요청 배치 실행과 throttled 판정
//! - [`convergence`]: 데이터 경로 수렴 대기
//! - [`scenario`]: 시나리오 상태 기계와 스위트 실행
//! - [`platform`]: 오케스트레이션 플랫폼 추상화 (`kubectl` 구현 포함)
//! - [`template`]: `{{ .Name }}` 플레이스홀더 렌더러
//!
//! # 사용 예시
//!
//! ```ignore
//! use std::sync::Arc;
//! use ratecheck_core::config::RatecheckConfig;
//! use ratecheck_harness::{HarnessConfig, KubectlExecTrafficGenerator, KubectlPlatform, PolicyVariant, Suite};
//!
//! let core = RatecheckConfig::load("ratecheck.toml")?;
//! let suite = Suite::new(
//!     HarnessConfig::from_core(&core),
//!     Arc::new(KubectlPlatform::from_config(&core)),
//!     Arc::new(KubectlExecTrafficGenerator::from_config(&core)),
//! );
//! let report = suite.run(&PolicyVariant::all()).await?;
//! assert!(report.all_passed());
//! ```

pub mod config;
pub mod convergence;
pub mod error;
pub mod injector;
pub mod platform;
pub mod provisioner;
pub mod scenario;
pub mod template;
pub mod traffic;

pub use config::{HarnessConfig, HarnessConfigBuilder};
pub use convergence::{Canary, ConvergenceStrategy};
pub use error::HarnessError;
pub use injector::{PolicyDocument, PolicyInjector, PolicyScope, PolicyVariant};
pub use platform::{KubectlPlatform, MeshPlatform, WorkloadSpec};
pub use provisioner::{Environment, EnvironmentProvisioner};
pub use scenario::{
    ScenarioOutcome, ScenarioRunner, ScenarioStage, ScenarioState, ScenarioStatus, Suite,
    SuiteReport,
};
pub use template::TemplateParams;
pub use traffic::{
    HttpTrafficGenerator, KubectlExecTrafficGenerator, RoutedTrafficGenerator, TrafficDriver,
    TrafficGenerator, TrafficTarget, classify,
};

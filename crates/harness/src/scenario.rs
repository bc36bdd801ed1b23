//! 시나리오 실행기
//!
//! 시나리오 하나는 정책 변형 하나에 대한 검증입니다.
//!
//! ```text
//! Idle ──▶ PolicyApplied ──▶ TrafficDriven ──▶ Classified ──▶ Retracted ──▶ Done
//!   │                                                            ▲
//!   ├── 적용 실패 ───────────────────────────────────────────────┘
//!   └── 렌더링 실패 ──▶ Done
//! ```
//!
//! 정책 회수는 [`PolicyInjector::with_policy`]가 보장하므로 트래픽 단계에서 panic 이
//! 나더라도 다음 시나리오는 깨끗한 상태에서 시작합니다.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::counter;
use ratecheck_core::metrics as m;
use ratecheck_core::types::BatchSummary;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::injector::{PolicyInjector, PolicyVariant};
use crate::platform::MeshPlatform;
use crate::provisioner::{Environment, EnvironmentProvisioner};
use crate::traffic::{TrafficDriver, TrafficGenerator, classify};

/// 시나리오 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    /// 시작 전
    Idle,
    /// 정책 적용됨
    PolicyApplied,
    /// 트래픽 배치 완료
    TrafficDriven,
    /// 판정 완료
    Classified,
    /// 정책 회수됨
    Retracted,
    /// 종료
    Done,
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::PolicyApplied => "policy_applied",
            Self::TrafficDriven => "traffic_driven",
            Self::Classified => "classified",
            Self::Retracted => "retracted",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// 시나리오가 중단된 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStage {
    /// 정책 렌더링/적용
    PolicyInjection,
}

impl fmt::Display for ScenarioStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyInjection => f.write_str("policy injection"),
        }
    }
}

/// 시나리오 결과 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// 배치 안에 throttled 응답이 있었음
    Passed,
    /// throttled 응답이 없었음
    Failed {
        /// 실패 메시지
        message: String,
    },
    /// 트래픽을 보내기 전에 중단됨
    Aborted {
        /// 중단된 단계
        stage: ScenarioStage,
        /// 중단 사유
        reason: String,
    },
}

impl ScenarioStatus {
    /// 메트릭 레이블 값
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed { .. } => "failed",
            Self::Aborted { .. } => "aborted",
        }
    }
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("passed"),
            Self::Failed { message } => write!(f, "failed: {message}"),
            Self::Aborted { stage, reason } => write!(f, "aborted during {stage}: {reason}"),
        }
    }
}

/// 시나리오 하나의 결과
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    /// 정책 변형
    pub variant: PolicyVariant,
    /// 결과 상태
    pub status: ScenarioStatus,
    /// 거쳐간 상태 (Idle부터 Done까지)
    pub transitions: Vec<ScenarioState>,
    /// 배치 요약 (배치 호출이 성공한 경우)
    pub summary: Option<BatchSummary>,
    /// 회수 실패 사유 (판정에는 영향 없음)
    pub retract_error: Option<String>,
    /// 회수 후 확인 배치 결과 (`Some(true)`면 더 이상 throttled 되지 않음)
    pub released: Option<bool>,
}

impl ScenarioOutcome {
    /// 통과 여부
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

/// 스위트 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    /// 실행 순서대로의 시나리오 결과
    pub outcomes: Vec<ScenarioOutcome>,
}

impl SuiteReport {
    /// 통과한 시나리오 수
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    /// 실패 또는 중단된 시나리오 수
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    /// 모든 시나리오가 통과했는지 여부
    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }
}

/// 상태 전이 기록
struct Transitions {
    variant: PolicyVariant,
    states: Vec<ScenarioState>,
}

impl Transitions {
    fn new(variant: PolicyVariant) -> Self {
        Self {
            variant,
            states: vec![ScenarioState::Idle],
        }
    }

    fn advance(&mut self, next: ScenarioState) {
        let from = self.states.last().copied().unwrap_or(ScenarioState::Idle);
        info!(variant = %self.variant, from = %from, to = %next, "scenario transition");
        self.states.push(next);
    }
}

/// 트래픽 단계 결과
struct TrafficPhase {
    summary: Option<BatchSummary>,
    verdict: bool,
}

/// 시나리오 실행기
///
/// `&mut self`로 실행되므로 시나리오는 항상 하나씩 순서대로 실행됩니다.
pub struct ScenarioRunner<P: MeshPlatform, G: TrafficGenerator> {
    injector: PolicyInjector<P>,
    driver: TrafficDriver<G>,
    batch_size: usize,
    release_check_batch_size: usize,
    policy_settle: Duration,
}

impl<P: MeshPlatform, G: TrafficGenerator> ScenarioRunner<P, G> {
    /// 새 실행기를 생성합니다.
    pub fn new(injector: PolicyInjector<P>, driver: TrafficDriver<G>, config: &HarnessConfig) -> Self {
        Self {
            injector,
            driver,
            batch_size: config.batch_size,
            release_check_batch_size: config.release_check_batch_size,
            policy_settle: config.policy_settle,
        }
    }

    /// 정책 주입기
    pub fn injector(&self) -> &PolicyInjector<P> {
        &self.injector
    }

    /// 시나리오 하나를 실행합니다.
    ///
    /// 어떤 결과든 [`ScenarioOutcome`]으로 반환하며, 환경 에러가 아닌 한 스위트는 계속됩니다.
    pub async fn run_scenario(&mut self, env: &Environment, variant: PolicyVariant) -> ScenarioOutcome {
        info!(
            variant = %variant,
            echo_group = %env.echo_group,
            ratelimit_group = %env.ratelimit_group,
            batch_size = self.batch_size,
            "starting scenario"
        );

        let mut transitions = Transitions::new(variant);
        let target = env.traffic_target();
        let throttled_status = self.driver.throttled_status();

        let result = {
            let tracker = &mut transitions;
            let driver = &self.driver;
            let batch_size = self.batch_size;
            let settle = self.policy_settle;
            let target = &target;
            self.injector
                .with_policy(
                    variant,
                    &env.echo_group.name,
                    &env.ratelimit_group.name,
                    move |_document| async move {
                        tracker.advance(ScenarioState::PolicyApplied);
                        if !settle.is_zero() {
                            tokio::time::sleep(settle).await;
                        }

                        let outcomes = driver
                            .drive_batch(&env.client, target, &env.port_name, batch_size)
                            .await;
                        tracker.advance(ScenarioState::TrafficDriven);

                        let summary = outcomes
                            .as_deref()
                            .map(|o| BatchSummary::from_outcomes(o, throttled_status));
                        let verdict = outcomes
                            .as_deref()
                            .is_some_and(|o| classify(o, throttled_status));
                        tracker.advance(ScenarioState::Classified);

                        TrafficPhase { summary, verdict }
                    },
                )
                .await
        };

        let mut summary = None;
        let mut retract_error = None;
        let mut released = None;

        let status = match result {
            Ok(scope) => {
                transitions.advance(ScenarioState::Retracted);
                summary = scope.value.summary;
                retract_error = scope.retraction.err().map(|e| e.to_string());
                if self.release_check_batch_size > 0 {
                    released = Some(self.release_check(env, variant).await);
                }

                if scope.value.verdict {
                    ScenarioStatus::Passed
                } else {
                    ScenarioStatus::Failed {
                        message: format!(
                            "no request received {throttled_status} Too Many Requests in a batch of {}",
                            self.batch_size
                        ),
                    }
                }
            }
            Err(e) => {
                // 렌더링 실패는 플랫폼에 아무것도 적용하지 않았음
                if !e.is_template_error() {
                    transitions.advance(ScenarioState::Retracted);
                }
                error!(variant = %variant, error = %e, "scenario aborted during policy injection");
                ScenarioStatus::Aborted {
                    stage: ScenarioStage::PolicyInjection,
                    reason: e.to_string(),
                }
            }
        };
        transitions.advance(ScenarioState::Done);

        counter!(
            m::SCENARIOS_TOTAL,
            m::LABEL_VARIANT => variant.name(),
            m::LABEL_RESULT => status.label()
        )
        .increment(1);

        match &status {
            ScenarioStatus::Passed => info!(variant = %variant, "scenario passed"),
            other => warn!(variant = %variant, status = %other, "scenario did not pass"),
        }

        ScenarioOutcome {
            variant,
            status,
            transitions: transitions.states,
            summary,
            retract_error,
            released,
        }
    }

    /// 회수 후 배치를 보내 더 이상 throttled 되지 않는지 확인합니다.
    async fn release_check(&self, env: &Environment, variant: PolicyVariant) -> bool {
        if !self.policy_settle.is_zero() {
            tokio::time::sleep(self.policy_settle).await;
        }
        let throttled = self
            .driver
            .drive_and_classify(
                &env.client,
                &env.traffic_target(),
                &env.port_name,
                self.release_check_batch_size,
            )
            .await;
        if throttled {
            warn!(variant = %variant, "requests still throttled after retraction");
        } else {
            info!(variant = %variant, "throttling released after retraction");
        }
        !throttled
    }

    /// 변형들을 순서대로 실행합니다. 실패한 시나리오가 있어도 다음 시나리오는 실행됩니다.
    pub async fn run_suite(&mut self, env: &Environment, variants: &[PolicyVariant]) -> SuiteReport {
        let mut report = SuiteReport::default();
        for &variant in variants {
            let outcome = self.run_scenario(env, variant).await;
            report.outcomes.push(outcome);
        }
        info!(
            scenarios = report.outcomes.len(),
            passed = report.passed(),
            failed = report.failed(),
            "suite completed"
        );
        report
    }
}

/// 환경 구성부터 정리까지의 스위트 전체
pub struct Suite<P: MeshPlatform, G: TrafficGenerator> {
    config: HarnessConfig,
    platform: Arc<P>,
    generator: Arc<G>,
}

impl<P: MeshPlatform, G: TrafficGenerator> Suite<P, G> {
    /// 새 스위트를 생성합니다.
    pub fn new(config: HarnessConfig, platform: Arc<P>, generator: Arc<G>) -> Self {
        Self {
            config,
            platform,
            generator,
        }
    }

    /// 스위트를 실행합니다.
    ///
    /// # Errors
    ///
    /// 설정이 잘못되었거나 환경 구성이 실패하면 시나리오를 실행하지 않고 에러를 반환합니다.
    pub async fn run(&self, variants: &[PolicyVariant]) -> Result<SuiteReport, HarnessError> {
        self.config.validate()?;

        let driver = TrafficDriver::new(
            Arc::clone(&self.generator),
            self.config.throttled_status,
            self.config.transport_retries,
            self.config.retry_backoff_base,
        );
        let provisioner = EnvironmentProvisioner::new(
            Arc::clone(&self.platform),
            driver.clone(),
            self.config.clone(),
        );
        let env = provisioner.provision().await?;

        let injector = PolicyInjector::from_config(Arc::clone(&self.platform), &self.config);
        let mut runner = ScenarioRunner::new(injector, driver, &self.config);

        let report = AssertUnwindSafe(runner.run_suite(&env, variants))
            .catch_unwind()
            .await;
        env.teardown(self.platform.as_ref()).await;

        match report {
            Ok(report) => Ok(report),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

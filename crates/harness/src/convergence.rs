//! 데이터 경로 수렴 대기
//!
//! 결정 서비스 파드가 준비된 뒤에도 사이드카 설정 전파와 서비스 엔드포인트 등록에는
//! 시간이 걸립니다. [`ConvergenceStrategy::CanaryRounds`]는 모든 [`Canary`] 대상(서버와
//! 결정 서비스 헬스체크)이 한 라운드 안에서 모두 2xx를 돌려주는 일이 연속으로
//! 일어날 때까지 기다리고, [`ConvergenceStrategy::FixedDelay`]는 고정 시간만큼 기다립니다.

use std::time::Duration;

use metrics::histogram;
use ratecheck_core::metrics as m;
use ratecheck_core::types::Workload;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::HarnessError;
use crate::traffic::{TrafficDriver, TrafficGenerator, TrafficTarget};

/// 수렴 대기 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStrategy {
    /// 고정 시간 대기
    FixedDelay(Duration),
    /// 카나리 라운드가 `required_successes`번 연속 성공할 때까지 대기
    CanaryRounds {
        /// 카나리 요청 간격
        interval: Duration,
        /// 전체 제한 시간
        timeout: Duration,
        /// 필요한 연속 성공 라운드 수
        required_successes: u32,
    },
}

/// 수렴 확인용 카나리 요청 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canary {
    /// 요청 대상
    pub target: TrafficTarget,
    /// 워크로드 대상일 때 사용할 포트 이름
    pub port_name: String,
}

impl Canary {
    /// 새 카나리 대상을 만듭니다.
    pub fn new(target: TrafficTarget, port_name: impl Into<String>) -> Self {
        Self {
            target,
            port_name: port_name.into(),
        }
    }
}

impl Default for ConvergenceStrategy {
    fn default() -> Self {
        Self::CanaryRounds {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
            required_successes: 3,
        }
    }
}

/// 전략에 따라 데이터 경로 수렴을 기다리고, 걸린 시간을 반환합니다.
///
/// # Errors
///
/// `CanaryRounds`가 제한 시간 안에 연속 성공을 관측하지 못하면 `HarnessError::Convergence`.
pub async fn await_convergence<G: TrafficGenerator>(
    strategy: &ConvergenceStrategy,
    driver: &TrafficDriver<G>,
    client: &Workload,
    canaries: &[Canary],
) -> Result<Duration, HarnessError> {
    let started = Instant::now();

    match *strategy {
        ConvergenceStrategy::FixedDelay(delay) => {
            info!(delay_secs = delay.as_secs(), "waiting fixed delay for convergence");
            tokio::time::sleep(delay).await;
        }
        ConvergenceStrategy::CanaryRounds {
            interval,
            timeout,
            required_successes,
        } => {
            info!(
                interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                timeout_secs = timeout.as_secs(),
                required_successes = required_successes,
                canaries = canaries.len(),
                "sending canary rounds until data path converges"
            );
            let rounds = run_canary_rounds(driver, client, canaries, interval, required_successes);
            tokio::time::timeout(timeout, rounds).await.map_err(|_| {
                let targets: Vec<String> = canaries.iter().map(|c| c.target.to_string()).collect();
                HarnessError::Convergence(format!(
                    "no {required_successes} consecutive successful canary rounds to [{}] within {}s",
                    targets.join(", "),
                    timeout.as_secs()
                ))
            })?;
        }
    }

    let elapsed = started.elapsed();
    histogram!(m::CONVERGENCE_WAIT_SECONDS).record(elapsed.as_secs_f64());
    info!(
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "data path converged"
    );
    Ok(elapsed)
}

async fn run_canary_rounds<G: TrafficGenerator>(
    driver: &TrafficDriver<G>,
    client: &Workload,
    canaries: &[Canary],
    interval: Duration,
    required_successes: u32,
) {
    let mut consecutive = 0u32;
    let mut rounds = 0u32;

    loop {
        rounds += 1;
        let mut round_ok = true;
        for canary in canaries {
            if !canary_succeeds(driver, client, canary, rounds).await {
                round_ok = false;
            }
        }

        if round_ok {
            consecutive += 1;
        } else {
            consecutive = 0;
        }

        if consecutive >= required_successes {
            debug!(rounds = rounds, "canary requests stable");
            return;
        }

        tokio::time::sleep(interval).await;
    }
}

async fn canary_succeeds<G: TrafficGenerator>(
    driver: &TrafficDriver<G>,
    client: &Workload,
    canary: &Canary,
    round: u32,
) -> bool {
    match driver.drive(client, &canary.target, &canary.port_name, 1).await {
        Ok(outcomes) if !outcomes.is_empty() && outcomes.iter().all(|o| o.is_success()) => true,
        Ok(outcomes) => {
            debug!(
                round = round,
                destination = %canary.target,
                outcomes = ?outcomes,
                "canary request not successful"
            );
            false
        }
        Err(e) => {
            debug!(round = round, destination = %canary.target, error = %e, "canary request failed");
            false
        }
    }
}

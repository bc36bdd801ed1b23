//! 메트릭 상수 및 설명 등록
//!
//! 하네스가 기록하는 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::histogram!()`
//! 매크로를 호출합니다. 레코더 설치는 임베딩하는 쪽의 책임입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `ratecheck_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(ratecheck_core::metrics::TRAFFIC_REQUESTS_TOTAL).increment(300);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 정책 변형 레이블 키 (global, local)
pub const LABEL_VARIANT: &str = "variant";

/// 결과 레이블 키 (passed, failed, aborted)
pub const LABEL_RESULT: &str = "result";

// ─── 시나리오 메트릭 ────────────────────────────────────────────────

/// 완료된 시나리오 수 (counter, label: variant, result)
pub const SCENARIOS_TOTAL: &str = "ratecheck_scenarios_total";

/// 정책 적용 실패 수 (counter, label: variant)
pub const POLICY_APPLY_FAILURES_TOTAL: &str = "ratecheck_policy_apply_failures_total";

/// 정책 회수 실패 수 (counter, label: variant)
pub const POLICY_RETRACT_FAILURES_TOTAL: &str = "ratecheck_policy_retract_failures_total";

// ─── 트래픽 메트릭 ──────────────────────────────────────────────────

/// 보낸 요청 수 (counter)
pub const TRAFFIC_REQUESTS_TOTAL: &str = "ratecheck_traffic_requests_total";

/// throttled 응답 수 (counter)
pub const TRAFFIC_THROTTLED_TOTAL: &str = "ratecheck_traffic_throttled_total";

/// 응답을 받지 못한 요청 수 (counter)
pub const TRAFFIC_TRANSPORT_ERRORS_TOTAL: &str = "ratecheck_traffic_transport_errors_total";

// ─── 환경 구성 메트릭 ───────────────────────────────────────────────

/// 환경 구성 전체 소요 시간 (histogram, 초)
pub const PROVISIONING_DURATION_SECONDS: &str = "ratecheck_provisioning_duration_seconds";

/// 데이터 경로 수렴 대기 시간 (histogram, 초)
pub const CONVERGENCE_WAIT_SECONDS: &str = "ratecheck_convergence_wait_seconds";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        SCENARIOS_TOTAL,
        "Total rate-limit scenarios completed, by variant and result"
    );
    describe_counter!(
        POLICY_APPLY_FAILURES_TOTAL,
        "Total policy documents rejected by the control plane"
    );
    describe_counter!(
        POLICY_RETRACT_FAILURES_TOTAL,
        "Total policy retractions that failed"
    );

    describe_counter!(TRAFFIC_REQUESTS_TOTAL, "Total requests sent to the server");
    describe_counter!(
        TRAFFIC_THROTTLED_TOTAL,
        "Total responses carrying the throttled status code"
    );
    describe_counter!(
        TRAFFIC_TRANSPORT_ERRORS_TOTAL,
        "Total requests that received no response"
    );

    describe_histogram!(
        PROVISIONING_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent provisioning the test environment"
    );
    describe_histogram!(
        CONVERGENCE_WAIT_SECONDS,
        metrics::Unit::Seconds,
        "Time spent waiting for the data path to converge"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        SCENARIOS_TOTAL,
        POLICY_APPLY_FAILURES_TOTAL,
        POLICY_RETRACT_FAILURES_TOTAL,
        TRAFFIC_REQUESTS_TOTAL,
        TRAFFIC_THROTTLED_TOTAL,
        TRAFFIC_TRANSPORT_ERRORS_TOTAL,
        PROVISIONING_DURATION_SECONDS,
        CONVERGENCE_WAIT_SECONDS,
    ];

    #[test]
    fn all_metrics_start_with_ratecheck_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("ratecheck_"),
                "Metric '{}' does not start with 'ratecheck_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_and_histograms_use_suffix_convention() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.ends_with("_total") || name.ends_with("_seconds"),
                "Metric '{}' has no unit suffix",
                name
            );
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더가 없어도 panic 하지 않아야 함
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_VARIANT, LABEL_RESULT] {
            assert_eq!(label.to_lowercase(), label);
        }
    }
}

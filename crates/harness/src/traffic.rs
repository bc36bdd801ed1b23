//! 트래픽 생성과 판정
//!
//! [`TrafficDriver`]는 클라이언트에서 서버로 요청 배치를 보내고, [`classify`]로
//! 배치 안에 throttled 응답이 하나라도 있었는지 판정합니다.
//!
//! 배치 호출 자체가 실패하면(예: exec 실패) 설정된 횟수만큼 재시도한 뒤
//! 판정을 `false`로 흡수합니다. 배치 안의 개별 요청 실패는 재시도하지 않습니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use ratecheck_core::config::RatecheckConfig;
use ratecheck_core::metrics as m;
use ratecheck_core::types::{BatchSummary, CallOutcome, Workload};
use tracing::{debug, info, warn};

use crate::error::HarnessError;
use crate::platform::Kubectl;

/// 요청을 보낼 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficTarget {
    /// 메시 내부 서버 워크로드 (클라이언트 사이드카를 거침)
    Workload(Workload),
    /// 인그레스 게이트웨이 (Host 헤더로 서버 지정)
    Gateway {
        /// 게이트웨이 주소
        address: String,
        /// Host 헤더 값
        host: String,
    },
    /// 이름으로 찾는 클러스터 내부 HTTP 엔드포인트 (결정 서비스 헬스체크 등)
    Endpoint {
        /// 호스트 이름
        host: String,
        /// 포트
        port: u16,
        /// 요청 경로 (`/`로 시작)
        path: String,
    },
}

impl TrafficTarget {
    /// 요청 URL을 만듭니다.
    pub fn url(&self, port_name: &str) -> Result<String, HarnessError> {
        match self {
            Self::Workload(server) => {
                let port = server.port(port_name).ok_or_else(|| {
                    HarnessError::Traffic(format!("workload {server} has no port '{port_name}'"))
                })?;
                Ok(format!("http://{}:{}/", server.fqdn(), port.service_port))
            }
            Self::Gateway { address, .. } => Ok(format!("http://{address}/")),
            Self::Endpoint { host, port, path } => Ok(format!("http://{host}:{port}{path}")),
        }
    }

    /// Host 헤더 값 (게이트웨이 경유일 때만)
    pub fn host_header(&self) -> Option<&str> {
        match self {
            Self::Workload(_) | Self::Endpoint { .. } => None,
            Self::Gateway { host, .. } => Some(host),
        }
    }
}

impl std::fmt::Display for TrafficTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workload(server) => write!(f, "{server}"),
            Self::Gateway { address, host } => write!(f, "gateway {address} (host {host})"),
            Self::Endpoint { host, port, path } => write!(f, "{host}:{port}{path}"),
        }
    }
}

/// 요청 배치를 실제로 보내는 트래픽 생성기
///
/// `call`은 `count`개의 요청 결과를 모두 모은 뒤 반환합니다. 개별 요청 실패는
/// [`CallOutcome::TransportError`]로 담고, 배치 전체를 보낼 수 없을 때만 `Err`를 반환합니다.
pub trait TrafficGenerator: Send + Sync + 'static {
    /// `client`에서 `target`의 `port_name` 포트로 `count`개의 요청을 보냅니다.
    fn call(
        &self,
        client: &Workload,
        target: &TrafficTarget,
        port_name: &str,
        count: usize,
    ) -> impl Future<Output = Result<Vec<CallOutcome>, HarnessError>> + Send;
}

/// 배치 안에 throttled 응답이 하나라도 있는지 판정합니다.
pub fn classify(outcomes: &[CallOutcome], throttled_status: u16) -> bool {
    outcomes
        .iter()
        .any(|outcome| outcome.status() == Some(throttled_status))
}

/// 트래픽 배치 실행기
pub struct TrafficDriver<G: TrafficGenerator> {
    generator: Arc<G>,
    throttled_status: u16,
    transport_retries: u32,
    retry_backoff_base: Duration,
}

impl<G: TrafficGenerator> Clone for TrafficDriver<G> {
    fn clone(&self) -> Self {
        Self {
            generator: Arc::clone(&self.generator),
            throttled_status: self.throttled_status,
            transport_retries: self.transport_retries,
            retry_backoff_base: self.retry_backoff_base,
        }
    }
}

impl<G: TrafficGenerator> TrafficDriver<G> {
    /// 새 실행기를 생성합니다.
    pub fn new(
        generator: Arc<G>,
        throttled_status: u16,
        transport_retries: u32,
        retry_backoff_base: Duration,
    ) -> Self {
        Self {
            generator,
            throttled_status,
            transport_retries,
            retry_backoff_base,
        }
    }

    /// throttled 상태 코드
    pub fn throttled_status(&self) -> u16 {
        self.throttled_status
    }

    /// 배치 한 번을 재시도 없이 보냅니다.
    pub async fn drive(
        &self,
        client: &Workload,
        target: &TrafficTarget,
        port_name: &str,
        count: usize,
    ) -> Result<Vec<CallOutcome>, HarnessError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.generator.call(client, target, port_name, count).await
    }

    /// 배치를 보내고, 호출 자체가 실패하면 재시도합니다.
    ///
    /// 모든 시도가 실패하면 `None`을 반환합니다.
    pub async fn drive_batch(
        &self,
        client: &Workload,
        target: &TrafficTarget,
        port_name: &str,
        batch_size: usize,
    ) -> Option<Vec<CallOutcome>> {
        if batch_size == 0 {
            debug!("empty batch requested, nothing to send");
            return Some(Vec::new());
        }

        let mut last_error = None;

        for attempt in 0..=self.transport_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_base * attempt;
                warn!(
                    destination = %target,
                    attempt = attempt,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "retrying traffic batch"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.drive(client, target, port_name, batch_size).await {
                Ok(outcomes) => {
                    self.record(&outcomes, target);
                    return Some(outcomes);
                }
                Err(e) => last_error = Some(e),
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        warn!(
            destination = %target,
            batch_size = batch_size,
            error = %reason,
            "traffic batch failed after retries, treating as not throttled"
        );
        None
    }

    /// 배치를 보내고 throttled 응답이 있었는지 판정합니다.
    ///
    /// 배치 호출이 끝내 실패하면 `false`입니다.
    pub async fn drive_and_classify(
        &self,
        client: &Workload,
        target: &TrafficTarget,
        port_name: &str,
        batch_size: usize,
    ) -> bool {
        self.drive_batch(client, target, port_name, batch_size)
            .await
            .is_some_and(|outcomes| classify(&outcomes, self.throttled_status))
    }

    fn record(&self, outcomes: &[CallOutcome], target: &TrafficTarget) {
        let summary = BatchSummary::from_outcomes(outcomes, self.throttled_status);
        counter!(m::TRAFFIC_REQUESTS_TOTAL).increment(summary.total as u64);
        counter!(m::TRAFFIC_THROTTLED_TOTAL).increment(summary.throttled as u64);
        counter!(m::TRAFFIC_TRANSPORT_ERRORS_TOTAL).increment(summary.transport_errors as u64);
        info!(destination = %target, summary = %summary, "traffic batch completed");
    }
}

/// 클라이언트 파드 안에서 curl 루프를 실행하는 트래픽 생성기
///
/// 사이드카를 거친 실제 메시 경로로 요청이 나가므로 기본 생성기입니다.
pub struct KubectlExecTrafficGenerator {
    kubectl: Kubectl,
    request_timeout: Duration,
}

impl KubectlExecTrafficGenerator {
    /// 설정에서 생성기를 만듭니다.
    pub fn from_config(config: &RatecheckConfig) -> Self {
        Self {
            kubectl: Kubectl::from_config(config),
            request_timeout: Duration::from_millis(config.traffic.request_timeout_ms),
        }
    }

    fn script(&self, url: &str, host: Option<&str>, count: usize) -> String {
        let max_time = self.request_timeout.as_secs_f64().max(0.1);
        let host_arg = host
            .map(|h| format!(" -H 'Host: {h}'"))
            .unwrap_or_default();
        format!(
            "for i in $(seq 1 {count}); do \
             curl -s -o /dev/null -w '%{{http_code}}\\n' --max-time {max_time}{host_arg} '{url}' || true; \
             done"
        )
    }
}

/// exec 한 번의 제한 시간: 명령 타임아웃 + 요청 타임아웃 × 요청 수
fn exec_time_limit(
    command_timeout: Duration,
    request_timeout: Duration,
    count: usize,
) -> Result<Duration, HarnessError> {
    u32::try_from(count)
        .ok()
        .and_then(|n| request_timeout.checked_mul(n))
        .map(|requests| command_timeout.saturating_add(requests))
        .ok_or_else(|| {
            HarnessError::Traffic(format!(
                "time limit for a batch of {count} requests overflows"
            ))
        })
}

/// curl 출력(한 줄에 상태 코드 하나)을 결과 목록으로 바꿉니다.
fn parse_status_lines(output: &str) -> Vec<CallOutcome> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.parse::<u16>() {
            Ok(0) => CallOutcome::TransportError("no response".to_owned()),
            Ok(status) => CallOutcome::Response { status },
            Err(_) => CallOutcome::TransportError(format!("unparseable status line '{line}'")),
        })
        .collect()
}

impl TrafficGenerator for KubectlExecTrafficGenerator {
    async fn call(
        &self,
        client: &Workload,
        target: &TrafficTarget,
        port_name: &str,
        count: usize,
    ) -> Result<Vec<CallOutcome>, HarnessError> {
        let url = target.url(port_name)?;
        let script = self.script(&url, target.host_header(), count);
        let deployment = format!("deploy/{}", client.service);
        let limit = exec_time_limit(self.kubectl.command_timeout(), self.request_timeout, count)?;

        let output = self
            .kubectl
            .run_bounded(
                &[
                    "exec",
                    "-n",
                    &client.namespace,
                    &deployment,
                    "-c",
                    &client.service,
                    "--",
                    "sh",
                    "-c",
                    &script,
                ],
                None,
                limit,
            )
            .await
            .map_err(|e| HarnessError::Traffic(e.to_string()))?;

        let outcomes = parse_status_lines(&output);
        if outcomes.len() != count {
            warn!(
                client = %client,
                expected = count,
                received = outcomes.len(),
                "curl loop returned unexpected number of results"
            );
        }
        Ok(outcomes)
    }
}

/// 하네스 프로세스에서 직접 HTTP 요청을 보내는 트래픽 생성기
///
/// 인그레스 게이트웨이 경유 시나리오에 씁니다. 동시 요청 수는 `concurrency`로 제한됩니다.
pub struct HttpTrafficGenerator {
    client: reqwest::Client,
    concurrency: usize,
}

impl HttpTrafficGenerator {
    /// 설정에서 생성기를 만듭니다.
    pub fn from_config(config: &RatecheckConfig) -> Result<Self, HarnessError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.traffic.request_timeout_ms))
            .build()
            .map_err(|e| HarnessError::Traffic(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            concurrency: config.traffic.concurrency.max(1),
        })
    }
}

impl TrafficGenerator for HttpTrafficGenerator {
    async fn call(
        &self,
        _client: &Workload,
        target: &TrafficTarget,
        port_name: &str,
        count: usize,
    ) -> Result<Vec<CallOutcome>, HarnessError> {
        let url = target.url(port_name)?;
        let host = target.host_header().map(str::to_owned);

        let outcomes = futures::stream::iter(0..count)
            .map(|_| {
                let mut request = self.client.get(&url);
                if let Some(host) = &host {
                    request = request.header(reqwest::header::HOST, host);
                }
                async move {
                    match request.send().await {
                        Ok(response) => CallOutcome::Response {
                            status: response.status().as_u16(),
                        },
                        Err(e) => CallOutcome::TransportError(e.to_string()),
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(outcomes)
    }
}

/// 대상 종류에 따라 생성기를 고르는 트래픽 생성기
///
/// 게이트웨이 대상은 `edge`(하네스 프로세스에서 직접)로, 워크로드와 엔드포인트
/// 대상은 `mesh`(클라이언트 파드 안에서)로 보냅니다. 클러스터 내부 이름은
/// 메시 안에서만 해석됩니다.
pub struct RoutedTrafficGenerator<E: TrafficGenerator, M: TrafficGenerator> {
    edge: E,
    mesh: M,
}

impl<E: TrafficGenerator, M: TrafficGenerator> RoutedTrafficGenerator<E, M> {
    /// 새 생성기를 만듭니다.
    pub fn new(edge: E, mesh: M) -> Self {
        Self { edge, mesh }
    }
}

impl<E: TrafficGenerator, M: TrafficGenerator> TrafficGenerator for RoutedTrafficGenerator<E, M> {
    async fn call(
        &self,
        client: &Workload,
        target: &TrafficTarget,
        port_name: &str,
        count: usize,
    ) -> Result<Vec<CallOutcome>, HarnessError> {
        match target {
            TrafficTarget::Gateway { .. } => {
                self.edge.call(client, target, port_name, count).await
            }
            TrafficTarget::Workload(_) | TrafficTarget::Endpoint { .. } => {
                self.mesh.call(client, target, port_name, count).await
            }
        }
    }
}

/// 테스트용 Mock 트래픽 생성기
///
/// 앞의 `failures`번 호출은 실패하고, `script`가 남아 있으면 호출마다 앞에서 하나씩
/// 꺼낸 상태 코드를, 그 뒤에는 `outcomes`를 반환합니다. 엔드포인트 대상 호출은
/// `unreachable_endpoint_calls`번까지 응답을 받지 못합니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockTrafficGenerator {
    /// 성공 시 반환할 결과 (요청 수만큼 순환)
    pub outcomes: Vec<CallOutcome>,
    /// 호출별 상태 코드 순서
    pub script: std::sync::Mutex<std::collections::VecDeque<u16>>,
    /// 실패시킬 호출 수
    pub failures: std::sync::atomic::AtomicU32,
    /// 응답하지 않을 엔드포인트 호출 수
    pub unreachable_endpoint_calls: std::sync::atomic::AtomicU32,
    /// 전체 호출 수
    pub calls: std::sync::atomic::AtomicU32,
    /// 엔드포인트 대상 호출 수
    pub endpoint_calls: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl MockTrafficGenerator {
    /// 모든 요청이 주어진 상태 코드를 받는 생성기를 만듭니다.
    pub fn with_status(status: u16) -> Self {
        Self {
            outcomes: vec![CallOutcome::Response { status }],
            ..Self::default()
        }
    }

    /// 결과 패턴을 지정합니다.
    pub fn with_outcomes(outcomes: Vec<CallOutcome>) -> Self {
        Self {
            outcomes,
            ..Self::default()
        }
    }

    /// 호출마다 순서대로 쓸 상태 코드를 지정합니다.
    pub fn with_script(self, statuses: Vec<u16>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(statuses);
        }
        self
    }

    /// 앞의 `n`번 호출이 실패하도록 설정합니다.
    pub fn failing_first(self, n: u32) -> Self {
        self.failures.store(n, std::sync::atomic::Ordering::SeqCst);
        self
    }

    /// 엔드포인트 대상 호출 `n`번이 응답을 받지 못하도록 설정합니다.
    pub fn unreachable_endpoint_first(self, n: u32) -> Self {
        self.unreachable_endpoint_calls
            .store(n, std::sync::atomic::Ordering::SeqCst);
        self
    }

    /// 지금까지의 호출 수
    pub fn call_count(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// 지금까지의 엔드포인트 대상 호출 수
    pub fn endpoint_call_count(&self) -> u32 {
        self.endpoint_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl TrafficGenerator for MockTrafficGenerator {
    async fn call(
        &self,
        _client: &Workload,
        target: &TrafficTarget,
        _port_name: &str,
        count: usize,
    ) -> Result<Vec<CallOutcome>, HarnessError> {
        use std::sync::atomic::Ordering;

        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(HarnessError::Traffic("mock exec failure".to_owned()));
        }
        if matches!(target, TrafficTarget::Endpoint { .. }) {
            self.endpoint_calls.fetch_add(1, Ordering::SeqCst);
            let unreachable = self.unreachable_endpoint_calls.load(Ordering::SeqCst);
            if unreachable > 0 {
                self.unreachable_endpoint_calls
                    .store(unreachable - 1, Ordering::SeqCst);
                return Ok(vec![
                    CallOutcome::TransportError("connection refused".to_owned());
                    count
                ]);
            }
        }
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        if let Some(status) = scripted {
            return Ok(vec![CallOutcome::Response { status }; count]);
        }
        if self.outcomes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.outcomes.iter().cycle().take(count).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use ratecheck_core::types::{Protocol, WorkloadPort};

    use super::*;

    fn client() -> Workload {
        Workload {
            service: "clt".to_owned(),
            namespace: "istio-echo-1a2b3c4d".to_owned(),
            ports: Vec::new(),
        }
    }

    fn server() -> Workload {
        Workload {
            service: "srv".to_owned(),
            namespace: "istio-echo-1a2b3c4d".to_owned(),
            ports: vec![WorkloadPort {
                name: "http".to_owned(),
                protocol: Protocol::Http,
                service_port: 80,
                instance_port: 8888,
            }],
        }
    }

    fn make_driver(
        generator: MockTrafficGenerator,
        retries: u32,
    ) -> (TrafficDriver<MockTrafficGenerator>, Arc<MockTrafficGenerator>) {
        let generator = Arc::new(generator);
        let driver = TrafficDriver::new(
            Arc::clone(&generator),
            429,
            retries,
            Duration::from_millis(10),
        );
        (driver, generator)
    }

    #[test]
    fn classify_empty_is_false() {
        assert!(!classify(&[], 429));
    }

    #[test]
    fn classify_all_success_is_false() {
        let outcomes = vec![CallOutcome::Response { status: 200 }; 300];
        assert!(!classify(&outcomes, 429));
    }

    #[test]
    fn classify_single_throttled_is_true() {
        let mut outcomes = vec![CallOutcome::Response { status: 200 }; 299];
        outcomes.push(CallOutcome::Response { status: 429 });
        assert!(classify(&outcomes, 429));
    }

    #[test]
    fn classify_ignores_transport_errors_and_other_statuses() {
        let outcomes = vec![
            CallOutcome::TransportError("reset".to_owned()),
            CallOutcome::Response { status: 503 },
            CallOutcome::Response { status: 200 },
        ];
        assert!(!classify(&outcomes, 429));
    }

    #[test]
    fn classify_with_transport_errors_and_throttled() {
        let outcomes = vec![
            CallOutcome::TransportError("reset".to_owned()),
            CallOutcome::Response { status: 429 },
        ];
        assert!(classify(&outcomes, 429));
    }

    #[test]
    fn classify_uses_configured_status() {
        let outcomes = vec![CallOutcome::Response { status: 503 }];
        assert!(classify(&outcomes, 503));
        assert!(!classify(&outcomes, 429));
    }

    #[test]
    fn parse_status_lines_maps_zero_to_transport_error() {
        let outcomes = parse_status_lines("200\n429\n000\n\n 200 \ngarbage\n");
        assert_eq!(
            outcomes,
            vec![
                CallOutcome::Response { status: 200 },
                CallOutcome::Response { status: 429 },
                CallOutcome::TransportError("no response".to_owned()),
                CallOutcome::Response { status: 200 },
                CallOutcome::TransportError("unparseable status line 'garbage'".to_owned()),
            ]
        );
    }

    #[test]
    fn target_url_for_workload_uses_service_port() {
        let target = TrafficTarget::Workload(server());
        assert_eq!(
            target.url("http").unwrap(),
            "http://srv.istio-echo-1a2b3c4d.svc.cluster.local:80/"
        );
        assert!(target.host_header().is_none());
        assert!(target.url("grpc").is_err());
    }

    #[test]
    fn target_url_for_gateway_uses_host_header() {
        let target = TrafficTarget::Gateway {
            address: "10.0.0.1".to_owned(),
            host: "srv.istio-echo-1a2b3c4d.svc.cluster.local".to_owned(),
        };
        assert_eq!(target.url("http").unwrap(), "http://10.0.0.1/");
        assert_eq!(
            target.host_header(),
            Some("srv.istio-echo-1a2b3c4d.svc.cluster.local")
        );
    }

    #[test]
    fn target_url_for_endpoint_includes_path() {
        let target = TrafficTarget::Endpoint {
            host: "ratelimit.istio-ratelimit-5e6f7a8b.svc.cluster.local".to_owned(),
            port: 8080,
            path: "/healthcheck".to_owned(),
        };
        assert_eq!(
            target.url("ignored").unwrap(),
            "http://ratelimit.istio-ratelimit-5e6f7a8b.svc.cluster.local:8080/healthcheck"
        );
        assert!(target.host_header().is_none());
        assert_eq!(
            target.to_string(),
            "ratelimit.istio-ratelimit-5e6f7a8b.svc.cluster.local:8080/healthcheck"
        );
    }

    #[test]
    fn exec_time_limit_adds_per_request_budget() {
        let limit = exec_time_limit(Duration::from_secs(120), Duration::from_secs(5), 300).unwrap();
        assert_eq!(limit, Duration::from_secs(120 + 5 * 300));
    }

    #[test]
    fn exec_time_limit_rejects_overflow() {
        let err = exec_time_limit(Duration::from_secs(120), Duration::from_millis(u64::MAX), 5000)
            .unwrap_err();
        assert!(matches!(err, HarnessError::Traffic(_)));

        let saturated =
            exec_time_limit(Duration::MAX, Duration::from_millis(1), 1).unwrap();
        assert_eq!(saturated, Duration::MAX);
    }

    #[tokio::test]
    async fn exec_generator_with_huge_request_timeout_fails_without_panicking() {
        let mut config = RatecheckConfig::default();
        config.traffic.request_timeout_ms = u64::MAX;
        let generator = KubectlExecTrafficGenerator::from_config(&config);
        let target = TrafficTarget::Workload(server());

        let err = generator
            .call(&client(), &target, "http", 5000)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[tokio::test]
    async fn routed_generator_sends_gateway_traffic_to_edge() {
        let routed = RoutedTrafficGenerator::new(
            MockTrafficGenerator::with_status(429),
            MockTrafficGenerator::with_status(200),
        );
        let gateway = TrafficTarget::Gateway {
            address: "10.0.0.1".to_owned(),
            host: "srv.istio-echo-1a2b3c4d.svc.cluster.local".to_owned(),
        };
        let endpoint = TrafficTarget::Endpoint {
            host: "ratelimit.istio-ratelimit-1.svc.cluster.local".to_owned(),
            port: 8080,
            path: "/healthcheck".to_owned(),
        };

        let edge = routed.call(&client(), &gateway, "http", 3).await.unwrap();
        assert_eq!(edge, vec![CallOutcome::Response { status: 429 }; 3]);

        routed
            .call(&client(), &TrafficTarget::Workload(server()), "http", 1)
            .await
            .unwrap();
        let mesh = routed.call(&client(), &endpoint, "http", 1).await.unwrap();
        assert_eq!(mesh, vec![CallOutcome::Response { status: 200 }]);

        assert_eq!(routed.edge.call_count(), 1);
        assert_eq!(routed.mesh.call_count(), 2);
        assert_eq!(routed.mesh.endpoint_call_count(), 1);
    }

    #[tokio::test]
    async fn mock_script_is_consumed_in_order() {
        let generator = MockTrafficGenerator::with_status(200).with_script(vec![503, 429]);
        let target = TrafficTarget::Workload(server());
        let statuses: Vec<Option<u16>> = [
            generator.call(&client(), &target, "http", 1).await.unwrap(),
            generator.call(&client(), &target, "http", 1).await.unwrap(),
            generator.call(&client(), &target, "http", 1).await.unwrap(),
        ]
        .iter()
        .map(|outcomes| outcomes[0].status())
        .collect();
        assert_eq!(statuses, vec![Some(503), Some(429), Some(200)]);
    }

    #[test]
    fn exec_script_contains_count_and_url() {
        let generator = KubectlExecTrafficGenerator::from_config(&RatecheckConfig::default());
        let script = generator.script("http://srv/", Some("srv.ns"), 300);
        assert!(script.contains("seq 1 300"));
        assert!(script.contains("'http://srv/'"));
        assert!(script.contains("-H 'Host: srv.ns'"));
        assert!(script.contains("%{http_code}\\n"));
        assert!(script.contains("--max-time 5"));
    }

    #[tokio::test]
    async fn drive_and_classify_detects_throttling() {
        let (driver, generator) = make_driver(
            MockTrafficGenerator::with_outcomes(vec![
                CallOutcome::Response { status: 200 },
                CallOutcome::Response { status: 429 },
            ]),
            2,
        );
        let target = TrafficTarget::Workload(server());
        assert!(driver.drive_and_classify(&client(), &target, "http", 300).await);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn drive_and_classify_all_success_is_false() {
        let (driver, _) = make_driver(MockTrafficGenerator::with_status(200), 2);
        let target = TrafficTarget::Workload(server());
        assert!(!driver.drive_and_classify(&client(), &target, "http", 300).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drive_and_classify_retries_whole_batch_failures() {
        let (driver, generator) =
            make_driver(MockTrafficGenerator::with_status(429).failing_first(2), 2);
        let target = TrafficTarget::Workload(server());
        assert!(driver.drive_and_classify(&client(), &target, "http", 10).await);
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn drive_and_classify_absorbs_persistent_failure() {
        let (driver, generator) =
            make_driver(MockTrafficGenerator::with_status(429).failing_first(10), 2);
        let target = TrafficTarget::Workload(server());
        assert!(!driver.drive_and_classify(&client(), &target, "http", 10).await);
        // 최초 1회 + 재시도 2회
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn successful_batch_with_transport_errors_is_not_retried() {
        let (driver, generator) = make_driver(
            MockTrafficGenerator::with_outcomes(vec![CallOutcome::TransportError(
                "reset".to_owned(),
            )]),
            2,
        );
        let target = TrafficTarget::Workload(server());
        assert!(!driver.drive_and_classify(&client(), &target, "http", 5).await);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn zero_batch_skips_generator() {
        let (driver, generator) = make_driver(MockTrafficGenerator::with_status(429), 2);
        let target = TrafficTarget::Workload(server());
        assert!(!driver.drive_and_classify(&client(), &target, "http", 0).await);
        assert_eq!(generator.call_count(), 0);
        assert_eq!(
            driver.drive(&client(), &target, "http", 0).await.unwrap(),
            Vec::new()
        );
    }

    #[tokio::test]
    async fn drive_does_not_retry() {
        let (driver, generator) =
            make_driver(MockTrafficGenerator::with_status(200).failing_first(1), 2);
        let target = TrafficTarget::Workload(server());
        assert!(driver.drive(&client(), &target, "http", 1).await.is_err());
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn drive_returns_requested_count() {
        let (driver, _) = make_driver(MockTrafficGenerator::with_status(200), 0);
        let target = TrafficTarget::Workload(server());
        let outcomes = driver.drive(&client(), &target, "http", 7).await.unwrap();
        assert_eq!(outcomes.len(), 7);
    }
}

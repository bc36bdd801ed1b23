//! 정책 주입기 -- 레이트리밋 정책 문서의 렌더링, 적용, 회수
//!
//! [`PolicyInjector`]는 활성 정책 슬롯을 하나만 가집니다. 다른 문서가 활성인 동안의
//! 적용은 [`HarnessError::PolicyConflict`]로 거부되므로, 서로 다른 변형의 정책이
//! 동시에 적용되는 일은 없습니다.
//!
//! [`PolicyInjector::with_policy`]는 범위 기반 획득입니다. 본문이 성공하든,
//! 실패 값을 반환하든, panic 하든 정책은 반드시 회수됩니다.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use ratecheck_core::metrics as m;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::platform::MeshPlatform;
use crate::template::{self, TemplateParams};

/// 레이트리밋 정책 변형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyVariant {
    /// 외부 결정 서비스에 묻는 전역 레이트리밋
    Global,
    /// 각 사이드카가 자체 판단하는 로컬 레이트리밋
    Local,
}

impl PolicyVariant {
    /// 안정적인 이름 (`"global"`, `"local"`)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Local => "local",
        }
    }

    /// 모든 변형
    pub fn all() -> [Self; 2] {
        [Self::Global, Self::Local]
    }
}

impl fmt::Display for PolicyVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyVariant {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "local" => Ok(Self::Local),
            other => Err(HarnessError::Config {
                field: "variant".to_owned(),
                reason: format!("unknown policy variant '{other}' (expected global or local)"),
            }),
        }
    }
}

/// 렌더링된 정책 문서
///
/// 회수 핸들로도 쓰이며, 동일성은 렌더링된 내용으로 판단합니다.
#[derive(Debug, Clone)]
pub struct PolicyDocument {
    variant: PolicyVariant,
    content: String,
}

impl PolicyDocument {
    /// 새 문서를 생성합니다.
    pub fn new(variant: PolicyVariant, content: impl Into<String>) -> Self {
        Self {
            variant,
            content: content.into(),
        }
    }

    /// 문서의 정책 변형
    pub fn variant(&self) -> PolicyVariant {
        self.variant
    }

    /// 렌더링된 내용
    pub fn content(&self) -> &str {
        &self.content
    }
}

impl PartialEq for PolicyDocument {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content
    }
}

impl Eq for PolicyDocument {}

/// [`PolicyInjector::with_policy`]의 결과
#[derive(Debug)]
pub struct PolicyScope<T> {
    /// 본문이 반환한 값
    pub value: T,
    /// 회수 결과 (실패해도 본문 결과는 유지됨)
    pub retraction: Result<(), HarnessError>,
}

/// 정책 주입기
pub struct PolicyInjector<P: MeshPlatform> {
    platform: Arc<P>,
    /// 정책 문서가 적용되는 범위
    scope: String,
    global_template: PathBuf,
    local_template: PathBuf,
    /// 정책이 선택하는 서버 서비스 이름과 포트
    server_service: String,
    server_port: u16,
    /// 활성 정책 슬롯
    active: Mutex<Option<PolicyDocument>>,
}

impl<P: MeshPlatform> PolicyInjector<P> {
    /// 새 주입기를 생성합니다.
    pub fn new(
        platform: Arc<P>,
        scope: impl Into<String>,
        global_template: impl Into<PathBuf>,
        local_template: impl Into<PathBuf>,
    ) -> Self {
        Self {
            platform,
            scope: scope.into(),
            global_template: global_template.into(),
            local_template: local_template.into(),
            server_service: "srv".to_owned(),
            server_port: 80,
            active: Mutex::new(None),
        }
    }

    /// 정책이 선택할 서버 서비스 이름과 포트를 지정합니다.
    pub fn with_server(mut self, service: impl Into<String>, port: u16) -> Self {
        self.server_service = service.into();
        self.server_port = port;
        self
    }

    /// 하네스 설정에서 주입기를 생성합니다.
    pub fn from_config(platform: Arc<P>, config: &HarnessConfig) -> Self {
        Self::new(
            platform,
            config.system_namespace.clone(),
            config.global_template.clone(),
            config.local_template.clone(),
        )
        .with_server(config.server_service.clone(), config.server_service_port)
    }

    /// 변형에 해당하는 템플릿 경로
    pub fn template_path(&self, variant: PolicyVariant) -> &Path {
        match variant {
            PolicyVariant::Global => &self.global_template,
            PolicyVariant::Local => &self.local_template,
        }
    }

    /// 현재 활성 문서
    pub async fn active(&self) -> Option<PolicyDocument> {
        self.active.lock().await.clone()
    }

    /// 템플릿을 읽어 두 그룹 이름으로 렌더링하고 YAML 구조를 검사합니다.
    pub async fn render(
        &self,
        variant: PolicyVariant,
        echo_ns: &str,
        ratelimit_ns: &str,
    ) -> Result<PolicyDocument, HarnessError> {
        let path = self.template_path(variant);
        let text = template::load(path).await?;
        let rendered = TemplateParams::new(echo_ns, ratelimit_ns)
            .with_server(&self.server_service, self.server_port)
            .render(&text)?;
        let documents = template::validate_documents(&rendered)?;
        debug!(
            variant = %variant,
            template = %path.display(),
            documents = documents,
            "rendered policy"
        );
        Ok(PolicyDocument::new(variant, rendered))
    }

    /// 렌더링된 문서를 적용합니다.
    ///
    /// 다른 문서가 활성이면 플랫폼을 호출하지 않고 `PolicyConflict`를 반환합니다.
    /// 적용이 실패해도 슬롯은 점유된 채로 남아 회수가 가능합니다.
    pub async fn apply_document(&self, document: &PolicyDocument) -> Result<(), HarnessError> {
        let mut slot = self.active.lock().await;

        if let Some(active) = slot.as_ref() {
            if active != document {
                return Err(HarnessError::PolicyConflict {
                    active: active.variant().to_string(),
                    requested: document.variant().to_string(),
                });
            }
        }

        *slot = Some(document.clone());

        if let Err(e) = self.platform.apply_config(&self.scope, document.content()).await {
            counter!(m::POLICY_APPLY_FAILURES_TOTAL, m::LABEL_VARIANT => document.variant().name())
                .increment(1);
            error!(
                variant = %document.variant(),
                scope = %self.scope,
                error = %e,
                "policy apply rejected"
            );
            return Err(HarnessError::PolicyApply(e.to_string()));
        }

        info!(variant = %document.variant(), scope = %self.scope, "policy applied");
        Ok(())
    }

    /// 렌더링 후 적용합니다.
    pub async fn apply(
        &self,
        variant: PolicyVariant,
        echo_ns: &str,
        ratelimit_ns: &str,
    ) -> Result<PolicyDocument, HarnessError> {
        let document = self.render(variant, echo_ns, ratelimit_ns).await?;
        self.apply_document(&document).await?;
        Ok(document)
    }

    /// 문서를 회수합니다.
    ///
    /// 활성 문서가 아니면 아무것도 하지 않습니다. 삭제 성공 여부와 관계없이 슬롯은 비워집니다.
    pub async fn retract(&self, document: &PolicyDocument) -> Result<(), HarnessError> {
        let mut slot = self.active.lock().await;

        if slot.as_ref() != Some(document) {
            debug!(variant = %document.variant(), "policy not active, nothing to retract");
            return Ok(());
        }

        let result = self
            .platform
            .delete_config(&self.scope, document.content())
            .await;
        *slot = None;

        match result {
            Ok(()) => {
                info!(variant = %document.variant(), scope = %self.scope, "policy retracted");
                Ok(())
            }
            Err(e) => {
                counter!(m::POLICY_RETRACT_FAILURES_TOTAL, m::LABEL_VARIANT => document.variant().name())
                    .increment(1);
                error!(
                    variant = %document.variant(),
                    scope = %self.scope,
                    error = %e,
                    "policy retraction failed"
                );
                Err(HarnessError::PolicyRetract(e.to_string()))
            }
        }
    }

    /// 정책을 적용한 상태에서 `body`를 실행하고, 어떤 경우에도 회수합니다.
    ///
    /// 렌더링 실패는 그대로 반환합니다. 적용 실패 시에는 회수를 시도한 뒤 적용 에러를
    /// 반환합니다. `body`가 panic 하면 회수 후 panic 을 다시 전파합니다.
    pub async fn with_policy<F, Fut, T>(
        &self,
        variant: PolicyVariant,
        echo_ns: &str,
        ratelimit_ns: &str,
        body: F,
    ) -> Result<PolicyScope<T>, HarnessError>
    where
        F: FnOnce(PolicyDocument) -> Fut,
        Fut: Future<Output = T>,
    {
        let document = self.render(variant, echo_ns, ratelimit_ns).await?;

        if let Err(e) = self.apply_document(&document).await {
            if let Err(retract_err) = self.retract(&document).await {
                warn!(
                    variant = %variant,
                    error = %retract_err,
                    "best-effort retraction after failed apply also failed"
                );
            }
            return Err(e);
        }

        let result = AssertUnwindSafe(body(document.clone()))
            .catch_unwind()
            .await;
        let retraction = self.retract(&document).await;

        match result {
            Ok(value) => Ok(PolicyScope { value, retraction }),
            Err(panic) => {
                error!(variant = %variant, "policy scope body panicked after retraction");
                std::panic::resume_unwind(panic)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;

    const GLOBAL: &str = "apiVersion: networking.istio.io/v1alpha3\nkind: EnvoyFilter\nmetadata:\n  name: filter-ratelimit\nspec:\n  cluster: outbound|8081||ratelimit.{{ .RateLimitNamespace }}.svc.cluster.local\n  host: srv.{{ .EchoNamespace }}.svc.cluster.local\n";
    const LOCAL: &str = "apiVersion: networking.istio.io/v1alpha3\nkind: EnvoyFilter\nmetadata:\n  name: filter-local-ratelimit\nspec:\n  host: srv.{{ .EchoNamespace }}.svc.cluster.local\n";

    struct Fixture {
        _dir: tempfile::TempDir,
        platform: Arc<MockPlatform>,
        injector: PolicyInjector<MockPlatform>,
    }

    fn fixture_with(platform: MockPlatform, global: &str, local: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let global_path = dir.path().join("global.yaml");
        let local_path = dir.path().join("local.yaml");
        std::fs::write(&global_path, global).unwrap();
        std::fs::write(&local_path, local).unwrap();
        let platform = Arc::new(platform);
        let injector =
            PolicyInjector::new(Arc::clone(&platform), "istio-system", global_path, local_path);
        Fixture {
            _dir: dir,
            platform,
            injector,
        }
    }

    fn fixture(platform: MockPlatform) -> Fixture {
        fixture_with(platform, GLOBAL, LOCAL)
    }

    #[test]
    fn variant_names_and_parse() {
        assert_eq!(PolicyVariant::Global.name(), "global");
        assert_eq!(PolicyVariant::Local.to_string(), "local");
        assert_eq!("GLOBAL".parse::<PolicyVariant>().unwrap(), PolicyVariant::Global);
        assert_eq!("local".parse::<PolicyVariant>().unwrap(), PolicyVariant::Local);
        assert!("regional".parse::<PolicyVariant>().is_err());
        assert_eq!(
            PolicyVariant::all(),
            [PolicyVariant::Global, PolicyVariant::Local]
        );
    }

    #[test]
    fn documents_compare_by_content() {
        let a = PolicyDocument::new(PolicyVariant::Global, "kind: A");
        let b = PolicyDocument::new(PolicyVariant::Local, "kind: A");
        let c = PolicyDocument::new(PolicyVariant::Global, "kind: C");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn render_substitutes_namespaces() {
        let f = fixture(MockPlatform::new());
        let doc = f
            .injector
            .render(PolicyVariant::Global, "istio-echo-1", "istio-ratelimit-2")
            .await
            .unwrap();
        assert_eq!(doc.variant(), PolicyVariant::Global);
        assert!(doc.content().contains("srv.istio-echo-1.svc.cluster.local"));
        assert!(doc.content().contains("ratelimit.istio-ratelimit-2.svc.cluster.local"));
        assert!(!doc.content().contains("{{"));
    }

    #[tokio::test]
    async fn render_uses_configured_server() {
        let f = fixture_with(
            MockPlatform::new(),
            "apiVersion: v1\nkind: EnvoyFilter\nlabels:\n  app: {{ .ServerService }}\nvhost: inbound|http|{{ .ServerPort }}\n",
            LOCAL,
        );
        let injector = PolicyInjector::new(
            Arc::clone(&f.platform),
            "istio-system",
            f.injector.template_path(PolicyVariant::Global),
            f.injector.template_path(PolicyVariant::Local),
        )
        .with_server("backend", 8000);
        let doc = injector
            .render(PolicyVariant::Global, "a", "b")
            .await
            .unwrap();
        assert!(doc.content().contains("app: backend"));
        assert!(doc.content().contains("inbound|http|8000"));
    }

    #[tokio::test]
    async fn render_rejects_unknown_parameter() {
        let f = fixture_with(
            MockPlatform::new(),
            "kind: X\napiVersion: v1\nname: {{ .Other }}\n",
            LOCAL,
        );
        let err = f
            .injector
            .render(PolicyVariant::Global, "a", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::TemplateRender(_)));
    }

    #[tokio::test]
    async fn render_rejects_document_without_kind() {
        let f = fixture_with(MockPlatform::new(), "apiVersion: v1\n", LOCAL);
        assert!(f.injector.render(PolicyVariant::Global, "a", "b").await.is_err());
    }

    #[tokio::test]
    async fn apply_then_retract() {
        let f = fixture(MockPlatform::new());
        let doc = f
            .injector
            .apply(PolicyVariant::Global, "echo", "rl")
            .await
            .unwrap();
        assert_eq!(f.injector.active().await, Some(doc.clone()));
        assert_eq!(f.platform.count("apply:istio-system"), 1);

        f.injector.retract(&doc).await.unwrap();
        assert!(f.injector.active().await.is_none());
        assert_eq!(f.platform.count("delete_config:istio-system"), 1);
    }

    #[tokio::test]
    async fn retract_twice_is_noop() {
        let f = fixture(MockPlatform::new());
        let doc = f
            .injector
            .apply(PolicyVariant::Local, "echo", "rl")
            .await
            .unwrap();
        f.injector.retract(&doc).await.unwrap();
        f.injector.retract(&doc).await.unwrap();
        assert_eq!(f.platform.count("delete_config:"), 1);
    }

    #[tokio::test]
    async fn retract_never_applied_is_noop() {
        let f = fixture(MockPlatform::new());
        let doc = f
            .injector
            .render(PolicyVariant::Global, "echo", "rl")
            .await
            .unwrap();
        f.injector.retract(&doc).await.unwrap();
        assert_eq!(f.platform.count("delete_config:"), 0);
    }

    #[tokio::test]
    async fn conflicting_apply_is_rejected_without_platform_call() {
        let f = fixture(MockPlatform::new());
        let global = f
            .injector
            .apply(PolicyVariant::Global, "echo", "rl")
            .await
            .unwrap();

        let err = f
            .injector
            .apply(PolicyVariant::Local, "echo", "rl")
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::PolicyConflict { .. }));
        assert_eq!(f.platform.count("apply:"), 1);
        assert_eq!(f.injector.active().await, Some(global.clone()));

        f.injector.retract(&global).await.unwrap();
        f.injector
            .apply(PolicyVariant::Local, "echo", "rl")
            .await
            .unwrap();
        assert_eq!(f.platform.count("apply:"), 2);
    }

    #[tokio::test]
    async fn failed_apply_keeps_slot_for_retraction() {
        let f = fixture(MockPlatform::new().with_failing_apply());
        let doc = f
            .injector
            .render(PolicyVariant::Global, "echo", "rl")
            .await
            .unwrap();
        let err = f.injector.apply_document(&doc).await.unwrap_err();
        assert!(matches!(err, HarnessError::PolicyApply(_)));
        assert_eq!(f.injector.active().await, Some(doc.clone()));

        f.injector.retract(&doc).await.unwrap();
        assert!(f.injector.active().await.is_none());
    }

    #[tokio::test]
    async fn failed_retract_still_releases_slot() {
        let f = fixture(MockPlatform::new().with_failing_delete_config());
        let doc = f
            .injector
            .apply(PolicyVariant::Global, "echo", "rl")
            .await
            .unwrap();
        let err = f.injector.retract(&doc).await.unwrap_err();
        assert!(matches!(err, HarnessError::PolicyRetract(_)));
        assert!(f.injector.active().await.is_none());
    }

    #[tokio::test]
    async fn with_policy_retracts_after_success() {
        let f = fixture(MockPlatform::new());
        let scope = f
            .injector
            .with_policy(PolicyVariant::Global, "echo", "rl", |doc| async move {
                doc.variant()
            })
            .await
            .unwrap();
        assert_eq!(scope.value, PolicyVariant::Global);
        assert!(scope.retraction.is_ok());
        assert!(f.injector.active().await.is_none());
        assert_eq!(f.platform.count("delete_config:"), 1);
    }

    #[tokio::test]
    async fn with_policy_retracts_when_body_returns_failure() {
        let f = fixture(MockPlatform::new());
        let scope = f
            .injector
            .with_policy(PolicyVariant::Local, "echo", "rl", |_| async {
                Err::<(), _>("traffic failed")
            })
            .await
            .unwrap();
        assert!(scope.value.is_err());
        assert_eq!(f.platform.count("delete_config:"), 1);
    }

    #[tokio::test]
    async fn with_policy_retracts_when_body_panics() {
        let f = fixture(MockPlatform::new());
        async fn explode(_document: PolicyDocument) -> u32 {
            panic!("boom")
        }

        let result = AssertUnwindSafe(f.injector.with_policy(
            PolicyVariant::Global,
            "echo",
            "rl",
            explode,
        ))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert!(f.injector.active().await.is_none());
        assert_eq!(f.platform.count("delete_config:"), 1);
    }

    #[tokio::test]
    async fn with_policy_apply_failure_skips_body() {
        let f = fixture(MockPlatform::new().with_failing_apply());
        let ran = std::sync::atomic::AtomicBool::new(false);
        let flag = &ran;
        let err = f
            .injector
            .with_policy(PolicyVariant::Global, "echo", "rl", move |_| async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::PolicyApply(_)));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert!(f.injector.active().await.is_none());
        assert_eq!(f.platform.count("delete_config:"), 1);
    }

    #[tokio::test]
    async fn with_policy_render_failure_touches_nothing() {
        let f = fixture_with(MockPlatform::new(), "{{ .Broken", LOCAL);
        let err = f
            .injector
            .with_policy(PolicyVariant::Global, "echo", "rl", |_| async {})
            .await
            .unwrap_err();
        assert!(err.is_template_error());
        assert!(f.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn with_policy_reports_retraction_failure_without_losing_value() {
        let f = fixture(MockPlatform::new().with_failing_delete_config());
        let scope = f
            .injector
            .with_policy(PolicyVariant::Global, "echo", "rl", |_| async { 42 })
            .await
            .unwrap();
        assert_eq!(scope.value, 42);
        assert!(matches!(
            scope.retraction,
            Err(HarnessError::PolicyRetract(_))
        ));
    }
}

//! 정책/매니페스트 템플릿 로딩과 렌더링
//!
//! 템플릿은 `{{ .Name }}` 형식의 자리표시자를 가진 YAML 텍스트입니다.
//! 렌더링은 단순 치환이며 조건/반복 구문은 지원하지 않습니다.

use std::path::Path;

use serde::Deserialize;

use crate::error::HarnessError;

/// 클라이언트/서버 그룹 이름 파라미터
pub const PARAM_ECHO_NAMESPACE: &str = "EchoNamespace";

/// 결정 서비스 그룹 이름 파라미터
pub const PARAM_RATELIMIT_NAMESPACE: &str = "RateLimitNamespace";

/// 서버 서비스 이름 파라미터
pub const PARAM_SERVER_SERVICE: &str = "ServerService";

/// 서버 서비스 포트 파라미터
pub const PARAM_SERVER_PORT: &str = "ServerPort";

/// 템플릿 파일 최대 크기 (1 MiB)
const MAX_TEMPLATE_SIZE: u64 = 1024 * 1024;

/// 템플릿에 전달되는 값
///
/// 서버 이름과 포트는 기본값이 `srv`, `80`이며 [`with_server`](Self::with_server)로 바꿉니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParams {
    pub echo_namespace: String,
    pub ratelimit_namespace: String,
    pub server_service: String,
    pub server_port: u16,
}

impl TemplateParams {
    /// 두 그룹 이름으로 파라미터를 만듭니다.
    pub fn new(echo_namespace: impl Into<String>, ratelimit_namespace: impl Into<String>) -> Self {
        Self {
            echo_namespace: echo_namespace.into(),
            ratelimit_namespace: ratelimit_namespace.into(),
            server_service: "srv".to_owned(),
            server_port: 80,
        }
    }

    /// 서버 서비스 이름과 포트를 지정합니다.
    pub fn with_server(mut self, service: impl Into<String>, port: u16) -> Self {
        self.server_service = service.into();
        self.server_port = port;
        self
    }

    /// 이 값들로 템플릿을 렌더링합니다.
    pub fn render(&self, template: &str) -> Result<String, HarnessError> {
        let port = self.server_port.to_string();
        render(
            template,
            &[
                (PARAM_ECHO_NAMESPACE, &self.echo_namespace),
                (PARAM_RATELIMIT_NAMESPACE, &self.ratelimit_namespace),
                (PARAM_SERVER_SERVICE, &self.server_service),
                (PARAM_SERVER_PORT, &port),
            ],
        )
    }
}

/// 템플릿 파일을 읽습니다.
pub async fn load(path: &Path) -> Result<String, HarnessError> {
    let load_error = |reason: String| HarnessError::PolicyTemplate {
        path: path.display().to_string(),
        reason,
    };

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| load_error(e.to_string()))?;

    if metadata.len() > MAX_TEMPLATE_SIZE {
        return Err(load_error(format!(
            "file too large: {} bytes (max {} bytes)",
            metadata.len(),
            MAX_TEMPLATE_SIZE
        )));
    }

    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| load_error(e.to_string()))
}

/// 자리표시자를 파라미터 값으로 치환합니다.
///
/// 알 수 없는 파라미터, 닫히지 않은 `{{`, `.Name` 형식이 아닌 자리표시자는 에러입니다.
pub fn render(template: &str, params: &[(&str, &str)]) -> Result<String, HarnessError> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let offset = template.len() - rest.len() + start;
        output.push_str(&rest[..start]);

        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or_else(|| {
            HarnessError::TemplateRender(format!("unterminated placeholder at byte {offset}"))
        })?;

        let inner = after_open[..end].trim();
        let name = inner
            .strip_prefix('.')
            .map(str::trim)
            .filter(|name| is_identifier(name))
            .ok_or_else(|| {
                HarnessError::TemplateRender(format!(
                    "malformed placeholder '{{{{{inner}}}}}' at byte {offset}"
                ))
            })?;

        let value = params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| {
                HarnessError::TemplateRender(format!("missing parameter '{name}' at byte {offset}"))
            })?;

        output.push_str(value);
        rest = &after_open[end + 2..];
    }

    output.push_str(rest);
    Ok(output)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 렌더링된 텍스트가 쿠버네티스 스타일 YAML 문서인지 검사합니다.
///
/// 비어 있지 않은 문서가 하나 이상 있어야 하고, 각 문서는 `apiVersion`과 `kind`를
/// 가진 매핑이어야 합니다. 검사한 문서 수를 반환합니다.
pub fn validate_documents(rendered: &str) -> Result<usize, HarnessError> {
    let mut count = 0;

    for document in serde_yaml::Deserializer::from_str(rendered) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| {
            HarnessError::TemplateRender(format!("rendered text is not valid YAML: {e}"))
        })?;

        if value.is_null() {
            continue;
        }

        if !value.is_mapping() {
            return Err(HarnessError::TemplateRender(format!(
                "document {} is not a mapping",
                count + 1
            )));
        }

        for key in ["apiVersion", "kind"] {
            if value.get(key).is_none() {
                return Err(HarnessError::TemplateRender(format!(
                    "document {} has no '{key}'",
                    count + 1
                )));
            }
        }

        count += 1;
    }

    if count == 0 {
        return Err(HarnessError::TemplateRender(
            "rendered text contains no documents".to_owned(),
        ));
    }

    Ok(count)
}

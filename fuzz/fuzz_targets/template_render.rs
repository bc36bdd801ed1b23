#![no_main]

use libfuzzer_sys::fuzz_target;
use ratecheck_harness::template;

fuzz_target!(|data: &[u8]| {
    // 템플릿은 &str이므로 UTF-8 변환 필요
    if let Ok(text) = std::str::from_utf8(data) {
        let params = template::TemplateParams::new("istio-echo-fuzz", "istio-ratelimit-fuzz");
        if let Ok(rendered) = params.render(text) {
            let _ = template::validate_documents(&rendered);
        }
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use sshwatch_core::config::SshwatchConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // 파싱에 성공한 설정은 검증 단계에서도 패닉하지 않아야 한다
    if let Ok(config) = SshwatchConfig::parse(text) {
        let _ = config.validate();
        let _ = config.position_path();
    }
});

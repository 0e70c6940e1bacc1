#![no_main]

use libfuzzer_sys::fuzz_target;
use sshwatch_tracker::correlator::{Correlator, SessionConfig};
use sshwatch_tracker::parser::SshdParser;

fuzz_target!(|data: &[u8]| {
    let Ok(parser) = SshdParser::new() else {
        return;
    };
    let mut correlator = Correlator::new(SessionConfig::default());
    let text = String::from_utf8_lossy(data);

    // 임의의 라인 순서에서도 세션 맵이 일관되게 유지되어야 한다
    for line in text.lines() {
        if let Some(attempt) = correlator.ingest(parser.parse(line), None) {
            if attempt.success {
                assert!(attempt.failure_reason.is_none());
            }
        }
    }
    let _ = correlator.sweep();
    let pending = correlator.pending_count();
    assert_eq!(correlator.drain(), pending);
    assert_eq!(correlator.pending_count(), 0);
});

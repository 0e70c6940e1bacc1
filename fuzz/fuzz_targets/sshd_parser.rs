#![no_main]

use libfuzzer_sys::fuzz_target;
use sshwatch_tracker::parser::SshdParser;

fuzz_target!(|data: &[u8]| {
    let Ok(parser) = SshdParser::new() else {
        return;
    };
    let line = String::from_utf8_lossy(data);

    // 어떤 입력이든 패닉 없이 이벤트를 돌려주고, 원문 라인은 보존된다
    let event = parser.parse(&line);
    assert_eq!(event.raw_line, line);
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use pollwatch_runtime::Interval;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(interval) = text.parse::<Interval>() {
        if let Interval::Every(period) = interval {
            assert!(!period.is_zero(), "zero period accepted from {text:?}");
        }
        let again: Interval = interval.to_string().parse().expect("display form parses");
        assert_eq!(again, interval);
    }
});

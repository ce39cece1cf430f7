#![no_main]

use installcheck::probe::{parse_node_version, supports_esm};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, u8)| {
    let (output, min_major) = data;
    if let Ok(version) = parse_node_version(output) {
        assert_eq!(supports_esm(&version, u64::from(min_major)), version.major >= u64::from(min_major));
    }
});

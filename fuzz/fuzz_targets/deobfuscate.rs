#![no_main]
use libfuzzer_sys::fuzz_target;
use opaqueid_rs::{Codec, Config};

fuzz_target!(|data: &[u8]| {
    let config = Config::with_key(b"an example very very secret key!").unwrap();
    let codec = Codec::new(&config).unwrap();
    let _ = codec.deobfuscate(&String::from_utf8_lossy(data));
});

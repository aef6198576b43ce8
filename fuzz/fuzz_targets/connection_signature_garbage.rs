#![no_main]

use didcomm_connect::{
    SecurePipe,
    signature::{ConnectionSignature, Freshness, verify_connection},
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(signature) = serde_json::from_slice::<ConnectionSignature>(data) else {
        return;
    };

    // ignore errors, we're looking for panics
    let _ = verify_connection(&SecurePipe::null(), &signature, &Freshness::default());
});

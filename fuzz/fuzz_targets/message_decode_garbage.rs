#![no_main]

use didcomm_connect::messages::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::decode(data) {
        // anything we accept must survive re-encoding
        let encoded = message.encode().unwrap();
        let redecoded = Message::decode(&encoded).unwrap();

        assert_eq!(message.message_type(), redecoded.message_type());
        assert_eq!(message.thread_id(), redecoded.thread_id());
    }
});

//! Fuzz target for the batch wire decoder.
//!
//! Run with: cargo +nightly fuzz run fuzz_wire_decode
//!
//! Any body a peer sends must either decode or fail cleanly, and a decoded
//! batch must survive a re-encode unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pollwire_core::codec;

fuzz_target!(|data: &[u8]| {
    if let Ok(batch) = codec::decode(data) {
        let again = codec::decode(&codec::encode(&batch)).expect("re-encoded batch must decode");
        assert_eq!(batch, again);
    }
});

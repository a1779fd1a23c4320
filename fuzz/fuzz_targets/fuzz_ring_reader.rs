#![no_main]

use intnet_ipc::{IntNetBuf, PopError, Ring};
use libfuzzer_sys::fuzz_target;

const MAX_INPUT_LEN: usize = 64 * 1024;
// Every pop consumes at least one header, so this bounds a consistent ring.
const MAX_POPS: usize = MAX_INPUT_LEN / 8;

fn drain(ring: Ring<'_>) {
    for _ in 0..MAX_POPS {
        match ring.try_pop() {
            Ok(frame) => {
                if let Some(gso) = frame.gso {
                    if gso.is_valid(frame.data.len()) {
                        let _ = gso.carve_all(&frame.data);
                    }
                }
            }
            Err(PopError::Empty) | Err(PopError::Corrupt) => return,
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_LEN)];
    // Images that fail validation are rejected before any cursor is trusted.
    let Ok(buf) = IntNetBuf::from_bytes(data) else {
        return;
    };
    let _ = buf.stats();
    drain(buf.recv());
    drain(buf.send());

    // Whatever is left must still accept writes without panicking.
    let _ = buf.recv().write_frame(&[&data[..data.len().min(64)]]);
    drain(buf.recv());
});

#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use intnet_trunk::Sg;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Read { off: u16, len: u16 },
    Write { off: u16, data: Vec<u8> },
    Byte { off: u16 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    segments: Vec<Vec<u8>>,
    segs_alloc: u8,
    ops: Vec<Op>,
}

fuzz_target!(|data: &[u8]| {
    let Ok(input) = Input::arbitrary(&mut Unstructured::new(data)) else {
        return;
    };
    let total: usize = input.segments.iter().map(Vec::len).sum();
    let mut sg = Sg::new(total, usize::from(input.segs_alloc));
    for seg in &input.segments {
        if sg.add_segment(seg.as_slice(), None).is_err() {
            break;
        }
    }
    let mut model = sg.copy_to_vec();

    for op in input.ops.into_iter().take(64) {
        match op {
            Op::Read { off, len } => {
                let mut buf = vec![0u8; usize::from(len)];
                let n = sg.read_part(usize::from(off), &mut buf);
                let off = usize::from(off).min(model.len());
                let want = &model[off..(off + usize::from(len)).min(model.len())];
                assert_eq!(&buf[..n], want);
            }
            Op::Write { off, data } => {
                let off = usize::from(off);
                if sg.write_part(off, &data) {
                    model[off..off + data.len()].copy_from_slice(&data);
                }
            }
            Op::Byte { off } => {
                assert_eq!(sg.read_byte(usize::from(off)), model.get(usize::from(off)).copied());
            }
        }
    }
    assert_eq!(sg.copy_to_vec(), model);
});

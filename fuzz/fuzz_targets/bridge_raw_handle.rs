#![no_main]

use cros_decoder_bridge::bridge::CompletionBridge;
use cros_decoder_bridge::bridge::DecodedFrameEvent;
use cros_decoder_bridge::status::VideoCodecStatus;
use libfuzzer_sys::fuzz_target;

fn read_i32(data: &[u8]) -> Option<i32> {
    Some(i32::from_le_bytes(data.get(..4)?.try_into().ok()?))
}

// Each 17-byte record is a raw handle, a decode time, a QP and a flags byte selecting which of
// them are present and whether the decoder is retired first.
fuzz_target!(|data: &[u8]| {
    let bridge = CompletionBridge::<u32>::new();
    let handles = (0..4)
        .map(|_| {
            bridge.create_callback(|_: DecodedFrameEvent<u32>| -> anyhow::Result<()> { Ok(()) })
        })
        .collect::<Vec<_>>();

    for (i, record) in data.chunks_exact(17).enumerate() {
        let flags = record[16];
        let raw = if flags & 0x8 != 0 {
            handles[flags as usize % handles.len()].id().as_raw()
        } else {
            i64::from_le_bytes(record[..8].try_into().unwrap())
        };
        let decode_time_ms = read_i32(&record[8..]).filter(|_| flags & 0x1 != 0);
        let qp = read_i32(&record[12..]).filter(|_| flags & 0x2 != 0);

        if flags & 0x4 != 0 {
            let _ = handles[i % handles.len()].retire();
        }

        let status = bridge.on_decoded_frame(raw, i as u32, decode_time_ms, qp);
        if decode_time_ms.map_or(false, |t| t < 0) {
            assert_ne!(status, VideoCodecStatus::Ok);
        }
    }
});

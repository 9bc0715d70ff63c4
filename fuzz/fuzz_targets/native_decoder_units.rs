#![no_main]

use cros_decoder_bridge::backend::dummy::DummyBackend;
use cros_decoder_bridge::backend::EncodedUnit;
use cros_decoder_bridge::bridge::CompletionBridge;
use cros_decoder_bridge::bridge::DecodedFrameEvent;
use cros_decoder_bridge::native_decoder::NativeDecoder;
use cros_decoder_bridge::settings::create_settings;
use cros_decoder_bridge::video_frame::VideoFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let bridge = CompletionBridge::new();
    let mut decoder = NativeDecoder::<DummyBackend>::new(
        &bridge,
        |_: DecodedFrameEvent<VideoFrame>| -> anyhow::Result<()> { Ok(()) },
        create_settings(1, 16, 16),
        Default::default(),
        |_| (),
    )
    .unwrap();

    decoder.start();
    decoder.queue(
        data.split(|b| *b == 0).enumerate().map(|(i, unit)| EncodedUnit::new(unit.to_vec(), i as i64)),
    );
    decoder.drain();
    decoder.release();
});

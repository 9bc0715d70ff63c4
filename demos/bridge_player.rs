// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! bridge_player, runs a file through a dummy native decoder and prints every decoded-frame event
//! the consumer side receives.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use cros_decoder_bridge::backend::dummy::DummyBackend;
use cros_decoder_bridge::backend::dummy::DummyBackendOptions;
use cros_decoder_bridge::backend::EncodedUnit;
use cros_decoder_bridge::bridge::ChannelSink;
use cros_decoder_bridge::bridge::CompletionBridge;
use cros_decoder_bridge::native_decoder::NativeDecoder;
use cros_decoder_bridge::native_decoder::NativeDecoderState;
use cros_decoder_bridge::settings::create_settings;
use cros_decoder_bridge::status::VideoCodecStatus;
use cros_decoder_bridge::DecodedFormat;

/// Feeds a file through the completion bridge using the dummy backend
#[derive(Debug, FromArgs)]
struct Args {
    /// input file
    #[argh(positional)]
    input: PathBuf,

    /// size in bytes of each unit the input is split into. Default: 4096
    #[argh(option, default = "4096")]
    unit_size: usize,

    /// width of the decoded frames. Default: 320
    #[argh(option, default = "320")]
    width: i32,

    /// height of the decoded frames. Default: 240
    #[argh(option, default = "240")]
    height: i32,

    /// number of cores the decoder may use. Default: 1
    #[argh(option, default = "1")]
    cores: i32,

    /// pixel format to decode into. Default: i420
    #[argh(option, default = "DecodedFormat::I420")]
    output_format: DecodedFormat,

    /// number of frames the backend holds back for reordering. Default: 0
    #[argh(option, default = "0")]
    reorder_depth: usize,

    /// frame rate used to timestamp the units. Default: 30
    #[argh(option, default = "30")]
    frame_rate: u32,

    /// whether to print the MD5 of each decoded frame
    #[argh(switch)]
    compute_md5: bool,
}

fn format_optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Args = argh::from_env();
    assert!(args.unit_size > 0, "unit size must not be zero");
    assert!(args.frame_rate > 0, "frame rate must not be zero");

    let input = {
        let mut buf = Vec::new();
        File::open(&args.input)
            .expect("error opening input file")
            .read_to_end(&mut buf)
            .expect("error reading input file");
        buf
    };

    let frame_duration_ns = 1_000_000_000 / args.frame_rate as i64;
    let units = input
        .chunks(args.unit_size)
        .enumerate()
        .map(|(i, chunk)| EncodedUnit::new(chunk.to_vec(), i as i64 * frame_duration_ns))
        .collect::<Vec<_>>();
    let num_units = units.len();

    let errors = Arc::new(AtomicUsize::new(0));
    let error_cb = {
        let errors = Arc::clone(&errors);
        move |status: VideoCodecStatus| {
            log::warn!("decoder reported {status:?}");
            errors.fetch_add(1, Ordering::SeqCst);
        }
    };

    let bridge = CompletionBridge::new();
    let (event_tx, event_rx) = mpsc::channel();
    let mut decoder = NativeDecoder::<DummyBackend>::new(
        &bridge,
        ChannelSink::new(event_tx),
        create_settings(args.cores, args.width, args.height),
        DummyBackendOptions { format: args.output_format, reorder_depth: args.reorder_depth },
        error_cb,
    )
    .expect("failed to create decoder");

    let mut status = decoder.start();
    if status.is_ok() {
        status = decoder.queue(units);
    }
    if status.is_ok() {
        status = decoder.drain();
    }
    if !status.is_ok() {
        eprintln!(
            "decoder {} did not accept input: {status:?} (state {:?})",
            decoder.id(),
            decoder.state()
        );
        decoder.release();
        return ExitCode::FAILURE;
    }

    let mut delivered = 0;
    while delivered + errors.load(Ordering::SeqCst) < num_units {
        let event = match event_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event,
            // Everything sent so far has been received, nothing more will come.
            Err(RecvTimeoutError::Timeout) if decoder.state() == NativeDecoderState::Error => {
                break
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let md5 = if args.compute_md5 {
            format!(" md5={:x}", md5::compute(event.frame.buffer()))
        } else {
            String::new()
        };
        println!(
            "frame {delivered}: ts={} decode_time_ms={} qp={}{md5}",
            event.frame.timestamp_ns(),
            format_optional(event.decode_time_ms),
            format_optional(event.qp),
        );
        delivered += 1;
    }

    let id = decoder.id();
    let state = decoder.state();
    decoder.release();
    println!(
        "decoder {id}: {delivered} frames, {} errors, {num_units} units",
        errors.load(Ordering::SeqCst)
    );

    if state == NativeDecoderState::Error {
        eprintln!("decoder {id} stopped on an error, see the log for details");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

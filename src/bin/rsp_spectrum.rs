use std::{fs::File, io::Write, sync::Arc, time::Duration};

use clap::Parser;
use crossbeam::channel::bounded;
use num::Complex;
use rayon::prelude::*;
use rustfft::FftPlanner;

use rtlsdr_rsp::{
    Device,
    sim::{SimConfig, SimSdk},
    utils::{iq_to_complex, slice_as_u8},
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short = 'f', value_name = "center freq in Hz", default_value_t = 100_000_000)]
    freq: u32,

    #[clap(short = 's', value_name = "sample rate in Hz", default_value_t = 2_048_000)]
    rate: u32,

    #[clap(short = 't', value_name = "tone offset in Hz", default_value_t = 250_000.0)]
    tone: f64,

    #[clap(short = 'c', long = "nch", value_name = "num of fft ch", default_value_t = 1024)]
    nch: usize,

    #[clap(
        short = 'n',
        long = "nint",
        value_name = "num of fft per integration",
        default_value_t = 256
    )]
    nint: usize,

    #[clap(short = 'o', long = "out", value_name = "out name")]
    outname: Option<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let nch = args.nch;

    let sdk = Arc::new(SimSdk::new().with_config(SimConfig {
        tone_offset: args.tone,
        paced: false,
        ..SimConfig::default()
    }));
    let device = Arc::new(Device::open(sdk, 0).expect("failed to open device"));
    device.set_sample_rate(args.rate).expect("invalid rate");
    device.set_center_freq(args.freq).expect("invalid frequency");
    device.set_tuner_gain(300).expect("failed to set gain");

    let (tx, rx) = bounded::<Vec<u8>>(args.nint);
    let reader = {
        let device = device.clone();
        std::thread::spawn(move || {
            device.read_async(
                move |buf: &[u8]| {
                    let _ = tx.try_send(buf.to_vec());
                },
                0,
                (nch * 2) as u32,
            )
        })
    };

    let blocks: Vec<Vec<u8>> = rx.iter().take(args.nint).collect();
    device
        .cancel_async(Some(Duration::from_secs(5)))
        .expect("stream did not stop");
    drop(rx);
    reader
        .join()
        .expect("reader thread panicked")
        .expect("stream failed");

    let fft = FftPlanner::<f32>::new().plan_fft_forward(nch);
    let spec = blocks
        .par_iter()
        .map(|block| {
            let mut x = Vec::with_capacity(nch);
            iq_to_complex(block, &mut x);
            fft.process(&mut x);
            x.iter().map(Complex::norm_sqr).collect::<Vec<f32>>()
        })
        .reduce(
            || vec![0.0; nch],
            |mut a, b| {
                a.iter_mut().zip(b.iter()).for_each(|(a, b)| *a += b);
                a
            },
        );

    // move DC to the middle
    let mut shifted = spec[nch / 2..].to_vec();
    shifted.extend_from_slice(&spec[..nch / 2]);

    let (peak, _) = shifted
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .expect("empty spectrum");
    let rate = device.get_sample_rate() as f64;
    let offset = (peak as f64 - (nch / 2) as f64) * rate / nch as f64;
    println!(
        "{} blocks at {} S/s: peak at {:.0} Hz offset, expected {:.0} Hz (bin width {:.0} Hz)",
        blocks.len(),
        rate,
        offset,
        args.tone,
        rate / nch as f64
    );

    if let Some(outname) = args.outname {
        let mut f = File::create(&outname).expect("failed to create output");
        f.write_all(slice_as_u8(&shifted)).expect("failed to write");
    }
}

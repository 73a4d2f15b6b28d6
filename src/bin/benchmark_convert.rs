use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use clap::Parser;
use rand::Rng;

use rtlsdr_rsp::{
    convert::{ConverterConfig, SampleConverter},
    device::DEFAULT_BUF_LEN,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short = 'n', value_name = "num of input blocks", default_value_t = 20_000)]
    nblocks: usize,

    #[clap(short = 'l', value_name = "samples per input block", default_value_t = 1008)]
    block_len: usize,

    #[clap(
        short = 'b',
        value_name = "output buffer bytes",
        default_value_t = DEFAULT_BUF_LEN as usize
    )]
    buf_len: usize,
}

fn main() {
    let args = Args::parse();

    let mut rng = rand::rng();
    let xi: Vec<i16> = (0..args.block_len).map(|_| rng.random_range(-8192..8192)).collect();
    let xq: Vec<i16> = (0..args.block_len).map(|_| rng.random_range(-8192..8192)).collect();

    for decimate in [false, true] {
        let bytes = Arc::new(AtomicU64::new(0));
        let counter = bytes.clone();
        let mut conv = SampleConverter::new(
            ConverterConfig {
                decimate,
                downscale: 8192.0,
                test_mode: false,
            },
            args.buf_len,
            Box::new(move |buf: &[u8]| {
                counter.fetch_add(buf.len() as u64, Ordering::Relaxed);
            }),
        );

        let t0 = Instant::now();
        for _ in 0..args.nblocks {
            conv.process(&xi, &xq);
        }
        let dt = t0.elapsed().as_secs_f64();
        let nsamp = (args.nblocks * args.block_len) as f64;
        println!(
            "decimate={} in: {:.1} MSps out: {:.1} MB/s ({} buffers)",
            decimate,
            nsamp / dt / 1e6,
            bytes.load(Ordering::Relaxed) as f64 / dt / 1e6,
            conv.delivered()
        );
    }
}

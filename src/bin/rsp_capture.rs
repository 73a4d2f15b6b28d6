use std::{
    fs::File,
    io::{BufWriter, Write},
    sync::Arc,
    time::Duration,
};

use chrono::Local;
use clap::Parser;
use crossbeam::channel::bounded;
use lockfree_object_pool::{LinearObjectPool, LinearOwnedReusable};

use rtlsdr_rsp::{Device, Sdk, utils::RateMeter};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short = 'f', value_name = "center freq in Hz", default_value_t = 100_000_000)]
    freq: u32,

    #[clap(short = 's', value_name = "sample rate in Hz", default_value_t = 2_048_000)]
    rate: u32,

    #[clap(short = 'g', value_name = "gain in tenths of dB, agc if omitted")]
    gain: Option<i32>,

    #[clap(short = 'p', value_name = "ppm error", default_value_t = 0)]
    ppm: i32,

    #[clap(short = 'd', value_name = "device index", default_value_t = 0)]
    index: u32,

    #[clap(short = 'o', long = "out", value_name = "out name")]
    outname: Option<String>,

    #[clap(short = 'N', value_name = "Num of samples in 10^6")]
    nsamp: Option<usize>,

    #[clap(short = 'b', value_name = "output block size in bytes", default_value_t = 0)]
    buf_len: u32,

    #[clap(short = 'T', long = "testmode")]
    test_mode: bool,
}

#[cfg(feature = "mirsdr")]
fn backend() -> Arc<rtlsdr_rsp::mirsdr::MirSdr> {
    Arc::new(rtlsdr_rsp::mirsdr::MirSdr::new().expect("failed to load sdrplay library"))
}

#[cfg(not(feature = "mirsdr"))]
fn backend() -> Arc<rtlsdr_rsp::sim::SimSdk> {
    log::warn!("built without `mirsdr`, capturing from the simulator");
    Arc::new(rtlsdr_rsp::sim::SimSdk::new())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    capture(backend(), args);
}

fn capture<S: Sdk + 'static>(sdk: Arc<S>, args: Args) {
    let device = Arc::new(Device::open(sdk, args.index).expect("failed to open device"));
    println!("using {} serial {}", device.info().name, device.info().serial);

    device
        .set_sample_rate(args.rate)
        .expect("failed to set sample rate");
    device
        .set_center_freq(args.freq)
        .expect("failed to set frequency");
    device
        .set_freq_correction(args.ppm)
        .expect("failed to set ppm");
    match args.gain {
        Some(gain) => {
            device
                .set_tuner_gain_mode(true)
                .expect("failed to set manual gain");
            device.set_tuner_gain(gain).expect("failed to set gain");
        }
        None => device.set_agc_mode(true).expect("failed to enable agc"),
    }
    device
        .set_testmode(args.test_mode)
        .expect("failed to set test mode");

    let pool: Arc<LinearObjectPool<Vec<u8>>> =
        Arc::new(LinearObjectPool::new(Vec::new, |v| v.clear()));
    let (tx_buf, rx_buf) = bounded::<LinearOwnedReusable<Vec<u8>>>(256);

    let reader = {
        let device = device.clone();
        let buf_len = args.buf_len;
        std::thread::spawn(move || {
            let mut ndropped = 0usize;
            device.read_async(
                move |data: &[u8]| {
                    let mut buf = pool.pull_owned();
                    buf.extend_from_slice(data);
                    if tx_buf.try_send(buf).is_err() {
                        ndropped += 1;
                        if ndropped.is_power_of_two() {
                            log::warn!("writer is behind, {} buffers dropped", ndropped);
                        }
                    }
                },
                0,
                buf_len,
            )
        })
    };

    let local_time = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    println!("==================================");
    println!("start time:{}", local_time);
    println!("==================================");

    let mut dump_file = args
        .outname
        .map(|outname| BufWriter::new(File::create(&outname).expect("failed to create dump file")));
    let mut nsamp: Option<usize> = args.nsamp.map(|x| x * 1_000_000);
    let mut meter = RateMeter::new(Duration::from_secs(2));

    for buf in rx_buf.iter() {
        let n_pairs = buf.len() / 2;
        let n_to_write = nsamp.map_or(n_pairs, |n| n.min(n_pairs));
        if n_to_write == 0 {
            break;
        }
        nsamp.iter_mut().for_each(|x| *x -= n_to_write);

        if let Some(ref mut f) = dump_file {
            f.write_all(&buf[..n_to_write * 2]).expect("failed to write");
        }
        if let Some(rate) = meter.add(n_to_write) {
            println!("smp_rate: {} MSps q={}", rate / 1e6, rx_buf.len());
        }
        if nsamp == Some(0) {
            break;
        }
    }

    if let Err(e) = device.cancel_async(Some(Duration::from_secs(5))) {
        log::error!("{}", e);
    }
    drop(rx_buf);
    match reader.join() {
        Ok(Err(e)) => log::error!("stream ended with {}", e),
        Err(_) => log::error!("reader thread panicked"),
        Ok(Ok(())) => {}
    }
    if let Some(mut f) = dump_file {
        f.flush().expect("failed to flush");
    }
    println!(
        "{} samples captured at {}",
        meter.samples(),
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
    );
}

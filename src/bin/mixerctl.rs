use std::env;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dosmix::control::{api, demo};
use dosmix::effects::gain_to_db;
use dosmix::host::{AudioHost, DeviceRequest, DeviceSpec, OutputReader};
use dosmix::{MixerConfig, MixerContext, MixerError};

/// Host that pulls blocks at the device rate and discards them.
#[derive(Default)]
struct DiscardHost {
    running: Arc<AtomicBool>,
    puller: Option<JoinHandle<()>>,
}

impl AudioHost for DiscardHost {
    fn open(
        &mut self,
        request: &DeviceRequest,
        mut reader: OutputReader,
    ) -> Result<DeviceSpec, MixerError> {
        let spec = DeviceSpec {
            sample_rate_hz: request.sample_rate_hz,
            blocksize: request.blocksize,
        };
        let period =
            Duration::from_secs_f64(f64::from(spec.blocksize) / f64::from(spec.sample_rate_hz));
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);
        self.puller = Some(thread::spawn(move || {
            let mut block = vec![0.0f32; spec.blocksize as usize * 2];
            while running.load(Ordering::Acquire) {
                reader.fill_interleaved(&mut block);
                thread::sleep(period);
            }
        }));
        Ok(spec)
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(puller) = self.puller.take() {
            let _ = puller.join();
        }
    }
}

fn print_status(ctx: &MixerContext) {
    let status = api::status(ctx);
    println!("Sample Rate : {} Hz", status.sample_rate_hz);
    println!("Block Size  : {} frames", status.blocksize);
    println!("Prebuffer   : {} ms", status.prebuffer_ms);
    println!("State       : {}", status.state.as_str());
    println!("Queue Fill  : {:.1}%", status.queue_fill * 100.0);
    println!(
        "Presets     : reverb={} chorus={} crossfeed={}",
        status.reverb, status.chorus, status.crossfeed
    );
    println!("Channels:");
    for channel in status.channels {
        println!(
            "  {} | {} Hz | vol={:.1} dB | {} | xfeed={:.2} reverb={:.2} chorus={:.2} | enabled={} | {}",
            channel.name,
            channel.sample_rate_hz,
            gain_to_db(channel.user_volume.left),
            channel.lineout,
            channel.crossfeed_strength,
            channel.reverb_level,
            channel.chorus_level,
            if channel.is_enabled { "yes" } else { "no" },
            channel.rate_path,
        );
    }
}

fn usage() {
    println!(
        "Usage: mixerctl [--rate HZ] [--blocksize FRAMES] [--reverb PRESET] [--chorus PRESET] \
         [--crossfeed PRESET] [--nosound] [--status]\n\n\
         Without --status the interactive console launches."
    );
}

fn parse_number(flag: &str, value: Option<String>) -> u32 {
    match value.as_deref().map(str::parse::<u32>) {
        Some(Ok(number)) => number,
        _ => {
            eprintln!("mixerctl: {flag} expects a number");
            process::exit(1);
        }
    }
}

fn expect_value(flag: &str, value: Option<String>) -> String {
    value.unwrap_or_else(|| {
        eprintln!("mixerctl: {flag} expects a value");
        process::exit(1);
    })
}

fn main() {
    let mut config = MixerConfig::default();
    let mut status_only = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rate" => config.rate = parse_number("--rate", args.next()),
            "--blocksize" => config.blocksize = parse_number("--blocksize", args.next()),
            "--reverb" => config.reverb = expect_value("--reverb", args.next()),
            "--chorus" => config.chorus = expect_value("--chorus", args.next()),
            "--crossfeed" => config.crossfeed = expect_value("--crossfeed", args.next()),
            "--nosound" => config.nosound = true,
            "--status" | "-s" => status_only = true,
            "--help" | "-h" => {
                usage();
                return;
            }
            other => {
                eprintln!("mixerctl: unknown argument '{other}'");
                process::exit(1);
            }
        }
    }

    let ctx = match MixerContext::create(config, Box::new(DiscardHost::default())) {
        Ok(ctx) => Arc::new(ctx),
        Err(err) => {
            eprintln!("mixerctl: {err}");
            process::exit(1);
        }
    };
    demo::spawn_demo_devices(&ctx);

    if status_only {
        thread::sleep(Duration::from_millis(250));
        print_status(&ctx);
        ctx.close();
        return;
    }

    let result = dosmix::control::ui::run(Arc::clone(&ctx));
    ctx.close();
    if let Err(err) = result {
        eprintln!("mixerctl: {err}");
        process::exit(1);
    }
}

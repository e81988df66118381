use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;
use xprotect::media::Codec;
use xprotect::{
    Frame, ManagementService, ServerCommandClient, StaticTokenService, StreamConfig, StreamEngine,
    StreamError,
};

#[derive(Parser)]
#[command(
    name = "xprotect-stream",
    about = "Pull live images from an XProtect recording server"
)]
struct Args {
    /// Management server address (host or host:port)
    #[arg(long)]
    management_server: Option<String>,

    /// BASIC for basic authentication, otherwise the Windows domain
    #[arg(long, default_value = xprotect::config::BASIC_DOMAIN)]
    domain: String,

    /// User name for the management server
    #[arg(long, default_value = "")]
    user: String,

    /// Password for the management server
    #[arg(long, default_value = "")]
    secret: String,

    /// Pre-obtained token; replaces user and password
    #[arg(long)]
    token: Option<String>,

    /// Call the management server at the configured address instead of the
    /// one it advertises
    #[arg(long)]
    force_management_address: bool,

    /// Recording server host; skips the directory lookup
    #[arg(long)]
    recorder_host: Option<String>,

    /// Recording server port
    #[arg(long, default_value_t = xprotect::config::DEFAULT_RECORDER_PORT)]
    recorder_port: u16,

    /// Seconds a pre-obtained token stays valid (without a management server)
    #[arg(long, default_value_t = 3600)]
    token_ttl: u64,

    /// Seconds before expiry at which the token is renewed
    #[arg(long, default_value_t = 120)]
    renewal_margin: u64,

    /// Camera GUID
    #[arg(long)]
    camera_id: String,

    /// GUID of the camera's hardware, for a direct lookup
    #[arg(long)]
    hardware_id: Option<String>,

    /// Socket timeout in seconds (0 disables)
    #[arg(long, default_value_t = 2.0)]
    timeout: f64,

    /// Stop after this many frames (0 streams until the recorder closes)
    #[arg(long, short = 'n', default_value_t = 10)]
    frames: u64,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Directory to write frame bodies to
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Send one PTZ command (pan tilt zoom) once streaming
    #[arg(long, num_args = 3, value_names = ["PAN", "TILT", "ZOOM"], allow_negative_numbers = true)]
    ptz: Option<Vec<f64>>,
}

fn extension(codec: Codec) -> &'static str {
    match codec {
        Codec::Jpeg => "jpg",
        Codec::H264 => "h264",
        Codec::H265 => "h265",
        Codec::Other(_) => "bin",
    }
}

fn run(args: Args) -> xprotect::Result<()> {
    if let Some(dir) = &args.output {
        fs::create_dir_all(dir)?;
    }

    let config = StreamConfig {
        management_server: args.management_server.clone().unwrap_or_default(),
        recorder_host: args.recorder_host,
        recorder_port: args.recorder_port,
        domain: args.domain,
        user_id: args.user,
        user_secret: args.secret,
        bearer_token: args.token,
        camera_id: args.camera_id,
        hardware_id: args.hardware_id,
        force_management_address: args.force_management_address,
        timeout: Duration::try_from_secs_f64(args.timeout)
            .map_err(|e| StreamError::Config(format!("timeout: {e}")))?,
        renewal_margin: Duration::from_secs(args.renewal_margin),
    };
    config.validate()?;

    let service: Box<dyn ManagementService> = match &args.management_server {
        Some(_) => {
            let client = ServerCommandClient::new(&config)?;
            tracing::info!(endpoint = client.endpoint(), "using management server");
            Box::new(client)
        }
        None if config.bearer_token.is_some() => {
            Box::new(StaticTokenService::new(Duration::from_secs(args.token_ttl)))
        }
        None => {
            return Err(StreamError::Config(
                "without --management-server a --token is required".to_string(),
            ));
        }
    };
    let mut engine = StreamEngine::new(service);
    engine.open(config)?;

    if let (Some(secs), Some(handle)) = (args.duration, engine.close_handle()) {
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            tracing::info!(secs, "duration elapsed, closing stream");
            handle.close();
        });
    }

    if let Some(axes) = &args.ptz {
        if let Err(e) = engine.send_ptz(axes[0], axes[1], axes[2]) {
            tracing::warn!(error = %e, "PTZ command failed");
        }
    }

    let mut count = 0u64;
    while args.frames == 0 || count < args.frames {
        let image = match engine.next_frame()? {
            Frame::Image(image) => image,
            Frame::EndOfStream => break,
        };
        count += 1;

        match image.generic_header() {
            Ok(gbd) => {
                tracing::info!(
                    frame = count,
                    len = image.len(),
                    codec = ?gbd.codec(),
                    seq = gbd.sequence_number(),
                    sync_point = gbd.is_sync_point(),
                    timestamp = gbd.timestamp(),
                    "image"
                );
                if let Some(dir) = &args.output {
                    let path = dir.join(format!("frame-{count:06}.{}", extension(gbd.codec())));
                    fs::write(&path, gbd.body())?;
                }
            }
            Err(e) => {
                tracing::warn!(frame = count, len = image.len(), error = %e, "image without generic header");
                if let Some(dir) = &args.output {
                    fs::write(dir.join(format!("frame-{count:06}.bin")), image.bytes())?;
                }
            }
        }
    }

    engine.close();
    println!("received {count} frames");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Stream failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

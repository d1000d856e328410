use argh::FromArgs;
use phase::{
    image::{Image, ImageSize},
    k3d::reprojection::ReprojectionMatrix,
    stereo::{
        config::StreamConfig,
        controller::StereoController,
        device::{CameraDeviceInfo, StereoMatcherType},
        sink::PointCloudSink,
        virtual_device::{StaticCalibration, VirtualStereoCamera, VirtualStereoMatcher},
    },
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

#[derive(FromArgs)]
/// Stream depth from a virtual stereo camera into a point cloud
struct Args {
    /// path to a JSON stream configuration
    #[argh(option, short = 'c')]
    config: Option<std::path::PathBuf>,

    /// override the read rate in Hz
    #[argh(option, short = 'r')]
    rate: Option<f32>,

    /// the duration in seconds to run the app
    #[argh(option, short = 'd')]
    duration: Option<u64>,

    /// the constant disparity produced by the virtual matcher
    #[argh(option, default = "24.0")]
    disparity: f32,
}

/// A horizontal gradient in BGR, shifted for the right view.
fn gradient(size: ImageSize, shift: usize) -> Result<Image<u8, 3>, Box<dyn std::error::Error>> {
    let mut data = Vec::with_capacity(size.area() * 3);
    for y in 0..size.height {
        for x in 0..size.width {
            let v = (((x + shift) * 255) / size.width.max(1)).min(255) as u8;
            data.extend_from_slice(&[v, (y * 255 / size.height.max(1)) as u8, 255 - v]);
        }
    }
    Ok(Image::new(size, data)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => StreamConfig::from_json_file(path)?,
        None => StreamConfig::default(),
    };
    if let Some(rate) = args.rate {
        config = config.with_read_rate(rate);
    }

    let size = ImageSize {
        width: 640,
        height: 480,
    };

    let info = CameraDeviceInfo::resolve(config.device.device_type, config.device.interface)?;
    let camera = match (&config.left_image, &config.right_image) {
        (Some(left), Some(right)) => VirtualStereoCamera::from_raw_files(info, size, left, right)?,
        _ => VirtualStereoCamera::new(info, gradient(size, 0)?, gradient(size, 24)?)?,
    }
    .with_latency(Duration::from_millis(20));

    let matcher = VirtualStereoMatcher::new(
        StereoMatcherType::select(config.device.license_valid),
        args.disparity,
    )
    .with_latency(Duration::from_millis(40));

    let calibration = match &config.calibration {
        Some(path) => StaticCalibration::from_json_file(path)?,
        None => StaticCalibration::new(
            ReprojectionMatrix::from_stereo(500.0, 320.0, 240.0, 320.0, 0.1),
            1.2,
        ),
    };

    let sink = PointCloudSink::new(config.renderer);
    let mut controller = StereoController::new(camera, matcher, calibration, sink, config)?;

    // create a cancel token to stop the stream
    let cancel_token = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler({
        let cancel_token = cancel_token.clone();
        move || {
            println!("Received Ctrl-C signal. Sending cancel signal !!");
            cancel_token.store(true, Ordering::SeqCst);
        }
    })?;

    // we launch a timer to cancel the token after a certain duration
    std::thread::spawn({
        let cancel_token = cancel_token.clone();
        move || {
            if let Some(duration_secs) = args.duration {
                std::thread::sleep(Duration::from_secs(duration_secs));
                println!("Sending timer cancel signal !!");
                cancel_token.store(true, Ordering::SeqCst);
            }
        }
    });

    controller.start()?;

    let mut last_report = Instant::now();
    while !cancel_token.load(Ordering::SeqCst) {
        controller.update()?;

        if let Some(cloud) = controller.sink_mut().take_cloud() {
            log::debug!("received a cloud with {} points", cloud.len());
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            log::info!(
                "fps: {:.1}, frames: {}, missed ticks: {}",
                controller.fps().fps(),
                controller.fps().frame_count(),
                controller.missed_ticks()
            );
            last_report = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(5));
    }

    controller.shutdown()?;
    println!("Finished streaming. Closing app.");

    Ok(())
}

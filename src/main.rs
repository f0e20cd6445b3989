//! MonetVR desktop launcher

// On Android the activity loads the library and enters through `android_main`.
#[cfg(not(target_os = "android"))]
mod desktop {
    use clap::Parser;
    use std::path::PathBuf;

    use monet_vr::config::Config;
    use monet_vr::error::MonetError;
    use monet_vr::video::{enumerate_devices, log_devices};

    /// MonetVR - stereo head-tracked video viewer
    #[derive(Parser, Debug)]
    #[command(name = "monet_vr", version, about, long_about = None)]
    struct Args {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Start in stereo mode
        #[arg(long)]
        stereo: bool,

        /// Start with lens distortion off
        #[arg(long)]
        no_distortion: bool,

        /// Capture device: "test-pattern", "none" or an image directory (overrides config)
        #[arg(short, long)]
        device: Option<String>,

        /// OBJ model loaded in the background (overrides config)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Video-plane decimation stride (overrides config)
        #[arg(long)]
        stride: Option<u32>,

        /// List capture devices and exit
        #[arg(long)]
        list_devices: bool,
    }

    impl Args {
        fn apply(&self, config: &mut Config) {
            if self.stereo {
                config.stereo.enabled = true;
            }
            if self.no_distortion {
                config.distortion.enabled = false;
            }
            if let Some(device) = &self.device {
                config.capture.device = device.clone();
            }
            if let Some(model) = &self.model {
                config.model.path = Some(model.clone());
            }
            if let Some(stride) = self.stride {
                config.capture.stride = stride;
            }
        }
    }

    fn load_config(args: &Args) -> Result<Config, MonetError> {
        let mut config = match &args.config {
            Some(path) => Config::from_file(path)?,
            None => Config::load()?,
        };
        args.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn main() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

        let args = Args::parse();
        log::info!("Starting MonetVR v{}", env!("CARGO_PKG_VERSION"));

        let config = match load_config(&args) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        };

        if args.list_devices {
            log_devices(&enumerate_devices(&config.capture));
            return;
        }

        if let Err(e) = monet_vr::run(config) {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }

}

#[cfg(not(target_os = "android"))]
fn main() {
    desktop::main();
}

#[cfg(target_os = "android")]
fn main() {}
